pub mod config;
pub mod error;
pub mod host;
pub mod logic;
pub mod model;
pub mod store;

pub use config::{AppConfig, RecoveryPolicy};
pub use error::{ErrorKind, LifecycleError, Result};
pub use logic::{CatalogSync, LifecycleContext, Orchestrator};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};
