pub mod backup;
pub mod catalog;
pub mod companion;
pub mod context;
pub mod lease;
pub mod linker;
pub mod orchestrator;
pub mod saga;
pub mod version;

pub use catalog::{reconcile_apps, reconcile_versions, CatalogSync, SyncReport};
pub use context::LifecycleContext;
pub use lease::{Lease, LeaseRegistry};
pub use linker::{admin_command, database_statements, DatabaseOp};
pub use orchestrator::{check_port, Orchestrator};
pub use saga::Saga;
pub use version::{can_update, compare_versions, latest_version, upgrade_permitted};
