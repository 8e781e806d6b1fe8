pub mod app;
pub mod backup;
pub mod common;
pub mod install;
pub mod resource;

pub use app::*;
pub use backup::*;
pub use common::*;
pub use install::*;
pub use resource::*;
