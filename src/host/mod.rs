//! External collaborators of the orchestrator: the container-stack tool,
//! file operations, the `.env` codec, the host port scanner and the remote
//! catalog feed.

pub mod compose;
pub mod env_file;
pub mod feed;
pub mod files;
pub mod ports;

pub use compose::{ComposeProject, ComposeService, ComposeTool, DockerCompose};
pub use feed::{CatalogFeed, FeedDescriptor, HttpCatalogFeed};
pub use ports::{HostPortScanner, PortScanner};
