use thiserror::Error;

/// Coarse classification of a [`LifecycleError`], used by callers that only
/// need to decide how to present or retry a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConstraintViolation,
    ExternalOperationFailure,
    NotFound,
    Malformed,
    Storage,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    // Constraint violations
    #[error("app '{app}' has reached its install limit")]
    LimitExceeded { app: String },

    #[error("required app '{dependency}' is not installed")]
    DependencyMissing { dependency: String },

    #[error("port {port} is already in use")]
    PortInUse { port: u16 },

    #[error("an install named '{name}' already exists")]
    NameTaken { name: String },

    #[error("install is already at version '{version}'")]
    SameVersion { version: String },

    #[error("upgrade from '{from}' to '{to}' crosses a major version and is not allowed")]
    CrossVersionNotAllowed { from: String, to: String },

    #[error("version '{version}' does not belong to app '{app}'")]
    VersionMismatch { app: String, version: String },

    #[error("backup '{backup}' does not belong to install '{install}'")]
    BackupOwnership { backup: String, install: String },

    // External operation failures
    #[error("{operation} failed: {message}")]
    Command {
        operation: String,
        output: String,
        message: String,
    },

    #[error("{operation} timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    #[error("archive operation on '{path}' failed: {message}")]
    Archive { path: String, message: String },

    #[error("download of '{url}' failed: {message}")]
    Download { url: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Not found
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },

    // Malformed shapes
    #[error("missing configuration '{field}'")]
    MissingConfig { field: String },

    #[error("configuration field '{field}' is malformed, expected {expected}")]
    MalformedConfig { field: String, expected: String },

    #[error("parameter '{key}' is invalid, expected {expected}")]
    InvalidParam { key: String, expected: String },

    #[error("compose document field '{field}' is malformed, expected {expected}")]
    MalformedDocument { field: String, expected: String },

    #[error("compose document declares {} services ({}), exactly one is supported", .services.len(), .services.join(", "))]
    MultipleServices { services: Vec<String> },

    #[error("no administrative command is known for database engine version '{version}'")]
    UnsupportedEngineVersion { version: String },

    #[error("backup archive '{name}' does not match its recorded checksum")]
    ChecksumMismatch { name: String },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        LifecycleError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        use LifecycleError::*;
        match self {
            LimitExceeded { .. }
            | DependencyMissing { .. }
            | PortInUse { .. }
            | NameTaken { .. }
            | SameVersion { .. }
            | CrossVersionNotAllowed { .. }
            | VersionMismatch { .. }
            | BackupOwnership { .. } => ErrorKind::ConstraintViolation,
            Command { .. }
            | Timeout { .. }
            | Archive { .. }
            | Download { .. }
            | Io(_)
            | ChecksumMismatch { .. } => ErrorKind::ExternalOperationFailure,
            NotFound { .. } => ErrorKind::NotFound,
            MissingConfig { .. }
            | MalformedConfig { .. }
            | InvalidParam { .. }
            | MalformedDocument { .. }
            | MultipleServices { .. }
            | UnsupportedEngineVersion { .. } => ErrorKind::Malformed,
            Store(_) => ErrorKind::Storage,
        }
    }

    /// Text recorded as an install's diagnostic message when this error is
    /// persisted. Captured process output wins over the error text.
    pub fn diagnostic(&self) -> String {
        match self {
            LifecycleError::Command { output, .. } if !output.trim().is_empty() => output.clone(),
            other => other.to_string(),
        }
    }
}
