use crate::model::{generate_id, now_rfc3339, Id, InstallParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const LOCAL_BACKUP_ACCOUNT: &str = "LOCAL";

/// Immutable snapshot of an install's files and parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallBackup {
    pub id: Id,
    /// Archive file name
    pub name: String,
    /// Directory holding the archive
    pub path: String,
    pub app_install_id: Id,
    pub app_detail_id: Id,
    /// Parameter blob of the install as of backup time
    pub params: InstallParams,
    /// Hex SHA-256 of the archive, verified before restore
    pub checksum: Option<String>,
    pub created_at: String,
}

impl InstallBackup {
    pub fn new(
        name: String,
        path: String,
        app_install_id: Id,
        app_detail_id: Id,
        params: InstallParams,
        checksum: Option<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            name,
            path,
            app_install_id,
            app_detail_id,
            params,
            checksum,
            created_at: now_rfc3339(),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        PathBuf::from(&self.path).join(&self.name)
    }
}

/// A configured backup target. `vars` is a JSON object whose shape depends
/// on `kind`; the local account carries `{"dir": "<path>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupAccount {
    pub id: Id,
    pub kind: String,
    pub vars: String,
}

impl BackupAccount {
    pub fn local(dir: &str) -> Self {
        Self {
            id: generate_id(),
            kind: LOCAL_BACKUP_ACCOUNT.to_string(),
            vars: serde_json::json!({ "dir": dir }).to_string(),
        }
    }
}
