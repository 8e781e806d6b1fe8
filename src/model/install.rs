use crate::model::{generate_id, now_rfc3339, Id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";
pub const ENV_FILE_NAME: &str = ".env";
pub const HTTP_PORT_KEY: &str = "PANEL_APP_PORT_HTTP";
pub const HTTPS_PORT_KEY: &str = "PANEL_APP_PORT_HTTPS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum InstallStatus {
    Installing,
    Running,
    Error,
    Upgrading,
}

impl InstallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStatus::Installing => "Installing",
            InstallStatus::Running => "Running",
            InstallStatus::Error => "Error",
            InstallStatus::Upgrading => "Upgrading",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Installing" => Some(InstallStatus::Installing),
            "Running" => Some(InstallStatus::Running),
            "Error" => Some(InstallStatus::Error),
            "Upgrading" => Some(InstallStatus::Upgrading),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root credentials of a runtime install (e.g. a database engine).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthParam {
    #[serde(rename = "PANEL_DB_ROOT_PASSWORD", default)]
    pub root_password: String,
}

/// Database a website install asks to have provisioned inside a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseLinkParam {
    /// Service name of the provider install
    #[serde(rename = "PANEL_DB_HOST", default)]
    pub service_name: String,
    #[serde(rename = "PANEL_DB_NAME", default)]
    pub db_name: String,
    #[serde(rename = "PANEL_DB_USER", default)]
    pub db_user: String,
    #[serde(rename = "PANEL_DB_USER_PASSWORD", default)]
    pub password: String,
}

impl DatabaseLinkParam {
    pub fn is_empty(&self) -> bool {
        *self == DatabaseLinkParam::default()
    }
}

/// Parameter blob of an install, one shape per catalog entry type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum InstallParams {
    Runtime(AuthParam),
    Website(Option<DatabaseLinkParam>),
    Plain(BTreeMap<String, String>),
}

impl Default for InstallParams {
    fn default() -> Self {
        InstallParams::Plain(BTreeMap::new())
    }
}

impl InstallParams {
    pub fn root_password(&self) -> Option<&str> {
        match self {
            InstallParams::Runtime(auth) if !auth.root_password.is_empty() => {
                Some(auth.root_password.as_str())
            }
            _ => None,
        }
    }
}

/// A live instantiation of an app version under a user-chosen name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInstall {
    pub id: Id,
    pub app_id: Id,
    pub app_detail_id: Id,
    /// Catalog key of the owning app, used to locate the install on disk
    pub app_key: String,
    pub name: String,
    pub version: String,
    pub docker_compose: String,
    pub env: String,
    pub service_name: String,
    pub container_name: String,
    pub http_port: Option<u16>,
    pub https_port: Option<u16>,
    pub params: InstallParams,
    pub status: InstallStatus,
    pub message: String,
    pub created_at: String,
    pub updated_at: String,
}

impl AppInstall {
    pub fn new(app_id: Id, app_key: String, app_detail_id: Id, name: String, version: String) -> Self {
        let now = now_rfc3339();
        Self {
            id: generate_id(),
            app_id,
            app_detail_id,
            app_key,
            name,
            version,
            docker_compose: String::new(),
            env: String::new(),
            service_name: String::new(),
            container_name: String::new(),
            http_port: None,
            https_port: None,
            params: InstallParams::default(),
            status: InstallStatus::Installing,
            message: String::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Directory holding the install's materialized files
    pub fn path(&self, install_root: &Path) -> PathBuf {
        install_root.join(&self.app_key).join(&self.name)
    }

    pub fn compose_path(&self, install_root: &Path) -> PathBuf {
        self.path(install_root).join(COMPOSE_FILE_NAME)
    }

    pub fn env_path(&self, install_root: &Path) -> PathBuf {
        self.path(install_root).join(ENV_FILE_NAME)
    }

    pub fn mark_running(&mut self) {
        self.status = InstallStatus::Running;
        self.message.clear();
        self.touch();
    }

    pub fn mark_error(&mut self, message: String) {
        self.status = InstallStatus::Error;
        self.message = message;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = now_rfc3339();
    }
}

/// An install together with whether a newer version may be applied to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstalledApp {
    pub install: AppInstall,
    pub latest_version: Option<String>,
    pub can_update: bool,
}
