use crate::model::{generate_id, now_rfc3339, Id};
use serde::{Deserialize, Serialize};

pub const DATABASE_CHARSET: &str = "utf8mb4";
pub const DATABASE_PERMISSION: &str = "127.0.0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Database,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Database => "database",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "database" => Some(ResourceKind::Database),
            _ => None,
        }
    }
}

/// Directed edge from a dependent install to a resource hosted by a
/// provider install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallResource {
    pub id: Id,
    pub app_install_id: Id,
    pub provider_install_id: Id,
    pub resource_id: Id,
    pub kind: ResourceKind,
    /// Catalog key of the provider (e.g. "mysql")
    pub provider_key: String,
    pub created_at: String,
}

impl InstallResource {
    pub fn new(
        app_install_id: Id,
        provider_install_id: Id,
        resource_id: Id,
        kind: ResourceKind,
        provider_key: String,
    ) -> Self {
        Self {
            id: generate_id(),
            app_install_id,
            provider_install_id,
            resource_id,
            kind,
            provider_key,
            created_at: now_rfc3339(),
        }
    }
}

/// Schema and credentials living inside a provider install's database engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedDatabase {
    pub id: Id,
    pub name: String,
    pub username: String,
    pub password: String,
    pub format: String,
    pub permission: String,
    /// Name of the provider install hosting this database
    pub provider_install_name: String,
    pub created_at: String,
}

impl ProvisionedDatabase {
    pub fn new(name: String, username: String, password: String, provider_install_name: String) -> Self {
        Self {
            id: generate_id(),
            name,
            username,
            password,
            format: DATABASE_CHARSET.to_string(),
            permission: DATABASE_PERMISSION.to_string(),
            provider_install_name,
            created_at: now_rfc3339(),
        }
    }
}
