use crate::model::{generate_id, now_rfc3339, CatalogStatus, Id};
use serde::{Deserialize, Serialize};

/// Kind of application a catalog entry describes. Decides how install
/// parameters are interpreted by the resource linker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    Runtime,
    Website,
    #[default]
    #[serde(other)]
    Other,
}

impl AppType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppType::Runtime => "runtime",
            AppType::Website => "website",
            AppType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "runtime" => AppType::Runtime,
            "website" => AppType::Website,
            _ => AppType::Other,
        }
    }
}

/// A catalog entry: one application offered for installation, independent
/// of version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: Id,
    pub key: String,
    pub name: String,
    pub short_desc: String,
    pub author: String,
    pub source: String,
    pub app_type: AppType,
    /// Maximum number of installs, 0 means unlimited
    pub limit: u32,
    /// Keys of catalog entries that must have an install first
    pub required: Vec<String>,
    pub cross_version_update: bool,
    pub status: CatalogStatus,
    pub created_at: String,
}

impl App {
    pub fn new(key: String, name: String) -> Self {
        Self {
            id: generate_id(),
            key,
            name,
            short_desc: String::new(),
            author: String::new(),
            source: String::new(),
            app_type: AppType::Other,
            limit: 0,
            required: Vec::new(),
            cross_version_update: false,
            status: CatalogStatus::Normal,
            created_at: now_rfc3339(),
        }
    }

    /// Overwrite every descriptive field from a fresh catalog definition.
    pub fn apply_define(&mut self, define: &AppDefine) {
        self.key = define.key.clone();
        self.name = define.name.clone();
        self.limit = define.limit;
        self.short_desc = define.short_desc.clone();
        self.author = define.author.clone();
        self.source = define.source.clone();
        self.app_type = define.app_type;
        self.cross_version_update = define.cross_version_update;
        self.required = define.required_keys();
        self.status = CatalogStatus::Normal;
    }
}

/// How a template parameter is rendered and validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Text,
    Number,
    Password,
    Service,
    Port,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamField {
    pub env_key: String,
    pub kind: ParamKind,
}

/// One installable version of a catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDetail {
    pub id: Id,
    pub app_id: Id,
    pub version: String,
    /// Compose template text for this version
    pub docker_compose: String,
    pub params: Vec<ParamField>,
    pub status: CatalogStatus,
}

impl AppDetail {
    pub fn new(app_id: Id, version: String) -> Self {
        Self {
            id: generate_id(),
            app_id,
            version,
            docker_compose: String::new(),
            params: Vec::new(),
            status: CatalogStatus::Normal,
        }
    }

    pub fn port_keys(&self) -> impl Iterator<Item = &str> {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::Port)
            .map(|p| p.env_key.as_str())
    }
}

/// Catalog entry definition as published by the remote catalog feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDefine {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub short_desc: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, rename = "type")]
    pub app_type: AppType,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub cross_version_update: bool,
    #[serde(default)]
    pub versions: Vec<String>,
}

impl AppDefine {
    pub fn required_keys(&self) -> Vec<String> {
        self.required
            .iter()
            .filter(|key| !key.is_empty())
            .cloned()
            .collect()
    }
}

/// The `list.json` document shipped inside a catalog package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppList {
    pub version: String,
    pub items: Vec<AppDefine>,
}
