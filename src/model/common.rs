use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

/// Lifecycle status shared by catalog entries and their versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CatalogStatus {
    Normal,
    TakenDown,
}

impl CatalogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogStatus::Normal => "Normal",
            CatalogStatus::TakenDown => "TakenDown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Normal" => Some(CatalogStatus::Normal),
            "TakenDown" => Some(CatalogStatus::TakenDown),
            _ => None,
        }
    }
}

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Current time as an ISO 8601 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
