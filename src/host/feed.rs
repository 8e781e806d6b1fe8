use serde::{Deserialize, Serialize};

use crate::error::{LifecycleError, Result};

/// Versioned descriptor published by the remote catalog feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub version: String,
    /// URL of the downloadable catalog package
    pub package: String,
}

#[async_trait::async_trait]
pub trait CatalogFeed: Send + Sync {
    async fn fetch_descriptor(&self) -> Result<FeedDescriptor>;
}

#[derive(Debug, Clone)]
pub struct HttpCatalogFeed {
    client: reqwest::Client,
    url: String,
}

impl HttpCatalogFeed {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait::async_trait]
impl CatalogFeed for HttpCatalogFeed {
    async fn fetch_descriptor(&self) -> Result<FeedDescriptor> {
        let download_err = |e: reqwest::Error| LifecycleError::Download {
            url: self.url.clone(),
            message: e.to_string(),
        };
        self.client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(download_err)?
            .json::<FeedDescriptor>()
            .await
            .map_err(download_err)
    }
}
