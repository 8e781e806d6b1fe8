use std::path::Path;
use std::sync::Arc;

use log::error;

use crate::config::{PathsConfig, RecoveryPolicy};
use crate::error::{LifecycleError, Result};
use crate::host::{ComposeTool, PortScanner};
use crate::logic::lease::LeaseRegistry;
use crate::model::{App, AppDetail, AppInstall, Id};
use crate::store::Store;

/// Everything a lifecycle operation needs: repositories, the container
/// tool, the port scanner, filesystem roots and the lease registry.
/// Cheap to clone; background tasks take their own copy.
#[derive(Clone)]
pub struct LifecycleContext {
    pub store: Arc<dyn Store>,
    pub compose: Arc<dyn ComposeTool>,
    pub ports: Arc<dyn PortScanner>,
    pub paths: PathsConfig,
    pub recovery: RecoveryPolicy,
    pub leases: Arc<LeaseRegistry>,
}

impl LifecycleContext {
    pub fn new(
        store: Arc<dyn Store>,
        compose: Arc<dyn ComposeTool>,
        ports: Arc<dyn PortScanner>,
        paths: PathsConfig,
    ) -> Self {
        Self {
            store,
            compose,
            ports,
            paths,
            recovery: RecoveryPolicy::None,
            leases: Arc::new(LeaseRegistry::new()),
        }
    }

    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn install_root(&self) -> &Path {
        &self.paths.install_dir
    }

    pub fn resource_root(&self) -> &Path {
        &self.paths.resource_dir
    }

    pub async fn require_app(&self, id: &Id) -> Result<App> {
        self.store
            .get_app(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("app", id.as_str()))
    }

    pub async fn require_app_by_key(&self, key: &str) -> Result<App> {
        self.store
            .get_app_by_key(key)
            .await?
            .ok_or_else(|| LifecycleError::not_found("app", key))
    }

    pub async fn require_detail(&self, id: &Id) -> Result<AppDetail> {
        self.store
            .get_app_detail(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("app version", id.as_str()))
    }

    pub async fn require_install(&self, id: &Id) -> Result<AppInstall> {
        self.store
            .get_install(id)
            .await?
            .ok_or_else(|| LifecycleError::not_found("install", id.as_str()))
    }

    /// Record `err` on the install (status Error plus diagnostic) and hand
    /// it back so the caller can propagate it.
    pub async fn persist_failure(&self, install: &mut AppInstall, err: LifecycleError) -> LifecycleError {
        install.mark_error(err.diagnostic());
        if let Err(save_err) = self.store.save_install(install).await {
            error!(
                "Failed to record error status for install '{}': {}",
                install.name, save_err
            );
        }
        err
    }
}
