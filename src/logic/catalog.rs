use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::PathsConfig;
use crate::error::{LifecycleError, Result};
use crate::host::{files, CatalogFeed, FeedDescriptor};
use crate::model::{
    App, AppDefine, AppDetail, AppList, CatalogStatus, Id, ParamField, COMPOSE_FILE_NAME,
};
use crate::store::Store;

const FEED_CACHE_FILE: &str = "apps.json";
const APP_LIST_FILE: &str = "list.json";
const PARAMS_FILE: &str = "params.json";

/// Merge the versions known for an app with a freshly published list.
/// Every known version is kept: those missing from `fresh` are marked
/// taken down, those present are marked normal, new ones are created.
pub fn reconcile_versions(
    app_id: &Id,
    existing: Vec<AppDetail>,
    fresh: &[String],
) -> HashMap<String, AppDetail> {
    let mut details: HashMap<String, AppDetail> = existing
        .into_iter()
        .map(|mut detail| {
            detail.status = CatalogStatus::TakenDown;
            (detail.version.clone(), detail)
        })
        .collect();

    for version in fresh {
        details
            .entry(version.clone())
            .and_modify(|detail| detail.status = CatalogStatus::Normal)
            .or_insert_with(|| AppDetail::new(app_id.clone(), version.clone()));
    }
    details
}

/// Merge known catalog entries with fresh definitions, keyed by app key.
/// Matched entries take every descriptive field from the definition.
pub fn reconcile_apps(existing: Vec<App>, fresh: &[AppDefine]) -> HashMap<String, App> {
    let mut apps: HashMap<String, App> = existing
        .into_iter()
        .map(|mut app| {
            app.status = CatalogStatus::TakenDown;
            (app.key.clone(), app)
        })
        .collect();

    for define in fresh {
        apps.entry(define.key.clone())
            .or_insert_with(|| App::new(define.key.clone(), define.name.clone()))
            .apply_define(define);
    }
    apps
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// A new catalog package was downloaded and unpacked
    pub downloaded: bool,
    pub apps: usize,
    pub versions: usize,
}

/// Keeps the local catalog in step with the remote feed.
pub struct CatalogSync {
    store: Arc<dyn Store>,
    feed: Arc<dyn CatalogFeed>,
    paths: PathsConfig,
}

impl CatalogSync {
    pub fn new(store: Arc<dyn Store>, feed: Arc<dyn CatalogFeed>, paths: PathsConfig) -> Self {
        Self { store, feed, paths }
    }

    /// Download the catalog package if the feed moved on, then reconcile
    /// the stored catalog against the unpacked resources.
    pub async fn sync(&self) -> Result<SyncReport> {
        let descriptor = self.feed.fetch_descriptor().await?;
        let downloaded = if self.cached_descriptor()?.as_ref() == Some(&descriptor) {
            info!("Catalog already at version {}", descriptor.version);
            false
        } else {
            self.fetch_package(&descriptor).await?;
            true
        };

        let mut report = self.refresh().await?;
        report.downloaded = downloaded;
        Ok(report)
    }

    fn cached_descriptor(&self) -> Result<Option<FeedDescriptor>> {
        let path = self.paths.resource_dir.join(FEED_CACHE_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let descriptor = serde_json::from_str(&content).map_err(|e| LifecycleError::MalformedDocument {
            field: FEED_CACHE_FILE.to_string(),
            expected: format!("a feed descriptor ({e})"),
        })?;
        Ok(Some(descriptor))
    }

    async fn fetch_package(&self, descriptor: &FeedDescriptor) -> Result<()> {
        info!("Fetching catalog version {} from {}", descriptor.version, descriptor.package);

        if self.paths.resource_dir.exists() {
            let copy = files::backup_copy(&self.paths.resource_dir)?;
            info!("Previous catalog kept at {}", copy.display());
        }

        let file_name = descriptor
            .package
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("apps.tar.gz");
        let package_path: PathBuf = self.paths.download_dir.join(file_name);

        files::download(&descriptor.package, &package_path).await?;
        let unpacked = files::decompress(&package_path, &self.paths.download_dir);
        if let Err(e) = fs::remove_file(&package_path) {
            warn!("Failed to remove catalog package {}: {}", package_path.display(), e);
        }
        unpacked?;

        files::create_dir(&self.paths.resource_dir)?;
        let cache = serde_json::to_string_pretty(descriptor).map_err(|e| LifecycleError::MalformedDocument {
            field: FEED_CACHE_FILE.to_string(),
            expected: e.to_string(),
        })?;
        fs::write(self.paths.resource_dir.join(FEED_CACHE_FILE), cache)?;
        Ok(())
    }

    /// Reconcile stored apps and versions against `list.json` in the
    /// resource directory.
    pub async fn refresh(&self) -> Result<SyncReport> {
        let list_path = self.paths.resource_dir.join(APP_LIST_FILE);
        let content = fs::read_to_string(&list_path)?;
        let list: AppList = serde_json::from_str(&content).map_err(|e| LifecycleError::MalformedDocument {
            field: APP_LIST_FILE.to_string(),
            expected: format!("an app list ({e})"),
        })?;

        let existing = self.store.list_apps().await?;
        let apps = reconcile_apps(existing, &list.items);
        let mut report = SyncReport {
            apps: apps.len(),
            ..SyncReport::default()
        };

        for app in apps.values() {
            self.store.upsert_app(app.clone()).await?;
        }

        for define in &list.items {
            let Some(app) = apps.get(&define.key) else {
                continue;
            };
            let existing = self.store.list_app_details(&app.id).await?;
            let versions = reconcile_versions(&app.id, existing, &define.versions);
            report.versions += versions.len();

            for (version, mut detail) in versions {
                if detail.docker_compose.is_empty() {
                    self.load_template(&app.key, &version, &mut detail)?;
                }
                self.store.upsert_app_detail(detail).await?;
            }
        }

        info!(
            "Catalog {} reconciled: {} apps, {} versions",
            list.version, report.apps, report.versions
        );
        Ok(report)
    }

    fn load_template(&self, key: &str, version: &str, detail: &mut AppDetail) -> Result<()> {
        let dir = self.paths.resource_dir.join(key).join("versions").join(version);
        let compose = dir.join(COMPOSE_FILE_NAME);
        if compose.exists() {
            detail.docker_compose = fs::read_to_string(&compose)?;
        }
        let params = dir.join(PARAMS_FILE);
        if params.exists() {
            let content = fs::read_to_string(&params)?;
            detail.params = serde_json::from_str::<Vec<ParamField>>(&content).map_err(|e| {
                LifecycleError::MalformedDocument {
                    field: format!("{key}/{version}/{PARAMS_FILE}"),
                    expected: format!("a list of parameter fields ({e})"),
                }
            })?;
        }
        Ok(())
    }
}
