use std::collections::{BTreeMap, HashMap};
use std::fs;

use log::{error, info};
use serde_json::{Map, Value};

use crate::config::RecoveryPolicy;
use crate::error::{LifecycleError, Result};
use crate::host::{env_file, files, ComposeProject, PortScanner};
use crate::logic::context::LifecycleContext;
use crate::logic::saga::Saga;
use crate::logic::version::{can_update, latest_version, upgrade_permitted};
use crate::logic::{backup, companion, linker};
use crate::model::{
    App, AppDetail, AppInstall, CatalogStatus, Id, InstallBackup, InstallStatus, InstalledApp,
    HTTPS_PORT_KEY, HTTP_PORT_KEY,
};

/// Check that the port requested under `key` is free on the host. Values
/// may arrive as numbers or numeric strings; fractional values round up.
pub fn check_port(ports: &dyn PortScanner, key: &str, params: &Map<String, Value>) -> Result<Option<u16>> {
    let Some(value) = params.get(key) else {
        return Ok(None);
    };
    let invalid = || LifecycleError::InvalidParam {
        key: key.to_string(),
        expected: "a port number".to_string(),
    };

    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(invalid)?
    .ceil();
    if !(1.0..=f64::from(u16::MAX)).contains(&number) {
        return Err(invalid());
    }

    let port = number as u16;
    if ports.is_port_bound(port) {
        return Err(LifecycleError::PortInUse { port });
    }
    Ok(Some(port))
}

fn newest_listed(details: &[AppDetail]) -> Option<&str> {
    latest_version(
        details
            .iter()
            .filter(|d| d.status == CatalogStatus::Normal)
            .map(|d| d.version.as_str()),
    )
}

/// Drives create, upgrade and delete of installs and exposes the other
/// lifecycle operations on the same context.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: LifecycleContext,
}

impl Orchestrator {
    pub fn new(ctx: LifecycleContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &LifecycleContext {
        &self.ctx
    }

    async fn check_required_and_limit(&self, app: &App) -> Result<()> {
        if app.limit > 0 {
            let installed = self.ctx.store.list_installs_for_app(&app.id).await?.len();
            if installed >= app.limit as usize {
                return Err(LifecycleError::LimitExceeded {
                    app: app.key.clone(),
                });
            }
        }

        for key in &app.required {
            let missing = || LifecycleError::DependencyMissing {
                dependency: key.clone(),
            };
            let dependency = self.ctx.store.get_app_by_key(key).await?.ok_or_else(missing)?;
            let detail_ids: Vec<Id> = self
                .ctx
                .store
                .list_app_details(&dependency.id)
                .await?
                .into_iter()
                .map(|d| d.id)
                .collect();
            if self
                .ctx
                .store
                .list_installs_for_details(&detail_ids)
                .await?
                .is_empty()
            {
                return Err(missing());
            }
        }
        Ok(())
    }

    /// Copy the version's template tree to the install directory and write
    /// its `.env`. Returns the rendered environment.
    async fn materialize(
        &self,
        detail: &AppDetail,
        install: &mut AppInstall,
        params: &Map<String, Value>,
    ) -> Result<BTreeMap<String, String>> {
        let vars = env_file::render_params(params)?;
        let root = self.ctx.install_root();
        let source = self
            .ctx
            .resource_root()
            .join(&install.app_key)
            .join("versions")
            .join(&detail.version);
        if !files::exists(&source) {
            return Err(LifecycleError::not_found(
                "app version files",
                source.display().to_string(),
            ));
        }

        let target = install.path(root);
        files::delete_dir(&target)?;
        {
            let target = target.clone();
            files::run_blocking(move || files::copy_tree(&source, &target)).await?;
        }

        install.env = env_file::write(&install.env_path(root), &vars)?;
        let compose_path = install.compose_path(root);
        if files::exists(&compose_path) {
            install.docker_compose = fs::read_to_string(&compose_path)?;
        } else {
            fs::write(&compose_path, &detail.docker_compose)?;
            install.docker_compose = detail.docker_compose.clone();
        }
        Ok(vars)
    }

    /// Materialize the install and derive its service, container and
    /// ports from the written files.
    async fn prepare(
        &self,
        detail: &AppDetail,
        install: &mut AppInstall,
        params: &Map<String, Value>,
        checked: &HashMap<String, u16>,
    ) -> Result<()> {
        let env = self.materialize(detail, install, params).await?;
        let project = ComposeProject::parse(&install.docker_compose, &env)?;
        let service = project.primary_service()?;
        install.service_name = service.name.clone();
        install.container_name = service.container_name.clone();
        install.http_port = match checked.get(HTTP_PORT_KEY) {
            Some(port) => Some(*port),
            None => env_file::port(&env, HTTP_PORT_KEY)?,
        };
        install.https_port = match checked.get(HTTPS_PORT_KEY) {
            Some(port) => Some(*port),
            None => env_file::port(&env, HTTPS_PORT_KEY)?,
        };
        Ok(())
    }

    /// Install version `detail_id` of the catalog entry `app_key` under
    /// `name`.
    pub async fn create(
        &self,
        app_key: &str,
        detail_id: &Id,
        name: &str,
        params: Map<String, Value>,
    ) -> Result<AppInstall> {
        let ctx = &self.ctx;
        let app = ctx.require_app_by_key(app_key).await?;
        let _lease = ctx.leases.for_app(&app.key).await;

        let detail = ctx.require_detail(detail_id).await?;
        if detail.app_id != app.id {
            return Err(LifecycleError::VersionMismatch {
                app: app.key.clone(),
                version: detail.version.clone(),
            });
        }
        self.check_required_and_limit(&app).await?;
        if ctx.store.get_install_by_name(&app.id, name).await?.is_some() {
            return Err(LifecycleError::NameTaken {
                name: name.to_string(),
            });
        }

        let mut checked = HashMap::new();
        for key in detail.port_keys() {
            if let Some(port) = check_port(ctx.ports.as_ref(), key, &params)? {
                checked.insert(key.to_string(), port);
            }
        }

        let mut install = AppInstall::new(
            app.id.clone(),
            app.key.clone(),
            detail.id.clone(),
            name.to_string(),
            detail.version.clone(),
        );

        // No record points at the directory yet; remove it on failure
        let mut saga = Saga::new(format!("create {}", install.name));
        let dir = install.path(ctx.install_root());
        saga.push("materialize install directory", async move { files::delete_dir(&dir) });
        if let Err(e) = self.prepare(&detail, &mut install, &params, &checked).await {
            saga.compensate().await;
            return Err(e);
        }
        saga.commit();

        ctx.store.create_install(install.clone()).await?;
        info!("Installing '{}' ({} {})", install.name, app.key, install.version);

        if let Err(e) = linker::link(ctx, &app, &mut install, &params).await {
            return Err(ctx.persist_failure(&mut install, e).await);
        }
        ctx.store.save_install(&install).await?;

        if let Err(e) = ctx.compose.up(&install.compose_path(ctx.install_root())).await {
            return Err(ctx.persist_failure(&mut install, e).await);
        }
        install.mark_running();
        ctx.store.save_install(&install).await?;
        info!("Install '{}' is running", install.name);

        companion::dispatch(ctx, install.clone());
        Ok(install)
    }

    /// Move an install to another version of its catalog entry. A backup is
    /// taken first; nothing is torn down if it fails.
    pub async fn upgrade(&self, install_id: &Id, target_detail_id: &Id) -> Result<AppInstall> {
        let ctx = &self.ctx;
        let _lease = ctx.leases.for_install(install_id).await;

        let mut install = ctx.require_install(install_id).await?;
        let detail = ctx.require_detail(target_detail_id).await?;
        if detail.app_id != install.app_id {
            return Err(LifecycleError::VersionMismatch {
                app: install.app_key.clone(),
                version: detail.version.clone(),
            });
        }
        if detail.version == install.version {
            return Err(LifecycleError::SameVersion {
                version: detail.version.clone(),
            });
        }

        let app = ctx.require_app(&install.app_id).await?;
        let details = ctx.store.list_app_details(&app.id).await?;
        let latest = newest_listed(&details).unwrap_or(detail.version.as_str());
        if !upgrade_permitted(&detail.version, latest, app.cross_version_update) {
            return Err(LifecycleError::CrossVersionNotAllowed {
                from: install.version.clone(),
                to: detail.version.clone(),
            });
        }

        let snapshot = backup::create_backup(ctx, &install).await?;

        install.status = InstallStatus::Upgrading;
        install.touch();
        ctx.store.save_install(&install).await?;
        info!(
            "Upgrading '{}' from {} to {}",
            install.name, install.version, detail.version
        );

        let compose_path = install.compose_path(ctx.install_root());
        if let Err(e) = ctx.compose.down(&compose_path).await {
            return Err(ctx.persist_failure(&mut install, e).await);
        }

        let mut saga = Saga::new(format!("upgrade {}", install.name));
        if ctx.recovery == RecoveryPolicy::Rollback {
            let (rollback_ctx, id, backup_id) = (ctx.clone(), install.id.clone(), snapshot.id.clone());
            saga.push("restore pre-upgrade backup", async move {
                backup::restore_locked(&rollback_ctx, &id, &backup_id).await?;
                Ok(())
            });
        }

        let upgraded = self.apply_version(&mut install, &detail, &compose_path).await;
        if let Err(e) = upgraded {
            return Err(self.fail_upgrade(saga, install, &detail.version, e).await);
        }

        install.mark_running();
        ctx.store.save_install(&install).await?;
        saga.commit();
        info!("Upgraded '{}' to {}", install.name, install.version);

        companion::dispatch(ctx, install.clone());
        Ok(install)
    }

    async fn apply_version(
        &self,
        install: &mut AppInstall,
        detail: &AppDetail,
        compose_path: &std::path::Path,
    ) -> Result<()> {
        let env = env_file::parse(&install.env)?;
        let project = ComposeProject::parse(&detail.docker_compose, &env)?;
        let service = project.primary_service()?;

        install.docker_compose = detail.docker_compose.clone();
        install.version = detail.version.clone();
        install.app_detail_id = detail.id.clone();
        install.service_name = service.name.clone();
        install.container_name = service.container_name.clone();

        fs::write(compose_path, &install.docker_compose)?;
        self.ctx.compose.up(compose_path).await?;
        Ok(())
    }

    /// Without a rollback the failure lands on the install as usual. After
    /// a successful rollback the restored install keeps running and only
    /// carries the failure in its message.
    async fn fail_upgrade(
        &self,
        saga: Saga,
        mut install: AppInstall,
        target: &str,
        err: LifecycleError,
    ) -> LifecycleError {
        let ctx = &self.ctx;
        if saga.is_empty() {
            return ctx.persist_failure(&mut install, err).await;
        }

        error!("Upgrade of '{}' failed, restoring backup: {}", install.name, err);
        let steps = saga.len();
        if saga.compensate().await < steps {
            return ctx.persist_failure(&mut install, err).await;
        }

        match ctx.store.get_install(&install.id).await {
            Ok(Some(mut restored)) => {
                restored.message = format!("upgrade to {} failed: {}", target, err.diagnostic());
                restored.touch();
                if let Err(save_err) = ctx.store.save_install(&restored).await {
                    error!("Failed to record upgrade failure for '{}': {}", restored.name, save_err);
                }
            }
            Ok(None) => {}
            Err(e) => error!("Failed to reload '{}' after rollback: {}", install.name, e),
        }
        err
    }

    /// Remove an install with its files, links and backups. Deleting an
    /// install that is already gone succeeds.
    pub async fn delete(&self, install_id: &Id) -> Result<()> {
        let ctx = &self.ctx;
        let _lease = ctx.leases.for_install(install_id).await;

        if let Some(mut install) = ctx.store.get_install(install_id).await? {
            let root = ctx.install_root();
            let dir = install.path(root);
            if files::exists(&dir) {
                if let Err(e) = ctx.compose.down(&install.compose_path(root)).await {
                    return Err(ctx.persist_failure(&mut install, e).await);
                }
                files::delete_dir(&dir)?;
            }
            ctx.store.delete_install(install_id).await?;
            info!("Deleted install '{}'", install.name);
        }

        linker::unlink(ctx, install_id).await?;
        let removed = backup::remove_backups(ctx, install_id).await?;
        if removed > 0 {
            info!("Removed {} backups of install {}", removed, install_id);
        }
        Ok(())
    }

    pub async fn unlink(&self, install_id: &Id) -> Result<()> {
        let _lease = self.ctx.leases.for_install(install_id).await;
        linker::unlink(&self.ctx, install_id).await
    }

    pub async fn backup(&self, install_id: &Id) -> Result<InstallBackup> {
        backup::backup(&self.ctx, install_id).await
    }

    pub async fn restore(&self, install_id: &Id, backup_id: &Id) -> Result<AppInstall> {
        backup::restore(&self.ctx, install_id, backup_id).await
    }

    /// Every install with the newest listed version of its app and whether
    /// it may move there.
    pub async fn list_installed(&self) -> Result<Vec<InstalledApp>> {
        let mut apps: HashMap<Id, Option<(App, Vec<AppDetail>)>> = HashMap::new();
        let mut listed = Vec::new();

        for install in self.ctx.store.list_installs().await? {
            if !apps.contains_key(&install.app_id) {
                let entry = match self.ctx.store.get_app(&install.app_id).await? {
                    Some(app) => {
                        let details = self.ctx.store.list_app_details(&app.id).await?;
                        Some((app, details))
                    }
                    None => None,
                };
                apps.insert(install.app_id.clone(), entry);
            }

            let latest = apps
                .get(&install.app_id)
                .and_then(Option::as_ref)
                .and_then(|(app, details)| {
                    newest_listed(details).map(|v| (v.to_string(), app.cross_version_update))
                });
            let (latest_version, can_update) = match latest {
                Some((latest, cross)) => {
                    let update = can_update(&install.version, &latest, cross);
                    (Some(latest), update)
                }
                None => (None, false),
            };
            listed.push(InstalledApp {
                install,
                latest_version,
                can_update,
            });
        }
        Ok(listed)
    }

    /// Container names of every service in the install's stack.
    pub async fn container_names(&self, install_id: &Id) -> Result<Vec<String>> {
        let install = self.ctx.require_install(install_id).await?;
        let env = env_file::parse(&install.env)?;
        Ok(ComposeProject::parse(&install.docker_compose, &env)?.container_names())
    }

    /// First install of the catalog entry `app_key`.
    pub async fn install_by_key(&self, app_key: &str) -> Result<AppInstall> {
        let app = self.ctx.require_app_by_key(app_key).await?;
        self.ctx
            .store
            .list_installs_for_app(&app.id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LifecycleError::not_found("install", app_key))
    }
}
