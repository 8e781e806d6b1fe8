//! Install snapshots: tar.gz archives of the install directory plus a
//! record of the parameters in effect when the snapshot was taken.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde_json::Value;

use crate::config::RecoveryPolicy;
use crate::error::{LifecycleError, Result};
use crate::host::{env_file, files, ComposeProject};
use crate::logic::companion;
use crate::logic::context::LifecycleContext;
use crate::logic::saga::Saga;
use crate::model::{
    AppInstall, Id, InstallBackup, HTTPS_PORT_KEY, HTTP_PORT_KEY, LOCAL_BACKUP_ACCOUNT,
};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Directory configured on the `LOCAL` backup account.
pub async fn local_backup_root(ctx: &LifecycleContext) -> Result<PathBuf> {
    let account = ctx
        .store
        .get_backup_account(LOCAL_BACKUP_ACCOUNT)
        .await?
        .ok_or_else(|| LifecycleError::MissingConfig {
            field: format!("backup_account.{LOCAL_BACKUP_ACCOUNT}"),
        })?;

    let vars: Value = serde_json::from_str(&account.vars).map_err(|_| LifecycleError::MalformedConfig {
        field: "vars".to_string(),
        expected: "a JSON object".to_string(),
    })?;

    vars.get("dir")
        .and_then(Value::as_str)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| LifecycleError::MalformedConfig {
            field: "dir".to_string(),
            expected: "string".to_string(),
        })
}

/// Snapshot an install on demand.
pub async fn backup(ctx: &LifecycleContext, install_id: &Id) -> Result<InstallBackup> {
    let _lease = ctx.leases.for_install(install_id).await;
    let install = ctx.require_install(install_id).await?;
    create_backup(ctx, &install).await
}

/// Archive the install directory into `<root>/apps/<key>/<name>/` and
/// record the snapshot. The caller holds the install's lease.
pub(crate) async fn create_backup(ctx: &LifecycleContext, install: &AppInstall) -> Result<InstallBackup> {
    let root = local_backup_root(ctx).await?;
    let dir = root.join("apps").join(&install.app_key).join(&install.name);
    files::create_dir(&dir)?;

    let stamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    let name = archive_name(&dir, &install.name, &stamp);
    let source = install.path(ctx.install_root());
    let checksum = {
        let (dir, name) = (dir.clone(), name.clone());
        files::run_blocking(move || files::compress_dir(&source, &dir, &name)).await?
    };

    let record = InstallBackup::new(
        name,
        dir.display().to_string(),
        install.id.clone(),
        install.app_detail_id.clone(),
        install.params.clone(),
        Some(checksum),
    );
    ctx.store.create_backup(record.clone()).await?;

    info!("Backed up '{}' to {}", install.name, record.archive_path().display());
    Ok(record)
}

/// `<install>_<stamp>.tar.gz`, or `<install>_<stamp>_<n>.tar.gz` when an
/// archive from the same second is already in `dir`.
fn archive_name(dir: &Path, install_name: &str, stamp: &str) -> String {
    let mut name = format!("{install_name}_{stamp}.tar.gz");
    let mut n = 0;
    while files::exists(&dir.join(&name)) {
        n += 1;
        name = format!("{install_name}_{stamp}_{n}.tar.gz");
    }
    name
}

/// Remove every backup archive and record of an install. Archive removal
/// is best effort.
pub(crate) async fn remove_backups(ctx: &LifecycleContext, install_id: &Id) -> Result<u64> {
    for backup in ctx.store.list_backups_for_install(install_id).await? {
        let archive = backup.archive_path();
        match fs::remove_file(&archive) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove backup archive {}: {}", archive.display(), e),
        }
    }
    Ok(ctx.store.delete_backups_for_install(install_id).await?)
}

/// Rebuild the install's derived state from the files on disk.
fn reload_from_disk(ctx: &LifecycleContext, install: &mut AppInstall) -> Result<()> {
    let root = ctx.install_root();
    let compose = fs::read_to_string(install.compose_path(root))?;
    let env_text = fs::read_to_string(install.env_path(root))?;
    let env = env_file::parse(&env_text)?;

    let project = ComposeProject::parse(&compose, &env)?;
    let service = project.primary_service()?;
    install.service_name = service.name.clone();
    install.container_name = service.container_name.clone();

    install.http_port = env_file::port(&env, HTTP_PORT_KEY)?;
    install.https_port = env_file::port(&env, HTTPS_PORT_KEY)?;
    install.docker_compose = compose;
    install.env = env_text;
    Ok(())
}

/// Put an install back to the state captured by one of its backups.
pub async fn restore(ctx: &LifecycleContext, install_id: &Id, backup_id: &Id) -> Result<AppInstall> {
    let _lease = ctx.leases.for_install(install_id).await;
    restore_locked(ctx, install_id, backup_id).await
}

pub(crate) async fn restore_locked(
    ctx: &LifecycleContext,
    install_id: &Id,
    backup_id: &Id,
) -> Result<AppInstall> {
    let mut install = ctx.require_install(install_id).await?;
    let backup = ctx
        .store
        .get_backup(backup_id)
        .await?
        .ok_or_else(|| LifecycleError::not_found("backup", backup_id.as_str()))?;
    if backup.app_install_id != install.id {
        return Err(LifecycleError::BackupOwnership {
            backup: backup.name,
            install: install.name,
        });
    }

    let archive = backup.archive_path();
    if !archive.exists() {
        return Err(LifecycleError::not_found("backup archive", backup.name.as_str()));
    }
    if let Some(expected) = &backup.checksum {
        let actual = {
            let archive = archive.clone();
            files::run_blocking(move || files::checksum(&archive)).await?
        };
        if &actual != expected {
            return Err(LifecycleError::ChecksumMismatch { name: backup.name });
        }
    }
    let detail = ctx.require_detail(&backup.app_detail_id).await?;

    let root = ctx.install_root().to_path_buf();
    let install_dir = install.path(&root);
    let compose_path = install.compose_path(&root);
    let original = install.clone();

    if compose_path.exists() {
        if let Err(e) = ctx.compose.down(&compose_path).await {
            return Err(ctx.persist_failure(&mut install, e).await);
        }
    }

    let safety_copy = files::backup_copy(&install_dir)?;
    let mut saga = Saga::new(format!("restore {}", install.name));
    if ctx.recovery == RecoveryPolicy::Rollback {
        let (compose, dir, copy, path) = (
            ctx.compose.clone(),
            install_dir.clone(),
            safety_copy.clone(),
            compose_path.clone(),
        );
        saga.push("replace install directory", async move {
            files::delete_dir(&dir)?;
            files::rename(&copy, &dir)?;
            compose.up(&path).await?;
            Ok(())
        });
    }

    let unpacked = {
        let (archive, parent) = (archive.clone(), root.join(&install.app_key));
        files::run_blocking(move || files::decompress(&archive, &parent)).await
    }
    .and_then(|_| reload_from_disk(ctx, &mut install));

    if let Err(e) = unpacked {
        return Err(fail_restore(ctx, saga, original, install, e).await);
    }
    install.params = backup.params.clone();

    // Without rollback the copy goes before bring-up, as in the base flow
    if ctx.recovery == RecoveryPolicy::None {
        discard_safety_copy(&safety_copy, &install.name);
    }

    if let Err(e) = ctx.compose.up(&compose_path).await {
        return Err(fail_restore(ctx, saga, original, install, e).await);
    }
    saga.commit();
    if ctx.recovery == RecoveryPolicy::Rollback {
        discard_safety_copy(&safety_copy, &install.name);
    }

    install.app_detail_id = backup.app_detail_id.clone();
    install.version = detail.version;
    install.mark_running();
    ctx.store.save_install(&install).await?;
    info!("Restored '{}' from {}", install.name, backup.name);

    companion::dispatch(ctx, install.clone());
    Ok(install)
}

/// Under the rollback policy the pre-restore files come back and the
/// failure is recorded on the pre-restore record; otherwise on the
/// partially restored one.
async fn fail_restore(
    ctx: &LifecycleContext,
    saga: Saga,
    original: AppInstall,
    current: AppInstall,
    err: LifecycleError,
) -> LifecycleError {
    let mut target = if saga.is_empty() {
        current
    } else {
        error!("Restore of '{}' failed, rolling back: {}", original.name, err);
        saga.compensate().await;
        original
    };
    ctx.persist_failure(&mut target, err).await
}

fn discard_safety_copy(copy: &Path, install_name: &str) {
    if let Err(e) = files::delete_dir(copy) {
        warn!(
            "Failed to remove safety copy {} of '{}': {}",
            copy.display(),
            install_name,
            e
        );
    }
}
