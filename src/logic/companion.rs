//! Keeps administrative-tool installs pointed at the install they manage.
//! Runs in the background and never fails the operation that triggered it.

use log::{debug, error, info};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::host::env_file;
use crate::logic::context::LifecycleContext;
use crate::model::{AppInstall, InstallParams};

/// Catalog key of an app mapped to the key of its administrative tool.
const TOOL_MAP: &[(&str, &str)] = &[("mysql", "phpmyadmin"), ("redis", "redis-commander")];

const ROOT_PASSWORD_KEY: &str = "PANEL_DB_ROOT_PASSWORD";
const HOST_KEYS: &[&str] = &["PANEL_REDIS_HOST", "PANEL_DB_HOST"];

pub fn companion_key(app_key: &str) -> Option<&'static str> {
    TOOL_MAP
        .iter()
        .find(|(key, _)| *key == app_key)
        .map(|(_, tool)| *tool)
}

fn root_credential(params: &InstallParams) -> Option<&str> {
    params.root_password().or_else(|| match params {
        InstallParams::Plain(vars) => vars.get(ROOT_PASSWORD_KEY).map(String::as_str),
        _ => None,
    })
}

/// Push the install's root credential and service name into its companion
/// tool's environment and restart the tool. Returns whether a companion
/// install was found.
pub async fn sync_companion(ctx: &LifecycleContext, install: &AppInstall) -> Result<bool> {
    let Some(tool_key) = companion_key(&install.app_key) else {
        return Ok(false);
    };
    let Some(tool_app) = ctx.store.get_app_by_key(tool_key).await? else {
        return Ok(false);
    };
    let Some(mut tool) = ctx
        .store
        .list_installs_for_app(&tool_app.id)
        .await?
        .into_iter()
        .next()
    else {
        return Ok(false);
    };

    let _lease = ctx.leases.for_install(&tool.id).await;

    let mut env = env_file::parse(&tool.env)?;
    if let Some(password) = root_credential(&install.params) {
        env.insert(ROOT_PASSWORD_KEY.to_string(), password.to_string());
    }
    for key in HOST_KEYS {
        if let Some(value) = env.get_mut(*key) {
            *value = install.service_name.clone();
        }
    }

    let root = ctx.install_root();
    tool.env = env_file::write(&tool.env_path(root), &env)?;
    tool.touch();
    ctx.store.save_install(&tool).await?;

    let compose_path = tool.compose_path(root);
    ctx.compose.down(&compose_path).await?;
    ctx.compose.up(&compose_path).await?;

    info!("Companion '{}' updated for '{}'", tool.name, install.name);
    Ok(true)
}

/// Run [`sync_companion`] as a detached task, logging any failure.
pub fn dispatch(ctx: &LifecycleContext, install: AppInstall) -> JoinHandle<()> {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        match sync_companion(&ctx, &install).await {
            Ok(true) => {}
            Ok(false) => debug!("No companion tool to update for '{}'", install.name),
            Err(e) => error!("Update of companion tool for '{}' failed: {}", install.name, e),
        }
    })
}
