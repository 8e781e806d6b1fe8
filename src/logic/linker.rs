//! Provisions and removes resources an install owns inside another
//! (provider) install, such as a database schema with its credentials.

use log::info;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{LifecycleError, Result};
use crate::host::env_file;
use crate::logic::context::LifecycleContext;
use crate::model::{
    App, AppInstall, AppType, AuthParam, DatabaseLinkParam, Id, InstallParams, InstallResource,
    ProvisionedDatabase, ResourceKind,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseOp {
    Add,
    Delete,
}

/// SQL run against the provider's engine. The grant differs between engine
/// lines: 5.7 binds the password in the grant itself, 8.0 rejects that and
/// relies on the password set at user creation. Unknown lines yield no
/// statements.
pub fn database_statements(engine_version: &str, op: DatabaseOp, db: &ProvisionedDatabase) -> Vec<String> {
    let legacy = engine_version.contains("5.7");
    if !legacy && !engine_version.contains("8.0") {
        return Vec::new();
    }

    match op {
        DatabaseOp::Add => {
            let grant = if legacy {
                format!(
                    "GRANT ALL ON {}.* TO '{}'@'%' IDENTIFIED BY '{}';",
                    db.name, db.username, db.password
                )
            } else {
                format!("GRANT ALL ON {}.* TO '{}'@'%';", db.name, db.username)
            };
            vec![
                format!(
                    "CREATE USER IF NOT EXISTS '{}'@'%' IDENTIFIED BY '{}';",
                    db.username, db.password
                ),
                format!("create database {};", db.name),
                grant,
                "FLUSH PRIVILEGES;".to_string(),
            ]
        }
        DatabaseOp::Delete => vec![
            format!("drop database {};", db.name),
            format!("drop user {};", db.username),
        ],
    }
}

/// Arguments for running the database client inside the provider's
/// container. Empty when the engine version is not recognised.
pub fn admin_command(
    engine_version: &str,
    op: DatabaseOp,
    root_password: &str,
    db: &ProvisionedDatabase,
) -> Vec<String> {
    let statements = database_statements(engine_version, op, db);
    if statements.is_empty() {
        return Vec::new();
    }

    let mut args = vec![
        "mysql".to_string(),
        "-uroot".to_string(),
        format!("-p{root_password}"),
    ];
    for statement in statements {
        args.push("-e".to_string());
        args.push(statement);
    }
    args
}

fn decode<T: DeserializeOwned>(params: &Map<String, Value>, shape: &str) -> Result<T> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| LifecycleError::InvalidParam {
        key: shape.to_string(),
        expected: e.to_string(),
    })
}

async fn run_admin_command(
    ctx: &LifecycleContext,
    provider: &AppInstall,
    op: DatabaseOp,
    db: &ProvisionedDatabase,
) -> Result<()> {
    let root_password = provider.params.root_password().unwrap_or_default();
    let command = admin_command(&provider.version, op, root_password, db);
    if command.is_empty() {
        return Err(LifecycleError::UnsupportedEngineVersion {
            version: provider.version.clone(),
        });
    }
    ctx.compose.exec(&provider.container_name, &command).await?;
    Ok(())
}

/// Decode `params` by the app's type and store the typed blob on the
/// install. Website installs naming a database get it provisioned inside
/// the provider install and linked to it.
pub async fn link(
    ctx: &LifecycleContext,
    app: &App,
    install: &mut AppInstall,
    params: &Map<String, Value>,
) -> Result<()> {
    install.params = match app.app_type {
        AppType::Runtime => InstallParams::Runtime(decode::<AuthParam>(params, "auth")?),
        AppType::Website => {
            let database: DatabaseLinkParam = decode(params, "database")?;
            if database.is_empty() {
                InstallParams::Website(None)
            } else {
                provision_database(ctx, install, &database).await?;
                InstallParams::Website(Some(database))
            }
        }
        AppType::Other => InstallParams::Plain(env_file::render_params(params)?),
    };
    Ok(())
}

async fn provision_database(
    ctx: &LifecycleContext,
    install: &AppInstall,
    param: &DatabaseLinkParam,
) -> Result<()> {
    let provider = ctx
        .store
        .find_install_by_service(&param.service_name)
        .await?
        .ok_or_else(|| LifecycleError::not_found("provider install", param.service_name.as_str()))?;

    let database = ProvisionedDatabase::new(
        param.db_name.clone(),
        param.db_user.clone(),
        param.password.clone(),
        provider.name.clone(),
    );
    if database_statements(&provider.version, DatabaseOp::Add, &database).is_empty() {
        return Err(LifecycleError::UnsupportedEngineVersion {
            version: provider.version.clone(),
        });
    }

    ctx.store.create_database(database.clone()).await?;
    ctx.store
        .create_resource(InstallResource::new(
            install.id.clone(),
            provider.id.clone(),
            database.id.clone(),
            ResourceKind::Database,
            provider.app_key.clone(),
        ))
        .await?;

    run_admin_command(ctx, &provider, DatabaseOp::Add, &database).await?;
    info!(
        "Provisioned database '{}' for '{}' in '{}'",
        database.name, install.name, provider.name
    );
    Ok(())
}

/// Drop every database the install owns and remove all of its links.
/// Databases already gone are skipped.
pub async fn unlink(ctx: &LifecycleContext, install_id: &Id) -> Result<()> {
    let resources = ctx.store.list_resources_for_install(install_id).await?;
    if resources.is_empty() {
        return Ok(());
    }

    for resource in resources.iter().filter(|r| r.kind == ResourceKind::Database) {
        let Some(database) = ctx.store.get_database(&resource.resource_id).await? else {
            continue;
        };
        let provider = ctx
            .store
            .find_install_by_name(&database.provider_install_name)
            .await?
            .ok_or_else(|| {
                LifecycleError::not_found("provider install", database.provider_install_name.as_str())
            })?;

        run_admin_command(ctx, &provider, DatabaseOp::Delete, &database).await?;
        ctx.store.delete_database(&database.id).await?;
        info!("Dropped database '{}' from '{}'", database.name, provider.name);
    }

    ctx.store.delete_resources_for_install(install_id).await?;
    Ok(())
}
