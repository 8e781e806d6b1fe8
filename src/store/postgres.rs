use anyhow::{anyhow, Context, Result};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use crate::model::{
    App, AppDetail, AppInstall, AppType, BackupAccount, CatalogStatus, Id, InstallBackup,
    InstallParams, InstallResource, InstallStatus, ParamField, ProvisionedDatabase, ResourceKind,
};
use crate::store::traits::{
    AppDetailStore, AppInstallStore, AppStore, BackupAccountStore, BackupStore,
    ProvisionedDatabaseStore, ResourceStore,
};

const INSTALL_COLUMNS: &str = "id, app_id, app_detail_id, app_key, name, version, docker_compose, env, \
     service_name, container_name, http_port, https_port, params, status, message, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn catalog_status(row: &PgRow) -> Result<CatalogStatus> {
    let status: String = row.try_get("status")?;
    CatalogStatus::parse(&status).ok_or_else(|| anyhow!("Unknown catalog status '{}'", status))
}

fn app_from_row(row: &PgRow) -> Result<App> {
    let app_type: String = row.try_get("app_type")?;
    let limit: i32 = row.try_get("install_limit")?;
    Ok(App {
        id: row.try_get("id")?,
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        short_desc: row.try_get("short_desc")?,
        author: row.try_get("author")?,
        source: row.try_get("source")?,
        app_type: AppType::parse(&app_type),
        limit: limit.max(0) as u32,
        required: row.try_get("required")?,
        cross_version_update: row.try_get("cross_version_update")?,
        status: catalog_status(row)?,
        created_at: row.try_get("created_at")?,
    })
}

fn detail_from_row(row: &PgRow) -> Result<AppDetail> {
    let params: Json<Vec<ParamField>> = row.try_get("params")?;
    Ok(AppDetail {
        id: row.try_get("id")?,
        app_id: row.try_get("app_id")?,
        version: row.try_get("version")?,
        docker_compose: row.try_get("docker_compose")?,
        params: params.0,
        status: catalog_status(row)?,
    })
}

fn port_from_column(row: &PgRow, column: &str) -> Result<Option<u16>> {
    let value: Option<i32> = row.try_get(column)?;
    value
        .map(|port| u16::try_from(port).map_err(|_| anyhow!("Invalid port {} in {}", port, column)))
        .transpose()
}

fn install_from_row(row: &PgRow) -> Result<AppInstall> {
    let status: String = row.try_get("status")?;
    let params: Json<InstallParams> = row.try_get("params")?;
    Ok(AppInstall {
        id: row.try_get("id")?,
        app_id: row.try_get("app_id")?,
        app_detail_id: row.try_get("app_detail_id")?,
        app_key: row.try_get("app_key")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        docker_compose: row.try_get("docker_compose")?,
        env: row.try_get("env")?,
        service_name: row.try_get("service_name")?,
        container_name: row.try_get("container_name")?,
        http_port: port_from_column(row, "http_port")?,
        https_port: port_from_column(row, "https_port")?,
        params: params.0,
        status: InstallStatus::parse(&status)
            .ok_or_else(|| anyhow!("Unknown install status '{}'", status))?,
        message: row.try_get("message")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn resource_from_row(row: &PgRow) -> Result<InstallResource> {
    let kind: String = row.try_get("kind")?;
    Ok(InstallResource {
        id: row.try_get("id")?,
        app_install_id: row.try_get("app_install_id")?,
        provider_install_id: row.try_get("provider_install_id")?,
        resource_id: row.try_get("resource_id")?,
        kind: ResourceKind::parse(&kind).ok_or_else(|| anyhow!("Unknown resource kind '{}'", kind))?,
        provider_key: row.try_get("provider_key")?,
        created_at: row.try_get("created_at")?,
    })
}

fn database_from_row(row: &PgRow) -> Result<ProvisionedDatabase> {
    Ok(ProvisionedDatabase {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        format: row.try_get("format")?,
        permission: row.try_get("permission")?,
        provider_install_name: row.try_get("provider_install_name")?,
        created_at: row.try_get("created_at")?,
    })
}

fn backup_from_row(row: &PgRow) -> Result<InstallBackup> {
    let params: Json<InstallParams> = row.try_get("params")?;
    Ok(InstallBackup {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        app_install_id: row.try_get("app_install_id")?,
        app_detail_id: row.try_get("app_detail_id")?,
        params: params.0,
        checksum: row.try_get("checksum")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait::async_trait]
impl AppStore for PostgresStore {
    async fn get_app(&self, id: &Id) -> Result<Option<App>> {
        let row = sqlx::query("SELECT * FROM apps WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch app")?;
        row.as_ref().map(app_from_row).transpose()
    }

    async fn get_app_by_key(&self, key: &str) -> Result<Option<App>> {
        let row = sqlx::query("SELECT * FROM apps WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch app by key")?;
        row.as_ref().map(app_from_row).transpose()
    }

    async fn list_apps(&self) -> Result<Vec<App>> {
        let rows = sqlx::query("SELECT * FROM apps ORDER BY created_at")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list apps")?;
        rows.iter().map(app_from_row).collect()
    }

    async fn upsert_app(&self, app: App) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO apps (id, key, name, short_desc, author, source, app_type, install_limit,
                              required, cross_version_update, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                key = EXCLUDED.key,
                name = EXCLUDED.name,
                short_desc = EXCLUDED.short_desc,
                author = EXCLUDED.author,
                source = EXCLUDED.source,
                app_type = EXCLUDED.app_type,
                install_limit = EXCLUDED.install_limit,
                required = EXCLUDED.required,
                cross_version_update = EXCLUDED.cross_version_update,
                status = EXCLUDED.status
            "#,
        )
        .bind(&app.id)
        .bind(&app.key)
        .bind(&app.name)
        .bind(&app.short_desc)
        .bind(&app.author)
        .bind(&app.source)
        .bind(app.app_type.as_str())
        .bind(app.limit as i32)
        .bind(&app.required)
        .bind(app.cross_version_update)
        .bind(app.status.as_str())
        .bind(&app.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to upsert app")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl AppDetailStore for PostgresStore {
    async fn get_app_detail(&self, id: &Id) -> Result<Option<AppDetail>> {
        let row = sqlx::query("SELECT * FROM app_details WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch app detail")?;
        row.as_ref().map(detail_from_row).transpose()
    }

    async fn list_app_details(&self, app_id: &Id) -> Result<Vec<AppDetail>> {
        let rows = sqlx::query("SELECT * FROM app_details WHERE app_id = $1")
            .bind(app_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list app details")?;
        rows.iter().map(detail_from_row).collect()
    }

    async fn upsert_app_detail(&self, detail: AppDetail) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_details (id, app_id, version, docker_compose, params, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                docker_compose = EXCLUDED.docker_compose,
                params = EXCLUDED.params,
                status = EXCLUDED.status
            "#,
        )
        .bind(&detail.id)
        .bind(&detail.app_id)
        .bind(&detail.version)
        .bind(&detail.docker_compose)
        .bind(Json(&detail.params))
        .bind(detail.status.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to upsert app detail")?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl AppInstallStore for PostgresStore {
    async fn get_install(&self, id: &Id) -> Result<Option<AppInstall>> {
        let row = sqlx::query(&format!("SELECT {INSTALL_COLUMNS} FROM app_installs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch install")?;
        row.as_ref().map(install_from_row).transpose()
    }

    async fn get_install_by_name(&self, app_id: &Id, name: &str) -> Result<Option<AppInstall>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTALL_COLUMNS} FROM app_installs WHERE app_id = $1 AND name = $2"
        ))
        .bind(app_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch install by name")?;
        row.as_ref().map(install_from_row).transpose()
    }

    async fn find_install_by_name(&self, name: &str) -> Result<Option<AppInstall>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTALL_COLUMNS} FROM app_installs WHERE name = $1 ORDER BY created_at LIMIT 1"
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find install by name")?;
        row.as_ref().map(install_from_row).transpose()
    }

    async fn find_install_by_service(&self, service_name: &str) -> Result<Option<AppInstall>> {
        let row = sqlx::query(&format!(
            "SELECT {INSTALL_COLUMNS} FROM app_installs WHERE service_name = $1 ORDER BY created_at LIMIT 1"
        ))
        .bind(service_name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to find install by service name")?;
        row.as_ref().map(install_from_row).transpose()
    }

    async fn list_installs(&self) -> Result<Vec<AppInstall>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTALL_COLUMNS} FROM app_installs ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list installs")?;
        rows.iter().map(install_from_row).collect()
    }

    async fn list_installs_for_app(&self, app_id: &Id) -> Result<Vec<AppInstall>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTALL_COLUMNS} FROM app_installs WHERE app_id = $1 ORDER BY created_at"
        ))
        .bind(app_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list installs for app")?;
        rows.iter().map(install_from_row).collect()
    }

    async fn list_installs_for_details(&self, detail_ids: &[Id]) -> Result<Vec<AppInstall>> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTALL_COLUMNS} FROM app_installs WHERE app_detail_id = ANY($1) ORDER BY created_at"
        ))
        .bind(detail_ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list installs for details")?;
        rows.iter().map(install_from_row).collect()
    }

    async fn create_install(&self, install: AppInstall) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO app_installs ({INSTALL_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        ))
        .bind(&install.id)
        .bind(&install.app_id)
        .bind(&install.app_detail_id)
        .bind(&install.app_key)
        .bind(&install.name)
        .bind(&install.version)
        .bind(&install.docker_compose)
        .bind(&install.env)
        .bind(&install.service_name)
        .bind(&install.container_name)
        .bind(install.http_port.map(i32::from))
        .bind(install.https_port.map(i32::from))
        .bind(Json(&install.params))
        .bind(install.status.as_str())
        .bind(&install.message)
        .bind(&install.created_at)
        .bind(&install.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to create install")?;

        Ok(())
    }

    async fn save_install(&self, install: &AppInstall) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE app_installs SET
                app_detail_id = $2, name = $3, version = $4, docker_compose = $5, env = $6,
                service_name = $7, container_name = $8, http_port = $9, https_port = $10,
                params = $11, status = $12, message = $13, updated_at = $14
            WHERE id = $1
            "#,
        )
        .bind(&install.id)
        .bind(&install.app_detail_id)
        .bind(&install.name)
        .bind(&install.version)
        .bind(&install.docker_compose)
        .bind(&install.env)
        .bind(&install.service_name)
        .bind(&install.container_name)
        .bind(install.http_port.map(i32::from))
        .bind(install.https_port.map(i32::from))
        .bind(Json(&install.params))
        .bind(install.status.as_str())
        .bind(&install.message)
        .bind(&install.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to save install")?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Install '{}' not found", install.id));
        }
        Ok(())
    }

    async fn delete_install(&self, id: &Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM app_installs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete install")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl ResourceStore for PostgresStore {
    async fn list_resources_for_install(&self, install_id: &Id) -> Result<Vec<InstallResource>> {
        let rows = sqlx::query(
            "SELECT * FROM app_install_resources WHERE app_install_id = $1 ORDER BY created_at",
        )
        .bind(install_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list install resources")?;
        rows.iter().map(resource_from_row).collect()
    }

    async fn create_resource(&self, resource: InstallResource) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_install_resources
                (id, app_install_id, provider_install_id, resource_id, kind, provider_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&resource.id)
        .bind(&resource.app_install_id)
        .bind(&resource.provider_install_id)
        .bind(&resource.resource_id)
        .bind(resource.kind.as_str())
        .bind(&resource.provider_key)
        .bind(&resource.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to create install resource")?;

        Ok(())
    }

    async fn delete_resources_for_install(&self, install_id: &Id) -> Result<u64> {
        let result = sqlx::query("DELETE FROM app_install_resources WHERE app_install_id = $1")
            .bind(install_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete install resources")?;

        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl ProvisionedDatabaseStore for PostgresStore {
    async fn get_database(&self, id: &Id) -> Result<Option<ProvisionedDatabase>> {
        let row = sqlx::query("SELECT * FROM provisioned_databases WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch provisioned database")?;
        row.as_ref().map(database_from_row).transpose()
    }

    async fn create_database(&self, database: ProvisionedDatabase) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO provisioned_databases
                (id, name, username, password, format, permission, provider_install_name, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&database.id)
        .bind(&database.name)
        .bind(&database.username)
        .bind(&database.password)
        .bind(&database.format)
        .bind(&database.permission)
        .bind(&database.provider_install_name)
        .bind(&database.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to create provisioned database")?;

        Ok(())
    }

    async fn delete_database(&self, id: &Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM provisioned_databases WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete provisioned database")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl BackupStore for PostgresStore {
    async fn get_backup(&self, id: &Id) -> Result<Option<InstallBackup>> {
        let row = sqlx::query("SELECT * FROM app_install_backups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch backup")?;
        row.as_ref().map(backup_from_row).transpose()
    }

    async fn list_backups_for_install(&self, install_id: &Id) -> Result<Vec<InstallBackup>> {
        let rows = sqlx::query(
            "SELECT * FROM app_install_backups WHERE app_install_id = $1 ORDER BY created_at",
        )
        .bind(install_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list backups")?;
        rows.iter().map(backup_from_row).collect()
    }

    async fn create_backup(&self, backup: InstallBackup) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO app_install_backups
                (id, name, path, app_install_id, app_detail_id, params, checksum, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&backup.id)
        .bind(&backup.name)
        .bind(&backup.path)
        .bind(&backup.app_install_id)
        .bind(&backup.app_detail_id)
        .bind(Json(&backup.params))
        .bind(&backup.checksum)
        .bind(&backup.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to create backup")?;

        Ok(())
    }

    async fn delete_backups_for_install(&self, install_id: &Id) -> Result<u64> {
        let result = sqlx::query("DELETE FROM app_install_backups WHERE app_install_id = $1")
            .bind(install_id)
            .execute(&self.pool)
            .await
            .context("Failed to delete backups")?;

        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl BackupAccountStore for PostgresStore {
    async fn get_backup_account(&self, kind: &str) -> Result<Option<BackupAccount>> {
        let row = sqlx::query("SELECT id, kind, vars FROM backup_accounts WHERE kind = $1")
            .bind(kind)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch backup account")?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(BackupAccount {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            vars: row.try_get("vars")?,
        }))
    }

    async fn upsert_backup_account(&self, account: BackupAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backup_accounts (id, kind, vars)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind) DO UPDATE SET vars = EXCLUDED.vars
            "#,
        )
        .bind(&account.id)
        .bind(&account.kind)
        .bind(&account.vars)
        .execute(&self.pool)
        .await
        .context("Failed to upsert backup account")?;

        Ok(())
    }
}
