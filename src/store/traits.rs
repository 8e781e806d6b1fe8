use crate::model::{
    App, AppDetail, AppInstall, BackupAccount, Id, InstallBackup, InstallResource,
    ProvisionedDatabase,
};
use anyhow::Result;

#[async_trait::async_trait]
pub trait AppStore: Send + Sync {
    async fn get_app(&self, id: &Id) -> Result<Option<App>>;
    async fn get_app_by_key(&self, key: &str) -> Result<Option<App>>;
    async fn list_apps(&self) -> Result<Vec<App>>;
    async fn upsert_app(&self, app: App) -> Result<()>;
}

#[async_trait::async_trait]
pub trait AppDetailStore: Send + Sync {
    async fn get_app_detail(&self, id: &Id) -> Result<Option<AppDetail>>;
    async fn list_app_details(&self, app_id: &Id) -> Result<Vec<AppDetail>>;
    async fn upsert_app_detail(&self, detail: AppDetail) -> Result<()>;
}

#[async_trait::async_trait]
pub trait AppInstallStore: Send + Sync {
    async fn get_install(&self, id: &Id) -> Result<Option<AppInstall>>;
    /// First install of an app with the given name
    async fn get_install_by_name(&self, app_id: &Id, name: &str) -> Result<Option<AppInstall>>;
    /// First install (of any app) with the given name
    async fn find_install_by_name(&self, name: &str) -> Result<Option<AppInstall>>;
    /// First install whose primary service has the given name
    async fn find_install_by_service(&self, service_name: &str) -> Result<Option<AppInstall>>;
    async fn list_installs(&self) -> Result<Vec<AppInstall>>;
    async fn list_installs_for_app(&self, app_id: &Id) -> Result<Vec<AppInstall>>;
    /// Installs whose version is one of the given details
    async fn list_installs_for_details(&self, detail_ids: &[Id]) -> Result<Vec<AppInstall>>;
    async fn create_install(&self, install: AppInstall) -> Result<()>;
    async fn save_install(&self, install: &AppInstall) -> Result<()>;
    async fn delete_install(&self, id: &Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list_resources_for_install(&self, install_id: &Id) -> Result<Vec<InstallResource>>;
    async fn create_resource(&self, resource: InstallResource) -> Result<()>;
    /// Delete every link owned by the install, returning how many went away
    async fn delete_resources_for_install(&self, install_id: &Id) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait ProvisionedDatabaseStore: Send + Sync {
    async fn get_database(&self, id: &Id) -> Result<Option<ProvisionedDatabase>>;
    async fn create_database(&self, database: ProvisionedDatabase) -> Result<()>;
    async fn delete_database(&self, id: &Id) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait BackupStore: Send + Sync {
    async fn get_backup(&self, id: &Id) -> Result<Option<InstallBackup>>;
    async fn list_backups_for_install(&self, install_id: &Id) -> Result<Vec<InstallBackup>>;
    async fn create_backup(&self, backup: InstallBackup) -> Result<()>;
    async fn delete_backups_for_install(&self, install_id: &Id) -> Result<u64>;
}

#[async_trait::async_trait]
pub trait BackupAccountStore: Send + Sync {
    async fn get_backup_account(&self, kind: &str) -> Result<Option<BackupAccount>>;
    async fn upsert_backup_account(&self, account: BackupAccount) -> Result<()>;
}

pub trait Store:
    AppStore
    + AppDetailStore
    + AppInstallStore
    + ResourceStore
    + ProvisionedDatabaseStore
    + BackupStore
    + BackupAccountStore
    + Send
    + Sync
{
}

impl<T> Store for T where
    T: AppStore
        + AppDetailStore
        + AppInstallStore
        + ResourceStore
        + ProvisionedDatabaseStore
        + BackupStore
        + BackupAccountStore
        + Send
        + Sync
{
}
