use anyhow::{bail, Result};
use parking_lot::RwLock;

use crate::model::{
    App, AppDetail, AppInstall, BackupAccount, Id, InstallBackup, InstallResource,
    ProvisionedDatabase,
};
use crate::store::traits::{
    AppDetailStore, AppInstallStore, AppStore, BackupAccountStore, BackupStore,
    ProvisionedDatabaseStore, ResourceStore,
};

/// In-memory store keeping rows in insertion order, so "first matching"
/// lookups behave like an ordered table scan.
#[derive(Debug, Default)]
pub struct MemoryStore {
    apps: RwLock<Vec<App>>,
    details: RwLock<Vec<AppDetail>>,
    installs: RwLock<Vec<AppInstall>>,
    resources: RwLock<Vec<InstallResource>>,
    databases: RwLock<Vec<ProvisionedDatabase>>,
    backups: RwLock<Vec<InstallBackup>>,
    accounts: RwLock<Vec<BackupAccount>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn upsert_by<T, F>(rows: &RwLock<Vec<T>>, row: T, same: F)
where
    F: Fn(&T, &T) -> bool,
{
    let mut rows = rows.write();
    match rows.iter_mut().find(|existing| same(existing, &row)) {
        Some(existing) => *existing = row,
        None => rows.push(row),
    }
}

#[async_trait::async_trait]
impl AppStore for MemoryStore {
    async fn get_app(&self, id: &Id) -> Result<Option<App>> {
        Ok(self.apps.read().iter().find(|a| &a.id == id).cloned())
    }

    async fn get_app_by_key(&self, key: &str) -> Result<Option<App>> {
        Ok(self.apps.read().iter().find(|a| a.key == key).cloned())
    }

    async fn list_apps(&self) -> Result<Vec<App>> {
        Ok(self.apps.read().clone())
    }

    async fn upsert_app(&self, app: App) -> Result<()> {
        upsert_by(&self.apps, app, |a, b| a.id == b.id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AppDetailStore for MemoryStore {
    async fn get_app_detail(&self, id: &Id) -> Result<Option<AppDetail>> {
        Ok(self.details.read().iter().find(|d| &d.id == id).cloned())
    }

    async fn list_app_details(&self, app_id: &Id) -> Result<Vec<AppDetail>> {
        Ok(self
            .details
            .read()
            .iter()
            .filter(|d| &d.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn upsert_app_detail(&self, detail: AppDetail) -> Result<()> {
        {
            let details = self.details.read();
            if details
                .iter()
                .any(|d| d.app_id == detail.app_id && d.version == detail.version && d.id != detail.id)
            {
                bail!(
                    "Version '{}' already exists for app '{}'",
                    detail.version,
                    detail.app_id
                );
            }
        }
        upsert_by(&self.details, detail, |a, b| a.id == b.id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl AppInstallStore for MemoryStore {
    async fn get_install(&self, id: &Id) -> Result<Option<AppInstall>> {
        Ok(self.installs.read().iter().find(|i| &i.id == id).cloned())
    }

    async fn get_install_by_name(&self, app_id: &Id, name: &str) -> Result<Option<AppInstall>> {
        Ok(self
            .installs
            .read()
            .iter()
            .find(|i| &i.app_id == app_id && i.name == name)
            .cloned())
    }

    async fn find_install_by_name(&self, name: &str) -> Result<Option<AppInstall>> {
        Ok(self.installs.read().iter().find(|i| i.name == name).cloned())
    }

    async fn find_install_by_service(&self, service_name: &str) -> Result<Option<AppInstall>> {
        Ok(self
            .installs
            .read()
            .iter()
            .find(|i| i.service_name == service_name)
            .cloned())
    }

    async fn list_installs(&self) -> Result<Vec<AppInstall>> {
        Ok(self.installs.read().clone())
    }

    async fn list_installs_for_app(&self, app_id: &Id) -> Result<Vec<AppInstall>> {
        Ok(self
            .installs
            .read()
            .iter()
            .filter(|i| &i.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn list_installs_for_details(&self, detail_ids: &[Id]) -> Result<Vec<AppInstall>> {
        Ok(self
            .installs
            .read()
            .iter()
            .filter(|i| detail_ids.contains(&i.app_detail_id))
            .cloned()
            .collect())
    }

    async fn create_install(&self, install: AppInstall) -> Result<()> {
        let mut installs = self.installs.write();
        if installs
            .iter()
            .any(|i| i.app_id == install.app_id && i.name == install.name)
        {
            bail!("Install '{}' already exists", install.name);
        }
        installs.push(install);
        Ok(())
    }

    async fn save_install(&self, install: &AppInstall) -> Result<()> {
        let mut installs = self.installs.write();
        match installs.iter_mut().find(|i| i.id == install.id) {
            Some(existing) => {
                *existing = install.clone();
                Ok(())
            }
            None => bail!("Install '{}' not found", install.id),
        }
    }

    async fn delete_install(&self, id: &Id) -> Result<bool> {
        let mut installs = self.installs.write();
        let before = installs.len();
        installs.retain(|i| &i.id != id);
        Ok(installs.len() != before)
    }
}

#[async_trait::async_trait]
impl ResourceStore for MemoryStore {
    async fn list_resources_for_install(&self, install_id: &Id) -> Result<Vec<InstallResource>> {
        Ok(self
            .resources
            .read()
            .iter()
            .filter(|r| &r.app_install_id == install_id)
            .cloned()
            .collect())
    }

    async fn create_resource(&self, resource: InstallResource) -> Result<()> {
        self.resources.write().push(resource);
        Ok(())
    }

    async fn delete_resources_for_install(&self, install_id: &Id) -> Result<u64> {
        let mut resources = self.resources.write();
        let before = resources.len();
        resources.retain(|r| &r.app_install_id != install_id);
        Ok((before - resources.len()) as u64)
    }
}

#[async_trait::async_trait]
impl ProvisionedDatabaseStore for MemoryStore {
    async fn get_database(&self, id: &Id) -> Result<Option<ProvisionedDatabase>> {
        Ok(self.databases.read().iter().find(|d| &d.id == id).cloned())
    }

    async fn create_database(&self, database: ProvisionedDatabase) -> Result<()> {
        self.databases.write().push(database);
        Ok(())
    }

    async fn delete_database(&self, id: &Id) -> Result<bool> {
        let mut databases = self.databases.write();
        let before = databases.len();
        databases.retain(|d| &d.id != id);
        Ok(databases.len() != before)
    }
}

#[async_trait::async_trait]
impl BackupStore for MemoryStore {
    async fn get_backup(&self, id: &Id) -> Result<Option<InstallBackup>> {
        Ok(self.backups.read().iter().find(|b| &b.id == id).cloned())
    }

    async fn list_backups_for_install(&self, install_id: &Id) -> Result<Vec<InstallBackup>> {
        Ok(self
            .backups
            .read()
            .iter()
            .filter(|b| &b.app_install_id == install_id)
            .cloned()
            .collect())
    }

    async fn create_backup(&self, backup: InstallBackup) -> Result<()> {
        self.backups.write().push(backup);
        Ok(())
    }

    async fn delete_backups_for_install(&self, install_id: &Id) -> Result<u64> {
        let mut backups = self.backups.write();
        let before = backups.len();
        backups.retain(|b| &b.app_install_id != install_id);
        Ok((before - backups.len()) as u64)
    }
}

#[async_trait::async_trait]
impl BackupAccountStore for MemoryStore {
    async fn get_backup_account(&self, kind: &str) -> Result<Option<BackupAccount>> {
        Ok(self.accounts.read().iter().find(|a| a.kind == kind).cloned())
    }

    async fn upsert_backup_account(&self, account: BackupAccount) -> Result<()> {
        upsert_by(&self.accounts, account, |a, b| a.kind == b.kind);
        Ok(())
    }
}
