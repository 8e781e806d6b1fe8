use appstack::config::AppConfig;
use appstack::host::{DockerCompose, HostPortScanner, HttpCatalogFeed};
use appstack::logic::{CatalogSync, LifecycleContext, Orchestrator};
use appstack::store::{PostgresStore, Store};
use log::{info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .init();

    let config = AppConfig::load()?;
    info!(
        "Configuration loaded: installs in {}, recovery policy {:?}",
        config.paths.install_dir.display(),
        config.recovery.policy
    );

    info!("Connecting to PostgreSQL...");
    let database_url = config.database_url()?;
    let postgres_store = PostgresStore::new(&database_url, config.max_connections()).await?;
    postgres_store.migrate().await?;

    let store: Arc<dyn Store> = Arc::new(postgres_store);

    if let Some(feed_url) = &config.catalog.feed_url {
        let sync = CatalogSync::new(
            store.clone(),
            Arc::new(HttpCatalogFeed::new(feed_url.clone())),
            config.paths.clone(),
        );
        match sync.sync().await {
            Ok(report) => info!(
                "Catalog synced: {} apps, {} versions (downloaded: {})",
                report.apps, report.versions, report.downloaded
            ),
            Err(e) => warn!("Catalog sync failed: {}", e),
        }
    }

    let ctx = LifecycleContext::new(
        store,
        Arc::new(DockerCompose::new(
            config.compose.binary.clone(),
            config.compose.timeout(),
        )),
        Arc::new(HostPortScanner),
        config.paths.clone(),
    )
    .with_recovery(config.recovery.policy);
    let orchestrator = Orchestrator::new(ctx);

    for installed in orchestrator.list_installed().await? {
        let install = &installed.install;
        info!(
            "{} ({} {}): {}{}",
            install.name,
            install.app_key,
            install.version,
            install.status,
            match (&installed.latest_version, installed.can_update) {
                (Some(latest), true) => format!(", update to {latest} available"),
                _ => String::new(),
            }
        );
    }

    Ok(())
}
