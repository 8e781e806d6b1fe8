use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use appstack::config::{PathsConfig, RecoveryPolicy};
use appstack::error::{LifecycleError, Result};
use appstack::host::{CatalogFeed, ComposeTool, FeedDescriptor, PortScanner};
use appstack::logic::{companion, CatalogSync, LifecycleContext, Orchestrator};
use appstack::model::*;
use appstack::store::*;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

// Records every stack invocation; `up` can be told to fail a number of times.
#[derive(Default)]
struct FakeCompose {
    calls: Mutex<Vec<String>>,
    failing_ups: Mutex<usize>,
}

impl FakeCompose {
    fn fail_next_ups(&self, count: usize) {
        *self.failing_ups.lock() = count;
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn execs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("exec "))
            .collect()
    }
}

#[async_trait::async_trait]
impl ComposeTool for FakeCompose {
    async fn up(&self, compose_path: &Path) -> Result<String> {
        self.calls.lock().push(format!("up {}", compose_path.display()));
        let mut failing = self.failing_ups.lock();
        if *failing > 0 {
            *failing -= 1;
            return Err(LifecycleError::Command {
                operation: "compose up".to_string(),
                output: "image pull failed".to_string(),
                message: "exit status: 1".to_string(),
            });
        }
        Ok(String::new())
    }

    async fn down(&self, compose_path: &Path) -> Result<String> {
        self.calls.lock().push(format!("down {}", compose_path.display()));
        Ok(String::new())
    }

    async fn exec(&self, container: &str, args: &[String]) -> Result<String> {
        self.calls
            .lock()
            .push(format!("exec {} {}", container, args.join(" ")));
        Ok(String::new())
    }
}

#[derive(Default)]
struct FakePorts {
    bound: Mutex<HashSet<u16>>,
}

impl PortScanner for FakePorts {
    fn is_port_bound(&self, port: u16) -> bool {
        self.bound.lock().contains(&port)
    }
}

struct FixedFeed(FeedDescriptor);

#[async_trait::async_trait]
impl CatalogFeed for FixedFeed {
    async fn fetch_descriptor(&self) -> Result<FeedDescriptor> {
        Ok(self.0.clone())
    }
}

struct Harness {
    _tmp: TempDir,
    paths: PathsConfig,
    store: Arc<MemoryStore>,
    compose: Arc<FakeCompose>,
    ports: Arc<FakePorts>,
    orchestrator: Orchestrator,
}

const TEMPLATE: &str = "services:
  SERVICE:
    image: SERVICE:VERSION
    container_name: ${CONTAINER_NAME}
    ports:
      - \"${PANEL_APP_PORT_HTTP}:80\"
";

fn template(service: &str, version: &str) -> String {
    TEMPLATE
        .replace("SERVICE", service)
        .replace("VERSION", version)
}

async fn harness(policy: RecoveryPolicy) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let paths = PathsConfig {
        install_dir: tmp.path().join("apps"),
        resource_dir: tmp.path().join("resource/apps"),
        download_dir: tmp.path().join("resource"),
    };
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_backup_account(BackupAccount::local(
            tmp.path().join("backup").to_str().unwrap(),
        ))
        .await
        .unwrap();

    let compose = Arc::new(FakeCompose::default());
    let ports = Arc::new(FakePorts::default());
    let ctx = LifecycleContext::new(store.clone(), compose.clone(), ports.clone(), paths.clone())
        .with_recovery(policy);

    Harness {
        _tmp: tmp,
        paths,
        store,
        compose,
        ports,
        orchestrator: Orchestrator::new(ctx),
    }
}

impl Harness {
    /// Register a catalog entry with its versions and lay out the template
    /// files in the resource directory.
    async fn add_app(&self, key: &str, app_type: AppType, versions: &[&str]) -> (App, Vec<AppDetail>) {
        let mut app = App::new(key.to_string(), key.to_uppercase());
        app.app_type = app_type;
        self.store.upsert_app(app.clone()).await.unwrap();

        let mut details = Vec::new();
        for version in versions {
            let mut detail = AppDetail::new(app.id.clone(), version.to_string());
            detail.docker_compose = template(key, version);
            detail.params = vec![ParamField {
                env_key: HTTP_PORT_KEY.to_string(),
                kind: ParamKind::Port,
            }];
            let dir = self
                .paths
                .resource_dir
                .join(key)
                .join("versions")
                .join(version);
            fs::create_dir_all(dir.join("data")).unwrap();
            fs::write(dir.join(COMPOSE_FILE_NAME), &detail.docker_compose).unwrap();
            fs::write(dir.join("data/seed.sql"), format!("-- {key} {version}")).unwrap();

            self.store.upsert_app_detail(detail.clone()).await.unwrap();
            details.push(detail);
        }
        (app, details)
    }

    async fn save_app(&self, app: &App) {
        self.store.upsert_app(app.clone()).await.unwrap();
    }

    fn install_dir(&self, install: &AppInstall) -> PathBuf {
        install.path(&self.paths.install_dir)
    }

    async fn create(&self, key: &str, detail: &AppDetail, name: &str, params: Value) -> Result<AppInstall> {
        self.orchestrator
            .create(key, &detail.id, name, object(params))
            .await
    }

    async fn stored(&self, id: &Id) -> Option<AppInstall> {
        self.store.get_install(id).await.unwrap()
    }
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn web_params(container: &str, port: u16) -> Value {
    json!({ "CONTAINER_NAME": container, HTTP_PORT_KEY: port as f64 })
}

#[tokio::test]
async fn test_create_brings_stack_up() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;

    let install = h
        .create("nginx", &details[0], "web", web_params("web-nginx", 8080))
        .await
        .unwrap();

    assert_eq!(install.status, InstallStatus::Running);
    assert_eq!(install.http_port, Some(8080));
    assert_eq!(install.service_name, "nginx");
    assert_eq!(install.container_name, "web-nginx");

    let dir = h.install_dir(&install);
    assert_eq!(
        fs::read_to_string(dir.join("data/seed.sql")).unwrap(),
        "-- nginx 1.25"
    );
    let env = fs::read_to_string(dir.join(ENV_FILE_NAME)).unwrap();
    assert!(env.contains("PANEL_APP_PORT_HTTP=8080\n"));
    assert_eq!(install.env, env);

    let stored = h.stored(&install.id).await.unwrap();
    assert_eq!(stored.status, InstallStatus::Running);
    assert!(matches!(stored.params, InstallParams::Plain(_)));
    assert_eq!(
        h.compose.calls(),
        vec![format!("up {}", install.compose_path(&h.paths.install_dir).display())]
    );
}

#[tokio::test]
async fn test_failed_bring_up_is_recorded() {
    let h = harness(RecoveryPolicy::None).await;
    let (app, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    h.compose.fail_next_ups(1);

    let err = h
        .create("nginx", &details[0], "web", web_params("web-nginx", 8080))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Command { .. }));

    let installs = h.store.list_installs_for_app(&app.id).await.unwrap();
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].status, InstallStatus::Error);
    assert_eq!(installs[0].message, "image pull failed");
}

#[tokio::test]
async fn test_install_limit() {
    let h = harness(RecoveryPolicy::None).await;
    let (mut app, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    app.limit = 1;
    h.save_app(&app).await;

    h.create("nginx", &details[0], "web", web_params("web-1", 8080))
        .await
        .unwrap();
    let err = h
        .create("nginx", &details[0], "web-2", web_params("web-2", 8081))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::LimitExceeded { app } if app == "nginx"));
}

#[tokio::test]
async fn test_name_taken() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;

    h.create("nginx", &details[0], "web", web_params("web-1", 8080))
        .await
        .unwrap();
    let err = h
        .create("nginx", &details[0], "web", web_params("web-2", 8081))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::NameTaken { .. }));
}

#[tokio::test]
async fn test_missing_dependency() {
    let h = harness(RecoveryPolicy::None).await;
    h.add_app("mysql", AppType::Runtime, &["8.0.1"]).await;
    let (mut app, details) = h.add_app("wordpress", AppType::Website, &["6.0"]).await;
    app.required = vec!["mysql".to_string()];
    h.save_app(&app).await;

    let err = h
        .create("wordpress", &details[0], "blog", web_params("blog", 8080))
        .await
        .unwrap_err();
    match err {
        LifecycleError::DependencyMissing { dependency } => assert_eq!(dependency, "mysql"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_port_in_use() {
    let h = harness(RecoveryPolicy::None).await;
    let (app, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    h.ports.bound.lock().insert(8080);

    let err = h
        .create("nginx", &details[0], "web", web_params("web", 8080))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::PortInUse { port: 8080 }));
    assert_eq!(err.kind(), appstack::ErrorKind::ConstraintViolation);
    assert!(h.store.list_installs_for_app(&app.id).await.unwrap().is_empty());
    assert!(h.compose.calls().is_empty());
}

#[tokio::test]
async fn test_failed_create_leaves_no_directory() {
    let h = harness(RecoveryPolicy::None).await;
    let (app, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    let two_services = "services:
  web:
    container_name: web
  cache:
    container_name: cache
";
    fs::write(
        h.paths
            .resource_dir
            .join("nginx/versions/1.25")
            .join(COMPOSE_FILE_NAME),
        two_services,
    )
    .unwrap();

    let err = h
        .create("nginx", &details[0], "web", web_params("web", 8080))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::MultipleServices { .. }));
    assert!(h.store.list_installs_for_app(&app.id).await.unwrap().is_empty());
    assert!(!h.paths.install_dir.join("nginx/web").exists());
    assert!(h.compose.calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_creates_respect_limit() {
    let h = harness(RecoveryPolicy::None).await;
    let (mut app, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    app.limit = 1;
    h.save_app(&app).await;

    let (first, second) = tokio::join!(
        h.create("nginx", &details[0], "web-1", web_params("web-1", 8080)),
        h.create("nginx", &details[0], "web-2", web_params("web-2", 8081)),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(LifecycleError::LimitExceeded { .. }))));
    assert_eq!(h.store.list_installs_for_app(&app.id).await.unwrap().len(), 1);
}

async fn install_mysql(h: &Harness, version: &str) -> AppInstall {
    let (_, details) = h.add_app("mysql", AppType::Runtime, &[version]).await;
    h.create(
        "mysql",
        &details[0],
        "mysql-main",
        json!({
            "CONTAINER_NAME": "mysql-c",
            HTTP_PORT_KEY: 3306,
            "PANEL_DB_ROOT_PASSWORD": "rootpw",
        }),
    )
    .await
    .unwrap()
}

fn blog_params() -> Value {
    json!({
        "CONTAINER_NAME": "blog-c",
        HTTP_PORT_KEY: 8080,
        "PANEL_DB_HOST": "mysql",
        "PANEL_DB_NAME": "wp",
        "PANEL_DB_USER": "wp_user",
        "PANEL_DB_USER_PASSWORD": "wp_pw",
    })
}

#[tokio::test]
async fn test_website_links_and_unlinks_database() {
    let h = harness(RecoveryPolicy::None).await;
    let mysql = install_mysql(&h, "8.0.1").await;
    assert_eq!(mysql.params.root_password(), Some("rootpw"));

    let (_, details) = h.add_app("wordpress", AppType::Website, &["6.0"]).await;
    let blog = h
        .create("wordpress", &details[0], "blog", blog_params())
        .await
        .unwrap();

    let execs = h.compose.execs();
    assert_eq!(execs.len(), 1);
    assert!(execs[0].starts_with("exec mysql-c mysql -uroot -prootpw -e"));
    assert!(execs[0].contains("GRANT ALL ON wp.* TO 'wp_user'@'%';"));

    let resources = h.store.list_resources_for_install(&blog.id).await.unwrap();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].provider_key, "mysql");
    assert_eq!(resources[0].provider_install_id, mysql.id);
    let database = h
        .store
        .get_database(&resources[0].resource_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(database.provider_install_name, "mysql-main");
    assert_eq!(database.format, DATABASE_CHARSET);
    match &blog.params {
        InstallParams::Website(Some(db)) => assert_eq!(db.db_name, "wp"),
        other => panic!("unexpected params: {other:?}"),
    }

    h.orchestrator.delete(&blog.id).await.unwrap();
    let execs = h.compose.execs();
    assert_eq!(execs.len(), 2);
    assert!(execs[1].contains("drop database wp;"));
    assert!(execs[1].contains("drop user wp_user;"));
    assert!(h.store.list_resources_for_install(&blog.id).await.unwrap().is_empty());
    assert!(h.store.get_database(&database.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_engine_version_refuses_link() {
    let h = harness(RecoveryPolicy::None).await;
    install_mysql(&h, "9.9").await;
    let (_, details) = h.add_app("wordpress", AppType::Website, &["6.0"]).await;

    let err = h
        .create("wordpress", &details[0], "blog", blog_params())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::UnsupportedEngineVersion { .. }));
    assert!(h.compose.execs().is_empty());

    let blog = h.orchestrator.install_by_key("wordpress").await.unwrap();
    assert_eq!(blog.status, InstallStatus::Error);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web", 8080))
        .await
        .unwrap();
    let backup = h.orchestrator.backup(&install.id).await.unwrap();
    assert!(backup.archive_path().exists());

    h.orchestrator.delete(&install.id).await.unwrap();
    assert!(h.stored(&install.id).await.is_none());
    assert!(!h.install_dir(&install).exists());
    assert!(!backup.archive_path().exists());
    assert!(h
        .store
        .list_backups_for_install(&install.id)
        .await
        .unwrap()
        .is_empty());

    h.orchestrator.delete(&install.id).await.unwrap();
    assert!(h.stored(&install.id).await.is_none());
}

#[tokio::test]
async fn test_restore_returns_backup_state() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web-nginx", 8080))
        .await
        .unwrap();
    let backup = h.orchestrator.backup(&install.id).await.unwrap();
    assert_eq!(backup.params, install.params);

    // Drift both the files and the record
    let dir = h.install_dir(&install);
    fs::write(
        dir.join(ENV_FILE_NAME),
        "CONTAINER_NAME=\"changed\"\nPANEL_APP_PORT_HTTP=9090\n",
    )
    .unwrap();
    fs::write(dir.join(COMPOSE_FILE_NAME), template("other", "2")).unwrap();
    let mut drifted = h.stored(&install.id).await.unwrap();
    drifted.http_port = Some(9090);
    drifted.params = InstallParams::Plain(Default::default());
    h.store.save_install(&drifted).await.unwrap();

    let restored = h.orchestrator.restore(&install.id, &backup.id).await.unwrap();
    assert_eq!(restored.docker_compose, install.docker_compose);
    assert_eq!(restored.env, install.env);
    assert_eq!(restored.http_port, Some(8080));
    assert_eq!(restored.https_port, None);
    assert_eq!(restored.service_name, "nginx");
    assert_eq!(restored.container_name, "web-nginx");
    assert_eq!(restored.params, install.params);
    assert_eq!(restored.status, InstallStatus::Running);
    assert_eq!(restored.app_detail_id, backup.app_detail_id);

    let stored = h.stored(&install.id).await.unwrap();
    assert_eq!(stored.params, install.params);
    assert_eq!(
        fs::read_to_string(dir.join(ENV_FILE_NAME)).unwrap(),
        install.env
    );
}

#[tokio::test]
async fn test_restore_preconditions() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    let first = h
        .create("nginx", &details[0], "web-1", web_params("web-1", 8080))
        .await
        .unwrap();
    let second = h
        .create("nginx", &details[0], "web-2", web_params("web-2", 8081))
        .await
        .unwrap();
    let backup = h.orchestrator.backup(&first.id).await.unwrap();

    let err = h.orchestrator.restore(&second.id, &backup.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::BackupOwnership { .. }));

    // A tampered archive is refused before anything is torn down
    let calls_before = h.compose.calls().len();
    fs::write(backup.archive_path(), "not a gzip stream").unwrap();
    let err = h.orchestrator.restore(&first.id, &backup.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::ChecksumMismatch { ref name } if *name == backup.name));
    assert_eq!(h.compose.calls().len(), calls_before);

    fs::remove_file(backup.archive_path()).unwrap();
    let err = h.orchestrator.restore(&first.id, &backup.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotFound { entity: "backup archive", .. }));
    // Nothing torn down when the archive is missing
    assert_eq!(h.compose.calls().len(), calls_before);
}

#[tokio::test]
async fn test_back_to_back_backups_stay_restorable() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web-nginx", 8080))
        .await
        .unwrap();
    let dir = h.install_dir(&install);

    let first = h.orchestrator.backup(&install.id).await.unwrap();
    fs::write(
        dir.join(ENV_FILE_NAME),
        "CONTAINER_NAME=\"web-nginx\"\nPANEL_APP_PORT_HTTP=9090\n",
    )
    .unwrap();
    let second = h.orchestrator.backup(&install.id).await.unwrap();
    assert_ne!(first.archive_path(), second.archive_path());
    assert!(first.archive_path().exists());
    assert!(second.archive_path().exists());

    let restored = h.orchestrator.restore(&install.id, &first.id).await.unwrap();
    assert_eq!(restored.env, install.env);
    assert_eq!(restored.http_port, Some(8080));

    let restored = h.orchestrator.restore(&install.id, &second.id).await.unwrap();
    assert_eq!(restored.http_port, Some(9090));
}

#[tokio::test]
async fn test_failed_restore_rolls_back() {
    let h = harness(RecoveryPolicy::Rollback).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web-nginx", 8080))
        .await
        .unwrap();
    let backup = h.orchestrator.backup(&install.id).await.unwrap();

    let dir = h.install_dir(&install);
    let live_env = "CONTAINER_NAME=\"web-nginx\"\nPANEL_APP_PORT_HTTP=9090\n";
    fs::write(dir.join(ENV_FILE_NAME), live_env).unwrap();

    h.compose.fail_next_ups(1);
    let err = h.orchestrator.restore(&install.id, &backup.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Command { .. }));

    // The pre-restore files are back and their stack was brought up again
    assert_eq!(fs::read_to_string(dir.join(ENV_FILE_NAME)).unwrap(), live_env);
    let compose_path = install.compose_path(&h.paths.install_dir);
    let calls = h.compose.calls();
    assert_eq!(
        calls[calls.len() - 3..].to_vec(),
        vec![
            format!("down {}", compose_path.display()),
            format!("up {}", compose_path.display()),
            format!("up {}", compose_path.display()),
        ]
    );

    // No safety copy left next to the install
    let siblings: Vec<String> = fs::read_dir(dir.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(siblings, vec!["web".to_string()]);

    let stored = h.stored(&install.id).await.unwrap();
    assert_eq!(stored.status, InstallStatus::Error);
    assert_eq!(stored.message, "image pull failed");
    assert_eq!(stored.app_detail_id, install.app_detail_id);
}

#[tokio::test]
async fn test_upgrade() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25", "1.26"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web", 8080))
        .await
        .unwrap();

    let err = h
        .orchestrator
        .upgrade(&install.id, &details[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::SameVersion { .. }));

    let upgraded = h.orchestrator.upgrade(&install.id, &details[1].id).await.unwrap();
    assert_eq!(upgraded.version, "1.26");
    assert_eq!(upgraded.app_detail_id, details[1].id);
    assert_eq!(upgraded.status, InstallStatus::Running);
    assert_eq!(
        fs::read_to_string(install.compose_path(&h.paths.install_dir)).unwrap(),
        details[1].docker_compose
    );

    let backups = h.store.list_backups_for_install(&install.id).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].app_detail_id, details[0].id);
}

#[tokio::test]
async fn test_cross_version_upgrade_needs_flag() {
    let h = harness(RecoveryPolicy::None).await;
    let (mut app, details) = h.add_app("nginx", AppType::Other, &["1.25", "2.0"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web", 8080))
        .await
        .unwrap();

    // 1.26 is a different major than the newest listed 2.0
    let mut extra = AppDetail::new(app.id.clone(), "1.26".to_string());
    extra.docker_compose = template("nginx", "1.26");
    h.store.upsert_app_detail(extra.clone()).await.unwrap();

    let err = h.orchestrator.upgrade(&install.id, &extra.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::CrossVersionNotAllowed { .. }));

    app.cross_version_update = true;
    h.save_app(&app).await;
    let upgraded = h.orchestrator.upgrade(&install.id, &extra.id).await.unwrap();
    assert_eq!(upgraded.version, "1.26");
}

#[tokio::test]
async fn test_failed_upgrade_without_rollback() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25", "1.26"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web", 8080))
        .await
        .unwrap();

    h.compose.fail_next_ups(1);
    h.orchestrator
        .upgrade(&install.id, &details[1].id)
        .await
        .unwrap_err();

    let stored = h.stored(&install.id).await.unwrap();
    assert_eq!(stored.status, InstallStatus::Error);
    assert_eq!(stored.message, "image pull failed");
}

#[tokio::test]
async fn test_failed_upgrade_rolls_back() {
    let h = harness(RecoveryPolicy::Rollback).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25", "1.26"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web", 8080))
        .await
        .unwrap();

    h.compose.fail_next_ups(1);
    h.orchestrator
        .upgrade(&install.id, &details[1].id)
        .await
        .unwrap_err();

    let stored = h.stored(&install.id).await.unwrap();
    assert_eq!(stored.status, InstallStatus::Running);
    assert_eq!(stored.version, "1.25");
    assert_eq!(stored.docker_compose, install.docker_compose);
    assert!(stored.message.contains("upgrade to 1.26 failed"));
    assert_eq!(
        fs::read_to_string(install.compose_path(&h.paths.install_dir)).unwrap(),
        install.docker_compose
    );
}

#[tokio::test]
async fn test_companion_tracks_provider() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, tool_details) = h.add_app("phpmyadmin", AppType::Other, &["5.2"]).await;
    let tool = h
        .create(
            "phpmyadmin",
            &tool_details[0],
            "pma",
            json!({
                "CONTAINER_NAME": "pma",
                HTTP_PORT_KEY: 8081,
                "PANEL_DB_HOST": "placeholder",
            }),
        )
        .await
        .unwrap();
    let mysql = install_mysql(&h, "8.0.1").await;

    let ctx = h.orchestrator.context();
    assert!(companion::sync_companion(ctx, &mysql).await.unwrap());

    let env = fs::read_to_string(tool.env_path(&h.paths.install_dir)).unwrap();
    assert!(env.contains("PANEL_DB_ROOT_PASSWORD=\"rootpw\""));
    assert!(env.contains("PANEL_DB_HOST=\"mysql\""));
    let stored = h.stored(&tool.id).await.unwrap();
    assert_eq!(stored.env, env);

    let tool_compose = tool.compose_path(&h.paths.install_dir).display().to_string();
    let calls = h.compose.calls();
    assert!(calls.contains(&format!("down {tool_compose}")));

    // No companion mapping for the tool itself
    assert!(!companion::sync_companion(ctx, &tool).await.unwrap());
}

#[tokio::test]
async fn test_listing_and_lookups() {
    let h = harness(RecoveryPolicy::None).await;
    let (_, details) = h.add_app("nginx", AppType::Other, &["1.25", "1.26"]).await;
    let install = h
        .create("nginx", &details[0], "web", web_params("web-nginx", 8080))
        .await
        .unwrap();

    let listed = h.orchestrator.list_installed().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].latest_version.as_deref(), Some("1.26"));
    assert!(listed[0].can_update);

    assert_eq!(
        h.orchestrator.container_names(&install.id).await.unwrap(),
        vec!["web-nginx".to_string()]
    );
    assert_eq!(
        h.orchestrator.install_by_key("nginx").await.unwrap().id,
        install.id
    );
    assert!(matches!(
        h.orchestrator.install_by_key("redis").await,
        Err(LifecycleError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_catalog_refresh_without_new_package() {
    let h = harness(RecoveryPolicy::None).await;
    let descriptor = FeedDescriptor {
        version: "2024.1".to_string(),
        package: "https://catalog.invalid/apps.tar.gz".to_string(),
    };
    let resource = &h.paths.resource_dir;
    fs::create_dir_all(resource.join("redis/versions/7.0")).unwrap();
    fs::write(
        resource.join("redis/versions/7.0").join(COMPOSE_FILE_NAME),
        template("redis", "7.0"),
    )
    .unwrap();
    fs::write(
        resource.join("redis/versions/7.0/params.json"),
        r#"[{"env_key": "PANEL_APP_PORT_HTTP", "kind": "port"}]"#,
    )
    .unwrap();
    fs::write(
        resource.join("apps.json"),
        serde_json::to_string(&descriptor).unwrap(),
    )
    .unwrap();
    fs::write(
        resource.join("list.json"),
        json!({
            "version": "2024.1",
            "items": [{"key": "redis", "name": "Redis", "type": "runtime", "limit": 1, "versions": ["7.0"]}]
        })
        .to_string(),
    )
    .unwrap();

    let store: Arc<dyn Store> = h.store.clone();
    let sync = CatalogSync::new(store, Arc::new(FixedFeed(descriptor)), h.paths.clone());
    let report = sync.sync().await.unwrap();
    assert!(!report.downloaded);
    assert_eq!(report.apps, 1);
    assert_eq!(report.versions, 1);

    let redis = h.store.get_app_by_key("redis").await.unwrap().unwrap();
    assert_eq!(redis.app_type, AppType::Runtime);
    let details = h.store.list_app_details(&redis.id).await.unwrap();
    assert_eq!(details[0].docker_compose, template("redis", "7.0"));
    assert_eq!(details[0].port_keys().collect::<Vec<_>>(), vec![HTTP_PORT_KEY]);
}
