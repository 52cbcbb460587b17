//! The FileBrowser companion container.
//!
//! The console keeps one FileBrowser instance running next to it, mirrors
//! console accounts into it and proxies its UI. Nothing here is allowed to
//! take the console down: callers log the returned errors and move on.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::StatusCode;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use crate::config::FileBrowserConfig;
use crate::errors::{BridgeError, BridgeResult, EngineError};
use crate::models::RunSpec;
use crate::services::{ContainerEngine, ContainerHost};

const COMPANION_DB: &str = "/database/filebrowser.db";

/// Sets a companion account password out of band, without the HTTP API
#[async_trait]
pub trait CredentialRotator: Send + Sync {
    async fn rotate(&self, username: &str, new_password: &str) -> BridgeResult<()>;
}

/// Runs the `filebrowser users` CLI inside the companion container
pub struct ExecRotator {
    engine: Arc<dyn ContainerEngine>,
    container: String,
}

impl ExecRotator {
    pub fn new(engine: Arc<dyn ContainerEngine>, container: impl Into<String>) -> Self {
        Self {
            engine,
            container: container.into(),
        }
    }

    async fn users_cmd(&self, args: &[&str]) -> BridgeResult<String> {
        let mut cmd: Vec<String> = vec!["filebrowser".to_string(), "users".to_string()];
        cmd.extend(args.iter().map(|a| a.to_string()));
        cmd.push("--database".to_string());
        cmd.push(COMPANION_DB.to_string());

        let out = self.engine.exec(&self.container, cmd).await?;
        if out.exit_code != 0 {
            return Err(BridgeError::Rotation(format!(
                "users {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                out.exit_code,
                out.output.trim()
            )));
        }
        Ok(out.output)
    }
}

#[async_trait]
impl CredentialRotator for ExecRotator {
    async fn rotate(&self, username: &str, new_password: &str) -> BridgeResult<()> {
        let listing = self.users_cmd(&["ls"]).await?;
        let exists = listing
            .lines()
            .any(|line| line.split_whitespace().any(|word| word == username));

        if exists {
            self.users_cmd(&["update", username, "--password", new_password]).await?;
            tracing::info!("Companion user {} password updated", username);
        } else {
            self.users_cmd(&["add", username, new_password, "--perm.admin"]).await?;
            tracing::info!("Companion user {} created", username);
        }
        Ok(())
    }
}

/// Thin client for the FileBrowser HTTP API
#[derive(Clone)]
pub struct FileBrowserApi {
    client: reqwest::Client,
    base_url: String,
}

impl FileBrowserApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> BridgeResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// True when `GET /` answers 200
    pub async fn probe(&self) -> bool {
        match self
            .client
            .get(format!("{}/", self.base_url))
            .timeout(Duration::from_secs(1))
            .send()
            .await
        {
            Ok(resp) => resp.status() == StatusCode::OK,
            Err(_) => false,
        }
    }

    /// Logs in and returns the JWT
    pub async fn login(&self, username: &str, password: &str) -> BridgeResult<String> {
        let resp = self
            .client
            .post(format!("{}/api/login", self.base_url))
            .json(&json!({ "username": username, "password": password, "recaptcha": "" }))
            .send()
            .await?;

        match resp.status() {
            StatusCode::OK => {
                let body = resp.text().await?;
                // Older releases wrap the token in {"jwt": ...}
                let token = serde_json::from_str::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|v| v.get("jwt").and_then(|t| t.as_str()).map(str::to_string))
                    .unwrap_or_else(|| body.trim().to_string());
                Ok(token)
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                Err(BridgeError::LoginRejected(username.to_string()))
            }
            status => Err(BridgeError::UnexpectedStatus {
                endpoint: "/api/login".to_string(),
                status: status.as_u16(),
            }),
        }
    }

    /// Updates the user in place, creating it when the update is refused
    pub async fn upsert_user(&self, token: &str, username: &str, password: &str, is_admin: bool) -> BridgeResult<()> {
        let user = json!({
            "username": username,
            "password": password,
            "scope": "/srv",
            "locale": "en",
            "perm": {
                "admin": is_admin,
                "execute": true,
                "create": true,
                "rename": true,
                "modify": true,
                "delete": true,
                "share": false,
                "download": true
            }
        });

        let url = format!("{}/api/users/{}", self.base_url, urlencoding::encode(username));
        let resp = self
            .client
            .put(&url)
            .header("X-Auth", token)
            .bearer_auth(token)
            .json(&json!({ "what": "user", "which": ["all"], "data": user }))
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }
        tracing::debug!("PUT {} answered {}, creating instead", url, resp.status());

        let resp = self
            .client
            .post(format!("{}/api/users", self.base_url))
            .header("X-Auth", token)
            .bearer_auth(token)
            .json(&json!({ "what": "user", "which": [], "data": user }))
            .send()
            .await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(BridgeError::UnexpectedStatus {
                endpoint: "/api/users".to_string(),
                status: resp.status().as_u16(),
            })
        }
    }

    pub async fn delete_user(&self, token: &str, username: &str) -> BridgeResult<()> {
        let resp = self
            .client
            .delete(format!("{}/api/users/{}", self.base_url, urlencoding::encode(username)))
            .header("X-Auth", token)
            .bearer_auth(token)
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() || s == StatusCode::NOT_FOUND => Ok(()),
            s => Err(BridgeError::UnexpectedStatus {
                endpoint: format!("/api/users/{}", username),
                status: s.as_u16(),
            }),
        }
    }
}

pub struct FileBrowserBridge {
    config: FileBrowserConfig,
    host: ContainerHost,
    api: FileBrowserApi,
    rotator: Arc<dyn CredentialRotator>,
    // Current password of the companion's own admin account
    admin_secret: Mutex<String>,
    ready_interval: Duration,
}

impl FileBrowserBridge {
    pub fn new(config: FileBrowserConfig, host: ContainerHost) -> BridgeResult<Self> {
        let rotator = Arc::new(ExecRotator::new(host.engine(), config.container_name.clone()));
        Self::with_rotator(config, host, rotator)
    }

    pub fn with_rotator(
        config: FileBrowserConfig,
        host: ContainerHost,
        rotator: Arc<dyn CredentialRotator>,
    ) -> BridgeResult<Self> {
        let api = FileBrowserApi::new(config.base_url(), Duration::from_secs(config.request_timeout_secs))?;
        Ok(Self {
            admin_secret: Mutex::new(config.default_password.clone()),
            config,
            host,
            api,
            rotator,
            ready_interval: Duration::from_secs(1),
        })
    }

    pub fn with_ready_interval(mut self, interval: Duration) -> Self {
        self.ready_interval = interval;
        self
    }

    pub fn base_url(&self) -> &str {
        self.api.base_url()
    }

    pub fn admin_secret(&self) -> String {
        self.admin_secret.lock().clone()
    }

    fn check_enabled(&self) -> BridgeResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(BridgeError::Disabled)
        }
    }

    /// Recreates the companion container from scratch and waits for the
    /// engine to report it running.
    pub async fn ensure_running(&self) -> BridgeResult<()> {
        self.check_enabled()?;
        let name = &self.config.container_name;

        match self.host.engine().remove(name, true).await {
            Ok(()) => tracing::info!("Removed previous {} container", name),
            Err(EngineError::NotFound(_)) => {}
            Err(e) => tracing::warn!("Could not remove previous {} container: {}", name, e),
        }

        let data_dir = prepare_dir(&self.config.data_dir)?;
        let config_dir = prepare_dir(&self.config.config_dir)?;
        let database_dir = prepare_dir(&self.config.database_dir)?;

        let stale_db = database_dir.join("filebrowser.db");
        if stale_db.exists() {
            match std::fs::remove_file(&stale_db) {
                Ok(()) => tracing::info!("Deleted stale companion database {}", stale_db.display()),
                Err(e) => tracing::error!("Failed to delete {}: {}", stale_db.display(), e),
            }
        }

        let spec = RunSpec {
            image: self.config.image.clone(),
            name: name.clone(),
            ports: [("80/tcp".to_string(), self.config.port)].into_iter().collect(),
            env: vec![
                format!("FB_DATABASE={}", COMPANION_DB),
                format!("FB_ADMIN_PASSWORD={}", self.config.default_password),
                "FB_NO_INIT=true".to_string(),
            ],
            volumes: vec![
                format!("{}:/srv", data_dir.display()),
                format!("{}:/config", config_dir.display()),
                format!("{}:/database", database_dir.display()),
            ],
        };
        tracing::info!("Starting {} container from {}", name, spec.image);
        self.host.run(&spec).await?;

        let retries = self.config.start_retries.max(1);
        let interval = Duration::from_secs(self.config.start_retry_interval_secs);
        for attempt in 1..=retries {
            match self.host.engine().is_running(name).await {
                Ok(true) => {
                    tracing::info!("{} container is running", name);
                    return Ok(());
                }
                Ok(false) => tracing::warn!("{} not running yet, check {}/{}", name, attempt, retries),
                Err(e) => tracing::error!("Checking {} state failed: {}", name, e),
            }
            tokio::time::sleep(interval).await;
        }

        Err(BridgeError::NotRunning {
            name: name.clone(),
            seconds: u64::from(retries) * self.config.start_retry_interval_secs,
        })
    }

    /// Polls the companion until it answers 200 or `timeout` elapses
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.api.probe().await {
                tracing::info!("File manager ready at {}", self.api.base_url());
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.ready_interval.min(deadline - now)).await;
        }
        tracing::error!("File manager still not ready after {:?}", timeout);
        false
    }

    /// Mirrors the console admin into the companion and replaces the
    /// companion's well-known admin password with a fresh secret.
    pub async fn sync_admin(&self, console_admin: &str) -> BridgeResult<()> {
        self.check_enabled()?;
        let companion_admin = self.config.admin_username.as_str();
        let secret = random_secret();

        match self.api.login(companion_admin, &self.config.default_password).await {
            Ok(token) => {
                tracing::info!("Logged into file manager with the default credential");
                self.api.upsert_user(&token, console_admin, &secret, true).await?;
                self.rotator.rotate(companion_admin, &secret).await?;
            }
            Err(e) => {
                tracing::warn!("Default credential login failed ({}), rotating first", e);
                self.rotator.rotate(companion_admin, &secret).await?;
                let token = self.api.login(companion_admin, &secret).await?;
                self.api.upsert_user(&token, console_admin, &secret, true).await?;
            }
        }

        *self.admin_secret.lock() = secret;
        tracing::info!("File manager admin synced for {}", console_admin);
        Ok(())
    }

    /// Rotates the companion admin to a new random secret
    pub async fn rotate_admin_secret(&self) -> BridgeResult<()> {
        self.check_enabled()?;
        let secret = random_secret();
        self.rotator.rotate(&self.config.admin_username, &secret).await?;
        *self.admin_secret.lock() = secret;
        tracing::info!("File manager admin secret rotated");
        Ok(())
    }

    async fn admin_token(&self) -> BridgeResult<String> {
        let secret = self.admin_secret();
        self.api.login(&self.config.admin_username, &secret).await
    }

    pub async fn mirror_user(&self, username: &str, password: &str, is_admin: bool) -> BridgeResult<()> {
        self.check_enabled()?;
        let token = self.admin_token().await?;
        self.api.upsert_user(&token, username, password, is_admin).await?;
        tracing::info!("Mirrored {} into file manager", username);
        Ok(())
    }

    pub async fn remove_user(&self, username: &str) -> BridgeResult<()> {
        self.check_enabled()?;
        let token = self.admin_token().await?;
        self.api.delete_user(&token, username).await?;
        tracing::info!("Removed {} from file manager", username);
        Ok(())
    }

    /// Startup sequence: container, readiness, admin sync. Each failure is
    /// logged and ends the sequence.
    pub async fn bring_up(&self, console_admin: Option<String>) {
        if !self.config.enabled {
            tracing::info!("File manager bridge disabled");
            return;
        }
        if let Err(e) = self.ensure_running().await {
            tracing::error!("File manager container failed to start: {}", e);
            return;
        }
        if !self.wait_ready(Duration::from_secs(self.config.ready_timeout_secs)).await {
            tracing::warn!("File manager API not ready, skipping admin sync");
            return;
        }
        match console_admin {
            Some(admin) => {
                if let Err(e) = self.sync_admin(&admin).await {
                    tracing::error!("File manager admin sync failed: {}", e);
                }
            }
            None => tracing::warn!("No console admin found, skipping file manager sync"),
        }
    }
}

fn prepare_dir(dir: &str) -> BridgeResult<PathBuf> {
    std::fs::create_dir_all(dir)?;
    Ok(std::fs::canonicalize(Path::new(dir))?)
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::RetryPolicy;
    use crate::test_support::MockEngine;
    use axum::{
        extract::{Path as UrlPath, State},
        http::StatusCode as AxumStatus,
        routing::{get, post, put},
        Json, Router,
    };
    use std::sync::atomic::Ordering;

    #[derive(Clone, Default)]
    struct FakeCompanion {
        admin_password: Arc<Mutex<String>>,
        put_status: Arc<Mutex<u16>>,
        created: Arc<Mutex<Vec<String>>>,
        updated: Arc<Mutex<Vec<String>>>,
    }

    async fn fake_login(State(fake): State<FakeCompanion>, Json(body): Json<serde_json::Value>) -> (AxumStatus, String) {
        let password = body["password"].as_str().unwrap_or_default();
        if body["username"] == "admin" && password == *fake.admin_password.lock() {
            (AxumStatus::OK, "token-123".to_string())
        } else {
            (AxumStatus::FORBIDDEN, String::new())
        }
    }

    async fn fake_put(State(fake): State<FakeCompanion>, UrlPath(name): UrlPath<String>) -> AxumStatus {
        let status = *fake.put_status.lock();
        if status == 200 {
            fake.updated.lock().push(name);
        }
        AxumStatus::from_u16(status).unwrap()
    }

    async fn fake_post(State(fake): State<FakeCompanion>, Json(body): Json<serde_json::Value>) -> AxumStatus {
        let name = body["data"]["username"].as_str().unwrap_or_default().to_string();
        fake.created.lock().push(name);
        AxumStatus::CREATED
    }

    async fn spawn_companion(fake: FakeCompanion) -> u16 {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route("/api/login", post(fake_login))
            .route("/api/users", post(fake_post))
            .route("/api/users/:name", put(fake_put))
            .with_state(fake);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    /// Stands in for the exec rotator by changing the fake server's password
    struct FakeRotator {
        fake: FakeCompanion,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CredentialRotator for FakeRotator {
        async fn rotate(&self, username: &str, new_password: &str) -> BridgeResult<()> {
            self.calls.lock().push(username.to_string());
            *self.fake.admin_password.lock() = new_password.to_string();
            Ok(())
        }
    }

    fn test_config(port: u16) -> FileBrowserConfig {
        let mut config = Config::from_toml_str(include_str!("../../config/default.toml"))
            .unwrap()
            .filebrowser;
        config.port = port;
        config.request_timeout_secs = 2;
        config
    }

    fn host(engine: Arc<MockEngine>) -> ContainerHost {
        ContainerHost::new(engine, RetryPolicy::default())
    }

    fn bridge_for(port: u16, fake: &FakeCompanion) -> (FileBrowserBridge, Arc<FakeRotator>) {
        let rotator = Arc::new(FakeRotator {
            fake: fake.clone(),
            calls: Mutex::new(Vec::new()),
        });
        let bridge = FileBrowserBridge::with_rotator(
            test_config(port),
            host(Arc::new(MockEngine::default())),
            rotator.clone(),
        )
        .unwrap()
        .with_ready_interval(Duration::from_millis(50));
        (bridge, rotator)
    }

    #[tokio::test]
    async fn test_wait_ready_on_first_probe() {
        let fake = FakeCompanion::default();
        let port = spawn_companion(fake.clone()).await;
        let (bridge, _) = bridge_for(port, &fake);

        let started = std::time::Instant::now();
        assert!(bridge.wait_ready(Duration::from_secs(5)).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_wait_ready_times_out() {
        let app = Router::new().route("/", get(|| async { AxumStatus::SERVICE_UNAVAILABLE }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (bridge, _) = bridge_for(port, &FakeCompanion::default());
        let started = std::time::Instant::now();
        assert!(!bridge.wait_ready(Duration::from_millis(300)).await);
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_sync_admin_with_default_credential() {
        let fake = FakeCompanion::default();
        *fake.admin_password.lock() = "adminadminadmin".to_string();
        *fake.put_status.lock() = 200;
        let port = spawn_companion(fake.clone()).await;
        let (bridge, rotator) = bridge_for(port, &fake);

        bridge.sync_admin("root").await.unwrap();

        assert_eq!(*fake.updated.lock(), vec!["root".to_string()]);
        assert!(fake.created.lock().is_empty());
        assert_eq!(*rotator.calls.lock(), vec!["admin".to_string()]);
        let secret = bridge.admin_secret();
        assert_ne!(secret, "adminadminadmin");
        assert_eq!(secret, *fake.admin_password.lock());
    }

    #[tokio::test]
    async fn test_sync_admin_rotates_first_when_default_rejected() {
        let fake = FakeCompanion::default();
        *fake.admin_password.lock() = "changed-by-someone".to_string();
        *fake.put_status.lock() = 404;
        let port = spawn_companion(fake.clone()).await;
        let (bridge, rotator) = bridge_for(port, &fake);

        bridge.sync_admin("root").await.unwrap();

        assert_eq!(rotator.calls.lock().len(), 1);
        // PUT refused, so the user was created through POST
        assert_eq!(*fake.created.lock(), vec!["root".to_string()]);
        assert_eq!(bridge.admin_secret(), *fake.admin_password.lock());

        bridge.mirror_user("alice", "alicepassword1", false).await.unwrap();
        assert_eq!(fake.created.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_bridge_refuses_work() {
        let fake = FakeCompanion::default();
        let mut config = test_config(1);
        config.enabled = false;
        let bridge = FileBrowserBridge::with_rotator(
            config,
            host(Arc::new(MockEngine::default())),
            Arc::new(FakeRotator { fake, calls: Mutex::new(Vec::new()) }),
        )
        .unwrap();
        assert!(matches!(bridge.mirror_user("a", "b", false).await, Err(BridgeError::Disabled)));
        assert!(matches!(bridge.ensure_running().await, Err(BridgeError::Disabled)));
    }

    fn dirs_config(root: &Path) -> FileBrowserConfig {
        let mut config = test_config(8088);
        config.data_dir = root.join("data").display().to_string();
        config.config_dir = root.join("config").display().to_string();
        config.database_dir = root.join("database").display().to_string();
        config.start_retries = 2;
        config.start_retry_interval_secs = 0;
        config
    }

    #[tokio::test]
    async fn test_ensure_running_recreates_container() {
        let dir = tempfile::tempdir().unwrap();
        let config = dirs_config(dir.path());
        std::fs::create_dir_all(&config.database_dir).unwrap();
        let stale = Path::new(&config.database_dir).join("filebrowser.db");
        std::fs::write(&stale, b"stale").unwrap();

        let engine = Arc::new(MockEngine::default());
        engine.add_container("filebrowser", "filebrowser/filebrowser:old", true);
        let bridge = FileBrowserBridge::new(config, host(engine.clone())).unwrap();

        bridge.ensure_running().await.unwrap();

        assert!(!stale.exists());
        assert!(dir.path().join("data").is_dir());
        let containers = engine.containers.lock().clone();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].image, "filebrowser/filebrowser:latest");
    }

    #[tokio::test]
    async fn test_ensure_running_reports_stuck_container() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(MockEngine::default());
        engine.never_running.store(true, Ordering::SeqCst);
        let bridge = FileBrowserBridge::new(dirs_config(dir.path()), host(engine)).unwrap();

        let err = bridge.ensure_running().await.unwrap_err();
        assert!(matches!(err, BridgeError::NotRunning { .. }));
    }

    #[tokio::test]
    async fn test_exec_rotator_updates_existing_user() {
        let engine = Arc::new(MockEngine::default());
        *engine.exec_output.lock() = "ID  Username  Scope\n1   admin     .\n".to_string();
        let rotator = ExecRotator::new(engine.clone(), "filebrowser");

        rotator.rotate("admin", "s3cret-s3cret").await.unwrap();

        let calls = engine.exec_calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0][..3], ["filebrowser", "users", "ls"]);
        assert_eq!(calls[1][2], "update");
        assert!(calls[1].contains(&"--password".to_string()));
        assert_eq!(calls[1][calls[1].len() - 1], "/database/filebrowser.db");
    }

    #[tokio::test]
    async fn test_exec_rotator_adds_missing_user() {
        let engine = Arc::new(MockEngine::default());
        *engine.exec_output.lock() = "ID  Username  Scope\n".to_string();
        let rotator = ExecRotator::new(engine.clone(), "filebrowser");

        rotator.rotate("admin", "s3cret-s3cret").await.unwrap();
        let calls = engine.exec_calls.lock().clone();
        assert_eq!(calls[1][2..6], ["add", "admin", "s3cret-s3cret", "--perm.admin"]);
    }

    #[tokio::test]
    async fn test_exec_rotator_nonzero_exit() {
        let engine = Arc::new(MockEngine::default());
        engine.exec_exit_code.store(1, Ordering::SeqCst);
        let rotator = ExecRotator::new(engine, "filebrowser");
        assert!(matches!(rotator.rotate("admin", "pw").await, Err(BridgeError::Rotation(_))));
    }
}
