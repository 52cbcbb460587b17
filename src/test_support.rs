//! Shared fixtures for unit tests: an in-memory container engine and a fully
//! wired application state pointing at it.

use async_trait::async_trait;
use axum::Router;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;
use crate::app::{build_router, proxy_client, AppState};
use crate::config::Config;
use crate::errors::{EngineError, EngineResult};
use crate::models::{ContainerSummary, ExecOutput, ImageSummary, RunSpec};
use crate::services::{
    AccountStore, CatalogStore, ContainerEngine, ContainerHost, FileBrowserBridge, ResourceMonitor,
    RetryPolicy,
};
use crate::worker::InstallManager;

/// Container engine double that keeps containers and images in memory
#[derive(Default)]
pub struct MockEngine {
    pub containers: Mutex<Vec<ContainerSummary>>,
    pub images: Mutex<Vec<ImageSummary>>,
    /// Number of upcoming pulls that fail before one succeeds
    pub pull_failures: AtomicUsize,
    pub pull_calls: AtomicUsize,
    /// When set, pulls wait for a notification before finishing
    pub pull_gate: Mutex<Option<Arc<Notify>>>,
    pub fail_run: AtomicBool,
    /// Containers started by `run` report as stopped
    pub never_running: AtomicBool,
    pub exec_calls: Mutex<Vec<Vec<String>>>,
    pub exec_output: Mutex<String>,
    pub exec_exit_code: AtomicI64,
}

impl MockEngine {
    pub fn add_container(&self, name: &str, image: &str, running: bool) {
        self.containers.lock().push(ContainerSummary {
            id: format!("id-{}", name),
            name: name.to_string(),
            image: image.to_string(),
            state: if running { "running" } else { "exited" }.to_string(),
            status: String::new(),
            ports: Vec::new(),
            web_url: None,
        });
    }

    pub fn add_image(&self, id: &str, tag: &str) {
        self.images.lock().push(ImageSummary {
            id: id.to_string(),
            tags: vec![tag.to_string()],
            size: 0,
        });
    }

    fn set_state(&self, id: &str, state: &str) -> EngineResult<()> {
        let mut containers = self.containers.lock();
        let container = containers
            .iter_mut()
            .find(|c| c.id == id || c.name == id)
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", id)))?;
        container.state = state.to_string();
        Ok(())
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn list_containers(&self, all: bool) -> EngineResult<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .iter()
            .filter(|c| all || c.is_running())
            .cloned()
            .collect())
    }

    async fn list_images(&self) -> EngineResult<Vec<ImageSummary>> {
        Ok(self.images.lock().clone())
    }

    async fn start(&self, id: &str) -> EngineResult<()> {
        self.set_state(id, "running")
    }

    async fn stop(&self, id: &str) -> EngineResult<()> {
        self.set_state(id, "exited")
    }

    async fn restart(&self, id: &str) -> EngineResult<()> {
        self.set_state(id, "running")
    }

    async fn remove(&self, id: &str, _force: bool) -> EngineResult<()> {
        let mut containers = self.containers.lock();
        let before = containers.len();
        containers.retain(|c| c.id != id && c.name != id);
        if containers.len() == before {
            return Err(EngineError::NotFound(format!("No such container: {}", id)));
        }
        Ok(())
    }

    async fn pull(&self, image: &str) -> EngineResult<()> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.pull_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let remaining = self.pull_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.pull_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Pull(format!("manifest for {} not found", image)));
        }
        self.add_image(&format!("sha256:{}", image), image);
        Ok(())
    }

    async fn remove_image(&self, id: &str, _force: bool) -> EngineResult<()> {
        let mut images = self.images.lock();
        let before = images.len();
        images.retain(|i| i.id != id && !i.tags.iter().any(|t| t == id));
        if images.len() == before {
            return Err(EngineError::NotFound(format!("No such image: {}", id)));
        }
        Ok(())
    }

    async fn run(&self, spec: &RunSpec) -> EngineResult<String> {
        if self.fail_run.load(Ordering::SeqCst) {
            return Err(EngineError::Rejected("port is already allocated".to_string()));
        }
        if self.containers.lock().iter().any(|c| c.name == spec.name) {
            return Err(EngineError::Conflict(format!("name {} is already in use", spec.name)));
        }
        let running = !self.never_running.load(Ordering::SeqCst);
        self.add_container(&spec.name, &spec.image, running);
        Ok(format!("id-{}", spec.name))
    }

    async fn is_running(&self, name: &str) -> EngineResult<bool> {
        self.containers
            .lock()
            .iter()
            .find(|c| c.name == name || c.id == name)
            .map(|c| c.is_running())
            .ok_or_else(|| EngineError::NotFound(format!("No such container: {}", name)))
    }

    async fn logs(&self, id: &str, tail: usize) -> EngineResult<String> {
        if !self.containers.lock().iter().any(|c| c.id == id || c.name == id) {
            return Err(EngineError::NotFound(format!("No such container: {}", id)));
        }
        Ok(format!("last {} lines of {}\n", tail, id))
    }

    async fn exec(&self, _container: &str, cmd: Vec<String>) -> EngineResult<ExecOutput> {
        self.exec_calls.lock().push(cmd);
        Ok(ExecOutput {
            exit_code: self.exec_exit_code.load(Ordering::SeqCst),
            output: self.exec_output.lock().clone(),
        })
    }
}

/// Application wired to a `MockEngine`, an in-memory account store and a
/// scratch directory for the catalog and wallpapers. The file manager
/// bridge is disabled.
pub struct TestEnv {
    pub state: AppState,
    pub engine: Arc<MockEngine>,
    pub dir: TempDir,
    router: Router,
}

impl TestEnv {
    /// Clones share one session store, so cookies survive between requests
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn add_user(&self, username: &str, password: &str, is_admin: bool) {
        let hash = bcrypt::hash(password, self.state.config.security.bcrypt_cost).unwrap();
        self.state.accounts.create_account(username, &hash, is_admin).unwrap();
    }
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::from_toml_str(include_str!("../config/default.toml")).unwrap();
    config.catalog.path = dir.path().join("apps.json").to_string_lossy().into_owned();
    config.assets.dir = dir.path().join("assets").to_string_lossy().into_owned();
    config.assets.templates_dir = concat!(env!("CARGO_MANIFEST_DIR"), "/templates").to_string();
    config.filebrowser.enabled = false;
    config.install.animation_step_ms = 1;
    config.engine_retry.delay_secs = 0;
    config.security.bcrypt_cost = 4;
    config.monitor.cpu_sample_ms = 1;
    config
}

pub fn test_state() -> TestEnv {
    test_state_with(|_| {})
}

/// Like `test_state`, with a hook to adjust the config before wiring
pub fn test_state_with(configure: impl FnOnce(&mut Config)) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    configure(&mut config);
    std::fs::create_dir_all(std::path::Path::new(&config.assets.dir).join("wallpapers")).unwrap();

    let engine = Arc::new(MockEngine::default());
    let host = ContainerHost::new(
        engine.clone(),
        RetryPolicy { attempts: config.engine_retry.attempts, delay: Duration::ZERO },
    );

    let accounts = AccountStore::open_memory().unwrap();
    let admin_hash = bcrypt::hash(&config.security.bootstrap_admin_password, config.security.bcrypt_cost).unwrap();
    accounts
        .ensure_bootstrap_admin(&config.security.bootstrap_admin_username, &admin_hash)
        .unwrap();

    let state = AppState {
        catalog: Arc::new(CatalogStore::open(&config.catalog.path, &config.catalog.protected_app).unwrap()),
        installs: InstallManager::new(host.clone(), &config.install),
        bridge: Arc::new(FileBrowserBridge::new(config.filebrowser.clone(), host.clone()).unwrap()),
        monitor: Arc::new(ResourceMonitor::new(&config.monitor)),
        proxy: proxy_client().unwrap(),
        config: Arc::new(config),
        accounts,
        host,
    };
    let router = build_router(state.clone());
    TestEnv { state, engine, dir, router }
}
