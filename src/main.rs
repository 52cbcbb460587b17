mod app;
mod models;
mod handlers;
mod services;
mod middleware;
mod worker;
mod config;
mod errors;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use crate::{
    app::{build_router, proxy_client, AppState},
    config::Config,
    services::{
        AccountStore, CatalogStore, ContainerHost, DockerEngine, FileBrowserBridge,
        ResourceMonitor, RetryPolicy,
    },
    worker::InstallManager,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Account database, with a first admin on an empty install
    let accounts = AccountStore::open(&config.database.path).context("Failed to open account database")?;
    let security = &config.security;
    let bootstrap_hash = bcrypt::hash(&security.bootstrap_admin_password, security.bcrypt_cost)?;
    if accounts.ensure_bootstrap_admin(&security.bootstrap_admin_username, &bootstrap_hash)? {
        tracing::warn!(
            "Created default admin account '{}', change its password after the first login",
            security.bootstrap_admin_username
        );
    }

    // Container engine
    let engine = DockerEngine::connect(&config.docker.socket, config.docker.timeout_secs)
        .await
        .context("Failed to connect to the container engine")?;
    let retry = RetryPolicy {
        attempts: config.engine_retry.attempts,
        delay: config.engine_retry.delay(),
    };
    let host = ContainerHost::new(Arc::new(engine), retry);

    let catalog = CatalogStore::open(&config.catalog.path, &config.catalog.protected_app)
        .context("Failed to open app catalog")?;
    let installs = InstallManager::new(host.clone(), &config.install);
    let monitor = ResourceMonitor::new(&config.monitor);
    let bridge = Arc::new(FileBrowserBridge::new(config.filebrowser.clone(), host.clone())?);

    // Companion file manager comes up in the background
    let first_admin = accounts.first_admin()?.map(|a| a.username);
    let bridge_startup = bridge.clone();
    tokio::spawn(async move {
        bridge_startup.bring_up(first_admin).await;
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState {
        config: Arc::new(config),
        accounts,
        host,
        catalog: Arc::new(catalog),
        installs,
        bridge,
        monitor: Arc::new(monitor),
        proxy: proxy_client()?,
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server running on {}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("Server error")?;
    Ok(())
}
