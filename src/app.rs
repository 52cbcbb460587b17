use axum::{
    routing::{any, get, post},
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
};
use tower_http::{
    services::ServeDir,
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use tower_sessions::{MemoryStore, SessionManagerLayer};
use tower_sessions::cookie::SameSite;
use std::sync::Arc;
use crate::config::Config;
use crate::handlers;
use crate::middleware;
use crate::services::{AccountStore, CatalogStore, ContainerHost, FileBrowserBridge, ResourceMonitor};
use crate::worker::InstallManager;

/// Everything the handlers share
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: AccountStore,
    pub host: ContainerHost,
    pub catalog: Arc<CatalogStore>,
    pub installs: InstallManager,
    pub bridge: Arc<FileBrowserBridge>,
    pub monitor: Arc<ResourceMonitor>,
    /// Client for the file manager proxy; never follows redirects
    pub proxy: reqwest::Client,
}

pub fn proxy_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

pub fn build_router(state: AppState) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_name("session");

    let max_upload = state.config.server.max_upload_size;
    let assets_dir = state.config.assets.dir.clone();

    let console = Router::new()
        // Auth routes
        .route("/", get(handlers::serve_login_page))
        .route("/login", post(handlers::handle_login))
        .route("/register", post(handlers::handle_register))
        .route("/logout", get(handlers::handle_logout))
        .route(
            "/change_password",
            get(handlers::serve_change_password).post(handlers::handle_change_password),
        )

        // Pages
        .route("/dashboard", get(handlers::serve_dashboard))
        .route("/appstore", get(handlers::serve_appstore))
        .route("/users", get(handlers::serve_users_page))

        // Containers and images
        .route("/api/containers", get(handlers::list_containers))
        .route("/api/images", get(handlers::list_images))
        .route("/start/:cid", get(handlers::start_container))
        .route("/stop/:cid", get(handlers::stop_container))
        .route("/restart/:cid", get(handlers::restart_container))
        .route("/logs/:cid", get(handlers::container_logs))
        .route("/remove/:cid", get(handlers::remove_container))
        .route("/pull_image", post(handlers::pull_image))
        .route("/remove_image/:iid", get(handlers::remove_image))

        // User management
        .route("/set_admin/:uid", get(handlers::set_admin))
        .route("/unset_admin/:uid", get(handlers::unset_admin))
        .route("/delete_user/:username", post(handlers::delete_user))
        .route("/check_last_user", get(handlers::check_last_user))

        // App store and installs
        .route("/api/get_apps", get(handlers::get_apps))
        .route("/api/add_app", post(handlers::add_app))
        .route("/api/update_app", post(handlers::update_app))
        .route("/api/delete_app", post(handlers::delete_app))
        .route("/api/install_app", post(handlers::install_app))
        .route("/api/install_progress", get(handlers::install_progress))
        .route("/api/install_tasks/:task_id", get(handlers::install_task))
        .route("/api/install_tasks/:task_id/cancel", post(handlers::cancel_install))

        // Wallpapers and host resources
        .route("/api/wallpaper_list", get(handlers::wallpaper_list))
        .route("/api/set_wallpaper", post(handlers::set_wallpaper))
        .route("/api/upload_wallpaper", post(handlers::upload_wallpaper))
        .route("/api/resource", get(handlers::resource_usage))

        // Own static files
        .nest_service("/assets", ServeDir::new(assets_dir))

        // Upload limits from config
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload));

    // File manager companion; uploads pass through uncapped
    let companion = Router::new()
        .route("/filemanager", get(handlers::filemanager_root))
        .route("/filemanager/", any(handlers::proxy_filemanager))
        .route("/filemanager/*path", any(handlers::proxy_filemanager))
        .route("/static/*path", any(handlers::proxy_static));

    console
        .merge(companion)
        .layer(from_fn_with_state(state.clone(), middleware::require_auth))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
