mod auth;
mod dashboard;
mod containers;
mod users;
mod appstore;
mod wallpaper;
mod resource;
mod proxy;

pub use auth::{
    serve_login_page, handle_login, handle_register, handle_logout, serve_change_password,
    handle_change_password,
};
pub use dashboard::{serve_dashboard, serve_appstore};
pub use containers::{
    list_containers, list_images, start_container, stop_container, restart_container,
    container_logs, remove_container, pull_image, remove_image,
};
pub use users::{serve_users_page, set_admin, unset_admin, delete_user, check_last_user};
pub use appstore::{
    get_apps, add_app, update_app, delete_app, install_app, install_progress, install_task,
    cancel_install,
};
pub use wallpaper::{wallpaper_list, set_wallpaper, upload_wallpaper};
pub use resource::resource_usage;
pub use proxy::{filemanager_root, proxy_filemanager, proxy_static};

use axum::{
    http::HeaderMap,
    response::{IntoResponse, Json, Redirect, Response},
};
use serde_json::json;
use std::path::Path;
use crate::app::AppState;
use crate::errors::{AppError, AppResult, BridgeError, BridgeResult};
use crate::models::OpOutcome;

pub(crate) fn load_template(state: &AppState, name: &str) -> AppResult<String> {
    let path = Path::new(&state.config.assets.templates_dir).join(name);
    std::fs::read_to_string(&path).map_err(|e| {
        tracing::error!("Failed to read template {}: {}", path.display(), e);
        AppError::File(e)
    })
}

pub(crate) fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn is_xhr(headers: &HeaderMap) -> bool {
    headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("XMLHttpRequest"))
        .unwrap_or(false)
}

pub(crate) fn flash_redirect(to: &str, message: &str) -> Response {
    Redirect::to(&format!("{}?msg={}", to, urlencoding::encode(message))).into_response()
}

/// JSON `{status, msg}` for scripted requests, a redirect with a flash
/// message for plain navigation.
pub(crate) fn outcome_response(headers: &HeaderMap, outcome: OpOutcome, back_to: &str) -> Response {
    if is_xhr(headers) {
        let status = if outcome.ok { "ok" } else { "error" };
        Json(json!({ "status": status, "msg": outcome.message })).into_response()
    } else {
        flash_redirect(back_to, &outcome.message)
    }
}

/// Companion calls are best effort: failures are logged, never returned
pub(crate) fn report_bridge(action: &str, result: BridgeResult<()>) {
    match result {
        Ok(()) => {}
        Err(BridgeError::Disabled) => tracing::debug!("File manager disabled, skipped {}", action),
        Err(e) => tracing::warn!("File manager {} failed: {}", action, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue, StatusCode};

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html(r#"<b a="x">'&'</b>"#), "&lt;b a=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/b&gt;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_outcome_redirect_for_navigation() {
        let resp = outcome_response(&HeaderMap::new(), OpOutcome::success("Container started"), "/dashboard");
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            resp.headers().get(header::LOCATION).unwrap(),
            "/dashboard?msg=Container%20started"
        );
    }

    #[test]
    fn test_outcome_json_for_xhr() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        assert!(is_xhr(&headers));
        let resp = outcome_response(&headers, OpOutcome::failure("boom"), "/dashboard");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
    }
}
