use axum::{
    extract::{Query, State},
    response::{Html, IntoResponse, Response},
};
use std::collections::HashMap;
use tower_sessions::Session;
use crate::app::AppState;
use crate::errors::AppResult;
use crate::middleware::current_account;
use crate::models::{ContainerSummary, ImageSummary};
use super::{escape_html, load_template};

fn container_rows(containers: &[ContainerSummary], is_admin: bool) -> String {
    containers
        .iter()
        .map(|c| {
            let id = escape_html(&c.id);
            let link = match &c.web_url {
                Some(url) => format!(r#"<a href="{0}" target="_blank">{0}</a>"#, escape_html(url)),
                None => "-".to_string(),
            };
            let remove = if is_admin {
                format!(r#"<a href="/remove/{}" class="delete-btn" data-confirm="remove">Remove</a>"#, id)
            } else {
                String::new()
            };
            format!(
                r#"<tr>
                <td>{}</td>
                <td>{}</td>
                <td class="state-{}">{}</td>
                <td>{}</td>
                <td class="action-cell">
                    <a href="/start/{}">Start</a>
                    <a href="/stop/{}">Stop</a>
                    <a href="/restart/{}">Restart</a>
                    <a href="/logs/{}">Logs</a>
                    {}
                </td>
            </tr>"#,
                escape_html(&c.name),
                escape_html(&c.image),
                escape_html(&c.state),
                escape_html(&c.status),
                link,
                id,
                id,
                id,
                id,
                remove
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn image_rows(images: &[ImageSummary], is_admin: bool) -> String {
    images
        .iter()
        .map(|img| {
            let tags = if img.tags.is_empty() {
                "&lt;none&gt;".to_string()
            } else {
                escape_html(&img.tags.join(", "))
            };
            let remove = if is_admin {
                format!(r#"<a href="/remove_image/{}" class="delete-btn">Remove</a>"#, escape_html(&img.id))
            } else {
                String::new()
            };
            format!(
                "<tr><td>{}</td><td>{:.1} MB</td><td class=\"action-cell\">{}</td></tr>",
                tags,
                img.size as f64 / 1_000_000.0,
                remove
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub async fn serve_dashboard(
    State(state): State<AppState>,
    session: Session,
    Query(params): Query<HashMap<String, String>>,
) -> AppResult<Response> {
    let account = current_account(&state, &session).await?;
    tracing::info!("Rendering dashboard for {}", account.username);

    // The page still renders when the engine is unreachable
    let containers = state.host.list_containers(true).await.unwrap_or_else(|e| {
        tracing::error!("Failed to list containers: {}", e);
        Vec::new()
    });
    let images = state.host.list_images().await.unwrap_or_else(|e| {
        tracing::error!("Failed to list images: {}", e);
        Vec::new()
    });

    let msg = params.get("msg").map(String::as_str).unwrap_or_default();
    let html = load_template(&state, "index.html")?
        .replace("{{username}}", &escape_html(&account.username))
        .replace("{{is_admin}}", if account.is_admin { "true" } else { "false" })
        .replace("{{wallpaper}}", &escape_html(account.wallpaper.as_deref().unwrap_or_default()))
        .replace("{{msg}}", &escape_html(msg))
        .replace("{{containers}}", &container_rows(&containers, account.is_admin))
        .replace("{{images}}", &image_rows(&images, account.is_admin))
        .replace("{{container_count}}", &containers.len().to_string())
        .replace("{{image_count}}", &images.len().to_string());

    Ok(Html(html).into_response())
}

pub async fn serve_appstore(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Response> {
    let account = current_account(&state, &session).await?;
    let html = load_template(&state, "appstore.html")?
        .replace("{{username}}", &escape_html(&account.username))
        .replace("{{is_admin}}", if account.is_admin { "true" } else { "false" })
        .replace("{{protected_app}}", &escape_html(&state.config.catalog.protected_app));
    Ok(Html(html).into_response())
}
