use axum::{
    extract::{Form, Path, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Json, Response},
};
use serde_json::json;
use tower_sessions::Session;
use crate::app::AppState;
use crate::errors::AppResult;
use crate::middleware::{current_user, require_admin};
use crate::models::{OpOutcome, PullImageForm};
use super::{escape_html, is_xhr, load_template, outcome_response};

pub async fn list_containers(State(state): State<AppState>) -> AppResult<Response> {
    let containers = state.host.list_containers(true).await?;
    Ok(Json(containers).into_response())
}

pub async fn list_images(State(state): State<AppState>) -> AppResult<Response> {
    let images = state.host.list_images().await?;
    Ok(Json(images).into_response())
}

pub async fn start_container(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Path(cid): Path<String>,
) -> AppResult<Response> {
    let user = current_user(&session).await?;
    tracing::info!("{} starting container {}", user.username, cid);
    let outcome = state.host.start(&cid).await;
    Ok(outcome_response(&headers, outcome, "/dashboard"))
}

pub async fn stop_container(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Path(cid): Path<String>,
) -> AppResult<Response> {
    let user = current_user(&session).await?;
    tracing::info!("{} stopping container {}", user.username, cid);
    let outcome = state.host.stop(&cid).await;
    Ok(outcome_response(&headers, outcome, "/dashboard"))
}

pub async fn restart_container(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Path(cid): Path<String>,
) -> AppResult<Response> {
    let user = current_user(&session).await?;
    tracing::info!("{} restarting container {}", user.username, cid);
    let outcome = state.host.restart(&cid).await;
    Ok(outcome_response(&headers, outcome, "/dashboard"))
}

pub async fn container_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(cid): Path<String>,
) -> AppResult<Response> {
    let logs = match state.host.container_logs(&cid).await {
        Ok(logs) => logs,
        Err(e) => {
            tracing::error!("Failed to read logs of {}: {}", cid, e);
            let outcome = OpOutcome::failure(format!("Failed to read logs: {}", e));
            return Ok(outcome_response(&headers, outcome, "/dashboard"));
        }
    };

    if is_xhr(&headers) {
        return Ok(Json(json!({ "status": "ok", "logs": logs })).into_response());
    }
    let html = load_template(&state, "logs.html")?
        .replace("{{container}}", &escape_html(&cid))
        .replace("{{logs}}", &escape_html(&logs));
    Ok(Html(html).into_response())
}

pub async fn remove_container(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Path(cid): Path<String>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    tracing::info!("{} removing container {}", admin.username, cid);
    // Forced, so running containers go too
    let outcome = state.host.remove(&cid, true).await;
    Ok(outcome_response(&headers, outcome, "/dashboard"))
}

pub async fn pull_image(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Form(form): Form<PullImageForm>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    let image = form.image.trim();
    if image.is_empty() {
        return Ok(outcome_response(&headers, OpOutcome::failure("Image name is required"), "/dashboard"));
    }

    tracing::info!("{} pulling image {}", admin.username, image);
    let outcome = state.host.pull_image(image).await;
    Ok(outcome_response(&headers, outcome, "/dashboard"))
}

pub async fn remove_image(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    Path(iid): Path<String>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    tracing::info!("{} removing image {}", admin.username, iid);
    let outcome = state.host.remove_image(&iid).await;
    Ok(outcome_response(&headers, outcome, "/dashboard"))
}
