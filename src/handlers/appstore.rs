use axum::{
    extract::{Json, Path, State},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;
use uuid::Uuid;
use crate::app::AppState;
use crate::errors::{AppError, AppResult, InstallError};
use crate::middleware::{current_user, require_admin};
use crate::models::{AppCatalogEntry, AppPatch, InstallRequest, InstallStage, InstallTaskInfo};

#[derive(Debug, Deserialize)]
pub struct DeleteAppRequest {
    #[serde(default)]
    pub name: String,
}

pub async fn get_apps(State(state): State<AppState>) -> AppResult<Response> {
    let installed = state.host.installed_names().await.unwrap_or_else(|e| {
        tracing::error!("Cannot read installed apps: {}", e);
        Vec::new()
    });
    let apps = state.catalog.list_with_installed(&installed).await?;
    Ok(Json(json!({ "status": "success", "apps": apps })).into_response())
}

pub async fn add_app(
    State(state): State<AppState>,
    session: Session,
    Json(entry): Json<AppCatalogEntry>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    let name = entry.name.clone();
    state.catalog.add(entry).await?;
    tracing::info!("Admin {} added app {}", admin.username, name);
    Ok(Json(json!({ "status": "success", "message": "App added" })).into_response())
}

pub async fn update_app(
    State(state): State<AppState>,
    session: Session,
    Json(patch): Json<AppPatch>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    let updated = state.catalog.update(patch).await?;
    tracing::info!("Admin {} updated app {}", admin.username, updated.name);
    Ok(Json(json!({ "status": "success", "message": "App updated", "app": updated })).into_response())
}

pub async fn delete_app(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<DeleteAppRequest>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    state.catalog.delete(&request.name).await?;
    tracing::info!("Admin {} deleted app {}", admin.username, request.name);
    Ok(Json(json!({ "status": "success", "message": "App deleted" })).into_response())
}

pub async fn install_app(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<InstallRequest>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    if request.name.trim().is_empty() || request.image.trim().is_empty() {
        return Err(AppError::Validation("name and image are required".into()));
    }

    let task_id = state.installs.enqueue(admin.id, request).await;
    Ok(Json(json!({ "status": "ok", "task_id": task_id })).into_response())
}

fn progress_body(info: &InstallTaskInfo) -> serde_json::Value {
    json!({
        "progress": info.stage.progress(),
        "stage": info.stage.name(),
        "task_id": info.task_id,
        "app": info.app_name,
        "error": match &info.stage {
            InstallStage::Failed { reason } => Some(reason.as_str()),
            _ => None,
        },
    })
}

/// Progress of the caller's most recent install
pub async fn install_progress(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Response> {
    let user = current_user(&session).await?;
    let body = match state.installs.latest_for_user(user.id).await {
        Some(info) => progress_body(&info),
        None => json!({ "progress": 0 }),
    };
    Ok(Json(body).into_response())
}

pub async fn install_task(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> AppResult<Response> {
    let info = state
        .installs
        .task(task_id)
        .await
        .ok_or_else(|| InstallError::TaskNotFound(task_id.to_string()))?;
    Ok(Json(progress_body(&info)).into_response())
}

pub async fn cancel_install(
    State(state): State<AppState>,
    session: Session,
    Path(task_id): Path<Uuid>,
) -> AppResult<Response> {
    let admin = require_admin(&state, &session).await?;
    let info = state.installs.cancel(task_id).await?;
    tracing::info!("Admin {} cancelled install {}", admin.username, task_id);
    Ok(Json(progress_body(&info)).into_response())
}
