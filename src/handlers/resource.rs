use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
};
use crate::app::AppState;

pub async fn resource_usage(State(state): State<AppState>) -> Response {
    let snapshot = state.monitor.snapshot().await;
    tracing::debug!("Resource snapshot: cpu {}%, {} disks", snapshot.cpu, snapshot.disks.len());
    Json(snapshot).into_response()
}
