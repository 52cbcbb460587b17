use axum::{
    extract::{Json, Multipart, State},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::path::{Path, PathBuf};
use tower_sessions::Session;
use uuid::Uuid;
use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::middleware::current_user;
use crate::models::WallpaperRequest;

const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];
const MAX_WALLPAPER_BYTES: usize = 5 * 1024 * 1024;

fn wallpaper_dir(state: &AppState) -> PathBuf {
    Path::new(&state.config.assets.dir).join("wallpapers")
}

fn has_image_extension(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Replaces anything outside `[A-Za-z0-9.-]` with `_`. Path components
/// and leading dots are dropped.
fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

async fn list_wallpapers(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot read wallpaper directory {}: {}", dir.display(), e);
            return names;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Some(name) = entry.file_name().to_str() {
            if has_image_extension(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    names
}

pub async fn wallpaper_list(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Response> {
    let user = current_user(&session).await?;
    let wallpapers = list_wallpapers(&wallpaper_dir(&state)).await;

    // A stored choice whose file is gone falls back to the first one
    let id = user.id;
    let current = match state.accounts.call(move |s| s.wallpaper(id)).await? {
        Some(name) if wallpapers.contains(&name) => Some(name),
        Some(_) => wallpapers.first().cloned(),
        None => None,
    };
    Ok(Json(json!({ "wallpapers": wallpapers, "current": current })).into_response())
}

pub async fn set_wallpaper(
    State(state): State<AppState>,
    session: Session,
    Json(request): Json<WallpaperRequest>,
) -> AppResult<Response> {
    let user = current_user(&session).await?;
    let name = request.wallpaper.unwrap_or_default();

    let valid = !name.is_empty()
        && sanitize_filename(&name) == name
        && wallpaper_dir(&state).join(&name).is_file();
    if !valid {
        return Err(AppError::Validation("Invalid wallpaper file".into()));
    }

    let (id, chosen) = (user.id, name.clone());
    state.accounts.call(move |s| s.set_wallpaper(id, Some(&chosen))).await?;
    tracing::info!("{} set wallpaper {}", user.username, name);
    Ok(Json(json!({ "status": "success", "message": "Wallpaper set" })).into_response())
}

pub async fn upload_wallpaper(
    State(state): State<AppState>,
    session: Session,
    mut multipart: Multipart,
) -> AppResult<Response> {
    let user = current_user(&session).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Upload(format!("Error reading upload: {}", e)))?
    {
        if field.name() != Some("wallpaper") {
            continue;
        }

        let filename = sanitize_filename(field.file_name().unwrap_or_default());
        if filename.is_empty() {
            return Err(AppError::Upload("No file selected".into()));
        }
        if !has_image_extension(&filename) {
            return Err(AppError::Upload("Unsupported file type, use PNG, JPG, JPEG or GIF".into()));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::Upload(format!("Error reading upload: {}", e)))?;
        if data.len() > MAX_WALLPAPER_BYTES {
            return Err(AppError::Upload("File must not exceed 5MB".into()));
        }

        let dir = wallpaper_dir(&state);
        tokio::fs::create_dir_all(&dir).await?;
        let stored = format!("{}_{}", &Uuid::new_v4().simple().to_string()[..8], filename);
        tokio::fs::write(dir.join(&stored), &data).await?;

        tracing::info!("{} uploaded wallpaper {}", user.username, stored);
        return Ok(Json(json!({
            "status": "success",
            "message": "Wallpaper uploaded",
            "filename": stored,
        }))
        .into_response());
    }

    Err(AppError::Upload("No file uploaded".into()))
}
