use axum::{
    response::{IntoResponse, Response, Redirect, Json},
    http::StatusCode,
};
use serde_json::json;
use urlencoding;
use crate::errors::{
    AppError,
    store::{StoreError, CatalogError},
    worker::InstallError,
};

// The IntoResponse trait implementation converts AppError into a well-formed HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            // Authentication errors redirect to login
            AppError::Auth(msg) => {
                Redirect::to(&format!("/?error={}", urlencoding::encode(&msg)))
                    .into_response()
            }

            AppError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, &msg),

            AppError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, &msg),

            AppError::Upload(msg) => json_error(StatusCode::BAD_REQUEST, &msg),

            AppError::Store(err) => convert_store_error(err),

            AppError::Catalog(err) => convert_catalog_error(err),

            AppError::Install(err) => convert_install_error(err),

            AppError::Engine(err) => {
                tracing::error!("Unhandled engine error: {}", err);
                json_error(StatusCode::BAD_GATEWAY, &format!("Container engine error: {}", err))
            }

            // Infrastructure errors are logged and reported generically
            AppError::Session(e) => {
                tracing::error!("Session error: {}", e);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
            AppError::File(e) => {
                tracing::error!("File error: {}", e);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
            AppError::Hash(e) => {
                tracing::error!("Password hashing error: {}", e);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
            AppError::Blocking(e) => {
                tracing::error!("Background task failed: {}", e);
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
        }
    }
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": "error", "message": message }))).into_response()
}

fn convert_store_error(err: StoreError) -> Response {
    match err {
        StoreError::Sqlite(_) | StoreError::Blocking(_) => {
            tracing::error!("Database error: {}", err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
        StoreError::NotFound(_) => json_error(StatusCode::NOT_FOUND, &err.to_string()),
        StoreError::DuplicateUsername(_) => json_error(StatusCode::CONFLICT, &err.to_string()),
        StoreError::LastAdmin | StoreError::LastAccount | StoreError::SelfDeletion => {
            json_error(StatusCode::BAD_REQUEST, &err.to_string())
        }
    }
}

fn convert_catalog_error(err: CatalogError) -> Response {
    match err {
        CatalogError::MissingField(_) | CatalogError::Duplicate(_) => {
            json_error(StatusCode::BAD_REQUEST, &err.to_string())
        }
        CatalogError::NotFound(_) => json_error(StatusCode::NOT_FOUND, &err.to_string()),
        CatalogError::Protected(_) => json_error(StatusCode::FORBIDDEN, &err.to_string()),
        CatalogError::Io(_) | CatalogError::Json(_) => {
            tracing::error!("Catalog error: {}", err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Catalog unavailable")
        }
    }
}

fn convert_install_error(err: InstallError) -> Response {
    match err {
        InstallError::TaskNotFound(_) => json_error(StatusCode::NOT_FOUND, &err.to_string()),
        InstallError::AlreadyFinished(_) => json_error(StatusCode::CONFLICT, &err.to_string()),
        _ => {
            tracing::error!("Install error: {}", err);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
        }
    }
}
