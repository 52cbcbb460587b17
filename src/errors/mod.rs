// Error types shared by the handlers, stores and background workers.
use thiserror::Error;

pub mod response;
pub mod worker;
pub mod engine;
pub mod store;
pub mod bridge;

pub use worker::InstallError;
pub use engine::{EngineError, EngineResult};
pub use store::{StoreError, StoreResult, CatalogError, CatalogResult};
pub use bridge::{BridgeError, BridgeResult};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Session error: {0}")]
    Session(#[from] tower_sessions::session::Error),

    #[error("Account store error: {0}")]
    Store(#[from] StoreError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Install error: {0}")]
    Install(#[from] InstallError),

    #[error("File error: {0}")]
    File(#[from] std::io::Error),

    #[error("Password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Background task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),

    #[error("Upload error: {0}")]
    Upload(String),
}

// Custom result type
pub type AppResult<T> = Result<T, AppError>;
