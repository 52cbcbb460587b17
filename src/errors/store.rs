use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Username {0} already exists")]
    DuplicateUsername(String),

    #[error("Account {0} not found")]
    NotFound(String),

    #[error("At least one administrator must remain")]
    LastAdmin,

    #[error("The last remaining account cannot be deleted")]
    LastAccount,

    #[error("You cannot delete the account you are logged in with")]
    SelfDeletion,

    #[error("Database task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("An app named {0} already exists")]
    Duplicate(String),

    #[error("App {0} does not exist")]
    NotFound(String),

    #[error("{0} is a system app and cannot be deleted")]
    Protected(String),

    #[error("Catalog file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CatalogResult<T> = Result<T, CatalogError>;
