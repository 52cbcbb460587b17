use thiserror::Error;
use super::EngineError;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Install task {0} not found")]
    TaskNotFound(String),

    #[error("Install task {0} already finished")]
    AlreadyFinished(String),

    #[error("Install task was cancelled")]
    Cancelled,

    #[error("Worker pool closed")]
    PoolClosed,

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type InstallResult<T> = Result<T, InstallError>;
