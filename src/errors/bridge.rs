use thiserror::Error;
use super::EngineError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("File manager bridge is disabled")]
    Disabled,

    #[error("Container {name} not running after {seconds} seconds")]
    NotRunning { name: String, seconds: u64 },

    #[error("Login as {0} was rejected")]
    LoginRejected(String),

    #[error("Unexpected response {status} from {endpoint}")]
    UnexpectedStatus { endpoint: String, status: u16 },

    #[error("Credential rotation failed: {0}")]
    Rotation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
