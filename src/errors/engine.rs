use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Cannot reach container engine: {0}")]
    Connection(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rejected by engine: {0}")]
    Rejected(String),

    #[error("Image pull failed: {0}")]
    Pull(String),
}

impl From<bollard::errors::Error> for EngineError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError { status_code: 404, message } => {
                EngineError::NotFound(message)
            }
            bollard::errors::Error::DockerResponseServerError { status_code: 409, message } => {
                EngineError::Conflict(message)
            }
            bollard::errors::Error::DockerResponseServerError { message, .. } => {
                EngineError::Rejected(message)
            }
            other => EngineError::Connection(other.to_string()),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
