use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
    #[error("I/O failure: {0}")]
    IoFailure(String),
    #[error("Wait failure: {0}")]
    WaitFailure(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

