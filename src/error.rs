//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("ingest error: {0}")]
    Ingest(String),

    #[error("comms error: {0}")]
    Comms(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
