//! Error taxonomy for the engine. Transport/parse/connection errors are
//! absorbed inside adapters and never reach these types; these cover the
//! paths that the supervisor or a caller needs to observe.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

#[derive(Debug, Error)]
pub enum VenueError {
    #[error("websocket connection failed: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connect timeout")]
    Timeout,

    #[error("failed to build request: {0}")]
    Request(String),

    #[error("auth signing failed: {0}")]
    Auth(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("venue rejected order: {0}")]
    Rejected(String),

    #[error("placement transport error: {0}")]
    Transport(String),
}
