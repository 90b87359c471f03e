//! Service-level errors surfaced to the embedder at startup.

use rtd_feeds::{ConfigError, RouterError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("unsupported exchange: {0}")]
    UnknownExchange(String),

    #[error("service is not running")]
    NotRunning,
}
