//! Error types for feed operations.

use thiserror::Error;

/// Errors that can occur while driving a venue connection.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("failed to parse message: {0}")]
    Parse(String),

    #[error("subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("channel closed")]
    ChannelClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::ConnectionFailed(err.to_string())
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedError::Timeout(err.to_string())
        } else {
            FeedError::ConnectionFailed(err.to_string())
        }
    }
}

impl FeedError {
    /// True if the supervisor should handle this locally via reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FeedError::ConnectionFailed(_)
                | FeedError::Disconnected(_)
                | FeedError::Timeout(_)
                | FeedError::SubscriptionFailed(_)
        )
    }

    /// True if retrying cannot help and the supervisor must terminate.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FeedError::AuthenticationFailed(_) | FeedError::ChannelClosed
        )
    }
}
