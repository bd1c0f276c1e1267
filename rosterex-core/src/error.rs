use thiserror::Error;
use uuid::Uuid;

/// Fatal scrape failures. Everything else is absorbed by the session layer
/// (reconnect, requeue, recycle) and never reaches the caller.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("target guild unavailable: {0}")]
    NoTargetGuild(String),
}

/// Session-internal failure modes.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),

    /// Cooperative cancellation observed; the session unwound without
    /// reconnecting. Folded into partial success by the coordinator.
    #[error("session cancelled")]
    Cancelled,
}

/// Stream manager failures, returned as values across the streaming boundary.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("spool failed: {0}")]
    SpoolFailed(#[from] std::io::Error),

    #[error("stream not found: {0}")]
    StreamNotFound(Uuid),

    #[error("stream expired: {0}")]
    StreamExpired(Uuid),
}
