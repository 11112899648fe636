//! Shared domain error taxonomy.
//!
//! Most call sites return `anyhow::Result` and use `.context(...)` the way
//! the rest of this codebase does; these variants exist for the handful of
//! places a caller needs to branch on error *kind* rather than just log and
//! move on (rate-limit retry vs. hard failure, webhook validation, etc).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("endpoint '{0}' is not registered with the rate limiter")]
    UnregisteredEndpoint(String),

    #[error("request is missing a bucket identifier")]
    MissingIdentifier,

    #[error("request to '{endpoint}' was rate-limited (HTTP 429)")]
    RateLimited { endpoint: String },

    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    #[error("unknown market type in aggregator config: {0}")]
    UnknownMarketType(String),

    #[error("webhook URL does not match the expected Discord pattern")]
    InvalidWebhookUrl,

    #[error("failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}
