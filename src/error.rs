// src/error.rs

use std::time::Duration;
use thiserror::Error;

/// Error taxonomy surfaced at the boundary.
///
/// Schema drift is deliberately absent: a query that cannot be satisfied
/// against the observed columns falls back to a reduced query inside the
/// store and logs a warning instead of failing the request.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("upstream timeout after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("context overflow: fixed blocks need ~{required} tokens, budget is {budget}")]
    ContextOverflow { required: usize, budget: usize },

    #[error("insufficient messages: {count} active, need at least {minimum}")]
    InsufficientMessages { count: usize, minimum: usize },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
