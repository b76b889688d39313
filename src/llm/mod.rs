// src/llm/mod.rs
//! The completion oracle boundary: an opaque text-in/text-out collaborator.

pub mod client;
pub mod response;

pub use client::OracleClient;
pub use response::OracleReply;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One block of the prompt envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMessage {
    pub role: String,
    pub content: String,
}

impl EnvelopeMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Stateless completion oracle. Implementations must return the raw reply
/// text within the deadline or fail with `UpstreamTimeout` /
/// `UpstreamError`; parsing is the caller's concern.
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    async fn complete(&self, envelope: &[EnvelopeMessage], deadline: Duration) -> Result<String>;
}
