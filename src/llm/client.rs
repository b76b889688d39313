// src/llm/client.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::{CompletionOracle, EnvelopeMessage};

/// HTTP oracle speaking the OpenAI-compatible chat completions protocol.
#[derive(Clone)]
pub struct OracleClient {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OracleClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_key: config.oracle_api_key.clone(),
            api_base: config.oracle_base_url.trim_end_matches('/').to_string(),
            model: config.oracle_model.clone(),
        }
    }

    async fn post_completion(&self, envelope: &[EnvelopeMessage]) -> Result<String> {
        let messages: Vec<Value> = envelope
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let payload = json!({
            "model": self.model,
            "messages": messages,
            "temperature": 0.7,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::UpstreamError(format!("failed to reach oracle: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::UpstreamError(format!("oracle returned {}: {}", status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::UpstreamError(format!("unparseable oracle response: {}", e)))?;

        let text = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| Error::UpstreamError("oracle response carried no content".into()))?;

        debug!(chars = text.len(), "oracle replied");
        Ok(text.to_string())
    }
}

#[async_trait]
impl CompletionOracle for OracleClient {
    async fn complete(&self, envelope: &[EnvelopeMessage], deadline: Duration) -> Result<String> {
        match tokio::time::timeout(deadline, self.post_completion(envelope)).await {
            Ok(result) => result,
            Err(_) => Err(Error::UpstreamTimeout(deadline)),
        }
    }
}
