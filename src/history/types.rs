// src/history/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// One turn in a per-(character, user) conversation log. Compressed
/// summaries share the schema; their metadata carries
/// `{"summary": true, "covers": [lo, hi]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatHistoryRow {
    pub id: Uuid,
    pub character_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub content: String,
    pub metadata: Option<Value>,
    pub position: i64,
    pub is_active: bool,
    pub compressed: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatHistoryRow {
    pub fn is_summary(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("summary"))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// `[lo, hi]` of the positions a summary row replaced.
    pub fn covers(&self) -> Option<(i64, i64)> {
        let covers = self.metadata.as_ref()?.get("covers")?.as_array()?;
        Some((covers.first()?.as_i64()?, covers.get(1)?.as_i64()?))
    }
}

/// A turn on its way into the log.
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub role: Role,
    pub content: String,
    pub metadata: Option<Value>,
}

impl NewTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into(), metadata: None }
    }

    pub fn with_metadata(role: Role, content: impl Into<String>, metadata: Value) -> Self {
        Self { role, content: content.into(), metadata: Some(metadata) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Participant {
    User,
    Character,
}

impl Participant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Participant::User => "user",
            Participant::Character => "character",
        }
    }
}

/// Boundary projection of a turn, exposed to external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_type: Participant,
    pub recipient_id: Uuid,
    pub recipient_type: Participant,
    pub content: String,
    pub emotion: Option<String>,
    pub is_gift: bool,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}
