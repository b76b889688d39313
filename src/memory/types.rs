// src/memory/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_MEMORY_TYPE: &str = "unknown";
pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_IMPORTANCE: i64 = 5;

/// A single typed fact a character knows about a user.
///
/// `memory_type` and `category` are never null on read: legacy rows that
/// carry only the old `type` column (or neither) coalesce to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub character_id: Uuid,
    pub user_id: Uuid,
    pub memory_type: String,
    pub category: String,
    pub content: String,
    pub importance: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A candidate fact on its way into the store, either lifted from the
/// oracle's structured memory block or recovered by the pattern pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCandidate {
    #[serde(rename = "type", default)]
    pub memory_type: String,
    #[serde(default)]
    pub category: String,
    pub content: String,
    #[serde(default = "default_importance")]
    pub importance: i64,
}

fn default_importance() -> i64 {
    DEFAULT_IMPORTANCE
}

impl MemoryCandidate {
    pub fn new(memory_type: &str, category: &str, content: String, importance: i64) -> Self {
        Self {
            memory_type: memory_type.to_string(),
            category: category.to_string(),
            content,
            importance,
        }
    }
}

/// Clamp importance into the valid 1..=10 range.
pub fn clamp_importance(importance: i64) -> i64 {
    importance.clamp(1, 10)
}
