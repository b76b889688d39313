// src/character/mod.rs

pub mod store;

pub use store::CharacterStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persistent AI persona: fixed sheet plus a mutable current emotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: Uuid,
    pub name: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub personality_traits: Vec<String>,
    pub interests: Vec<String>,
    pub background: Option<String>,
    pub current_emotion: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Character {
    /// Character sheet rendered for the prompt preamble.
    pub fn sheet(&self) -> String {
        let traits = if self.personality_traits.is_empty() {
            "разносторонняя".to_string()
        } else {
            self.personality_traits.join(", ")
        };
        let interests = if self.interests.is_empty() {
            "разнообразные интересы".to_string()
        } else {
            self.interests.join(", ")
        };
        let background = match self.background.as_deref() {
            Some(b) if !b.is_empty() => b.to_string(),
            _ => format!("{} - интересная личность с разносторонними увлечениями.", self.name),
        };

        let mut sheet = format!(
            "Имя: {}\nВозраст: {}\nПол: {}\nЧерты характера: {}\nИнтересы: {}\nБиография: {}",
            self.name,
            self.age.map(|a| a.to_string()).unwrap_or_else(|| "Неизвестно".to_string()),
            self.gender.as_deref().unwrap_or("female"),
            traits,
            interests,
            background,
        );
        if let Some(emotion) = self.current_emotion.as_deref() {
            if !emotion.is_empty() {
                sheet.push_str(&format!("\nТекущее настроение: {}", emotion));
            }
        }
        sheet
    }
}
