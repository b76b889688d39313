// src/character/store.rs

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::character::Character;
use crate::error::{Error, Result};

/// Read-mostly character records with a short-TTL in-process cache.
/// Memory entries and history rows are never cached; characters are.
pub struct CharacterStore {
    pool: SqlitePool,
    cache_ttl: Duration,
    cache: Mutex<HashMap<Uuid, (Character, Instant)>>,
}

impl CharacterStore {
    pub fn new(pool: SqlitePool, cache_ttl: Duration) -> Self {
        Self {
            pool,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get(&self, id: &Uuid) -> Result<Character> {
        self.fetch(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("character {}", id)))
    }

    pub async fn fetch(&self, id: &Uuid) -> Result<Option<Character>> {
        if let Some(character) = self.cached(id) {
            return Ok(Some(character));
        }

        let row = sqlx::query(
            r#"
            SELECT id, name, age, gender, personality_traits, interests,
                   background, current_emotion, created_at, updated_at
            FROM characters
            WHERE CAST(id AS TEXT) = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        let character = Self::character_from_row(&row);
        self.cache
            .lock()
            .unwrap()
            .insert(*id, (character.clone(), Instant::now()));
        Ok(Some(character))
    }

    pub async fn create(&self, character: &Character) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO characters (
                id, name, age, gender, personality_traits, interests,
                background, current_emotion, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(character.id.to_string())
        .bind(&character.name)
        .bind(character.age)
        .bind(&character.gender)
        .bind(serde_json::to_string(&character.personality_traits).unwrap_or_else(|_| "[]".into()))
        .bind(serde_json::to_string(&character.interests).unwrap_or_else(|_| "[]".into()))
        .bind(&character.background)
        .bind(&character.current_emotion)
        .bind(character.created_at.naive_utc())
        .bind(character.updated_at.naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The one mutable field on a character outside admin edits.
    pub async fn update_emotion(&self, id: &Uuid, emotion: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE characters
            SET current_emotion = ?, updated_at = ?
            WHERE CAST(id AS TEXT) = ?
            "#,
        )
        .bind(emotion)
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.cache.lock().unwrap().remove(id);
        debug!(character_id = %id, emotion, "updated character emotion");
        Ok(())
    }

    fn cached(&self, id: &Uuid) -> Option<Character> {
        let cache = self.cache.lock().unwrap();
        let (character, stored_at) = cache.get(id)?;
        if stored_at.elapsed() < self.cache_ttl {
            Some(character.clone())
        } else {
            None
        }
    }

    fn character_from_row(row: &sqlx::sqlite::SqliteRow) -> Character {
        let id: String = row.get("id");
        let traits: Option<String> = row.get("personality_traits");
        let interests: Option<String> = row.get("interests");
        let created_at: NaiveDateTime = row.get("created_at");
        let updated_at: NaiveDateTime = row.get("updated_at");

        Character {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            name: row.get("name"),
            age: row.get("age"),
            gender: row.get("gender"),
            personality_traits: parse_string_list(traits.as_deref()),
            interests: parse_string_list(interests.as_deref()),
            background: row.get("background"),
            current_emotion: row.get("current_emotion"),
            created_at: Utc.from_utc_datetime(&created_at),
            updated_at: Utc.from_utc_datetime(&updated_at),
        }
    }
}

/// Traits and interests are stored as JSON arrays, but historical rows
/// sometimes hold a bare comma-separated string.
fn parse_string_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else { return Vec::new() };
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
        return list;
    }
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_string_list_handles_json_and_plain() {
        assert_eq!(parse_string_list(Some(r#"["a","b"]"#)), vec!["a", "b"]);
        assert_eq!(parse_string_list(Some("a, b")), vec!["a", "b"]);
        assert!(parse_string_list(Some("")).is_empty());
        assert!(parse_string_list(None).is_empty());
    }
}
