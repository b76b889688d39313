// src/events/mod.rs

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::Result;

/// A recorded happening between a character and (usually) a user: a gift,
/// a milestone. `data` is a self-describing blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub character_id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub data: Option<Value>,
    pub created_at: DateTime<Utc>,
}

pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        character_id: &Uuid,
        user_id: Option<&Uuid>,
        event_type: &str,
        data: Value,
    ) -> Result<Event> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, character_id, user_id, event_type, data).await
    }

    /// Insert inside a caller-owned transaction.
    pub async fn insert(
        conn: &mut SqliteConnection,
        character_id: &Uuid,
        user_id: Option<&Uuid>,
        event_type: &str,
        data: Value,
    ) -> Result<Event> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO events (id, character_id, user_id, event_type, data, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(character_id.to_string())
        .bind(user_id.map(|u| u.to_string()))
        .bind(event_type)
        .bind(data.to_string())
        .bind(now.naive_utc())
        .execute(conn)
        .await?;

        Ok(Event {
            id,
            character_id: *character_id,
            user_id: user_id.copied(),
            event_type: event_type.to_string(),
            data: Some(data),
            created_at: now,
        })
    }

    /// Most recent gift-flavoured events for a pair. Historical rows carry
    /// either `gift` or `gift_received`, so the filter is a prefix match.
    pub async fn recent_gifts(
        &self,
        character_id: &Uuid,
        user_id: &Uuid,
        n: usize,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT id, character_id, user_id, event_type, data, created_at
            FROM events
            WHERE CAST(character_id AS TEXT) = ?
              AND (CAST(user_id AS TEXT) = ? OR user_id IS NULL)
              AND event_type LIKE 'gift%'
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::event_from_row).collect())
    }

    pub async fn by_type(
        &self,
        character_id: &Uuid,
        event_type: &str,
        n: usize,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT id, character_id, user_id, event_type, data, created_at
            FROM events
            WHERE CAST(character_id AS TEXT) = ? AND event_type = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(character_id.to_string())
        .bind(event_type)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::event_from_row).collect())
    }

    fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> Event {
        let id: String = row.get("id");
        let character_id: String = row.get("character_id");
        let user_id: Option<String> = row.get("user_id");
        let data: Option<String> = row.get("data");
        let created_at: NaiveDateTime = row.get("created_at");

        Event {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            character_id: Uuid::parse_str(&character_id).unwrap_or_default(),
            user_id: user_id.and_then(|u| Uuid::parse_str(&u).ok()),
            event_type: row.get("event_type"),
            data: data.and_then(|d| serde_json::from_str(&d).ok()),
            created_at: Utc.from_utc_datetime(&created_at),
        }
    }
}
