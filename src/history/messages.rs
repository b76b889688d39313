// src/history/messages.rs
//! Boundary projection of conversation turns, kept alongside the positional
//! log for external collaborators that read the classic messages table.

use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::error::Result;
use crate::history::types::{Message, Participant};

pub struct MessageStore {
    pool: SqlitePool,
}

pub struct NewMessage<'a> {
    pub sender_id: &'a Uuid,
    pub sender_type: Participant,
    pub recipient_id: &'a Uuid,
    pub recipient_type: Participant,
    pub content: &'a str,
    pub emotion: Option<&'a str>,
    pub is_gift: bool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, message: NewMessage<'_>) -> Result<Message> {
        let mut conn = self.pool.acquire().await?;
        Self::insert(&mut conn, message).await
    }

    /// Insert inside a caller-owned transaction.
    pub async fn insert(conn: &mut SqliteConnection, message: NewMessage<'_>) -> Result<Message> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO messages (
                id, sender_id, sender_type, recipient_id, recipient_type,
                content, emotion, is_gift, is_read, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, FALSE, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(message.sender_id.to_string())
        .bind(message.sender_type.as_str())
        .bind(message.recipient_id.to_string())
        .bind(message.recipient_type.as_str())
        .bind(message.content)
        .bind(message.emotion)
        .bind(message.is_gift)
        .bind(now.naive_utc())
        .execute(conn)
        .await?;

        Ok(Message {
            id,
            sender_id: *message.sender_id,
            sender_type: message.sender_type,
            recipient_id: *message.recipient_id,
            recipient_type: message.recipient_type,
            content: message.content.to_string(),
            emotion: message.emotion.map(|e| e.to_string()),
            is_gift: message.is_gift,
            is_read: false,
            created_at: now,
        })
    }

    /// Remove every message between a pair, both directions. Returns how
    /// many rows were deleted.
    pub async fn delete_between(&self, character_id: &Uuid, user_id: &Uuid) -> Result<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM messages
            WHERE (CAST(sender_id AS TEXT) = ?1 AND CAST(recipient_id AS TEXT) = ?2)
               OR (CAST(sender_id AS TEXT) = ?2 AND CAST(recipient_id AS TEXT) = ?1)
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    pub async fn recent_between(
        &self,
        character_id: &Uuid,
        user_id: &Uuid,
        n: usize,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT id, sender_id, sender_type, recipient_id, recipient_type,
                       content, emotion, is_gift, is_read, created_at
                FROM messages
                WHERE (CAST(sender_id AS TEXT) = ?1 AND CAST(recipient_id AS TEXT) = ?2)
                   OR (CAST(sender_id AS TEXT) = ?2 AND CAST(recipient_id AS TEXT) = ?1)
                ORDER BY created_at DESC
                LIMIT ?3
            ) ORDER BY created_at ASC
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::message_from_row).collect())
    }

    fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> Message {
        let id: String = row.get("id");
        let sender_id: String = row.get("sender_id");
        let recipient_id: String = row.get("recipient_id");
        let sender_type: String = row.get("sender_type");
        let recipient_type: String = row.get("recipient_type");
        let created_at: NaiveDateTime = row.get("created_at");

        let parse_participant = |raw: &str| {
            if raw == "character" { Participant::Character } else { Participant::User }
        };

        Message {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            sender_id: Uuid::parse_str(&sender_id).unwrap_or_default(),
            sender_type: parse_participant(&sender_type),
            recipient_id: Uuid::parse_str(&recipient_id).unwrap_or_default(),
            recipient_type: parse_participant(&recipient_type),
            content: row.get("content"),
            emotion: row.get("emotion"),
            is_gift: row.get("is_gift"),
            is_read: row.get("is_read"),
            created_at: Utc.from_utc_datetime(&created_at),
        }
    }
}
