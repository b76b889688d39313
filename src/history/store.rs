// src/history/store.rs
//! Append-only positional log of conversation turns.
//!
//! Positions are assigned as `max(position) + 1` per pair inside the pair
//! lock, so any interleaving of appends yields a strictly increasing,
//! gapless sequence. Rows are never updated except for the active and
//! compressed flags.

use std::sync::Arc;

use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::history::locks::PairLocks;
use crate::history::types::{ChatHistoryRow, NewTurn, Role};

pub struct HistoryStore {
    pool: SqlitePool,
    locks: Arc<PairLocks>,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool, locks: Arc<PairLocks>) -> Self {
        Self { pool, locks }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn locks(&self) -> &Arc<PairLocks> {
        &self.locks
    }

    /// Append one turn. Takes the pair lock for the position-assignment
    /// critical section.
    pub async fn append(
        &self,
        character_id: &Uuid,
        user_id: &Uuid,
        turn: NewTurn,
    ) -> Result<ChatHistoryRow> {
        let rows = self.append_batch(character_id, user_id, vec![turn]).await?;
        Ok(rows.into_iter().next().expect("append_batch returns one row per turn"))
    }

    /// Append several turns atomically at consecutive positions.
    pub async fn append_batch(
        &self,
        character_id: &Uuid,
        user_id: &Uuid,
        turns: Vec<NewTurn>,
    ) -> Result<Vec<ChatHistoryRow>> {
        let lock = self.locks.for_pair(character_id, user_id);
        let _guard = lock.lock().await;

        let mut tx = self.pool.begin().await?;
        let mut position = Self::max_position(&mut tx, character_id, user_id).await?;
        let mut rows = Vec::with_capacity(turns.len());
        for turn in turns {
            position += 1;
            rows.push(Self::insert_turn(&mut tx, character_id, user_id, &turn, position).await?);
        }
        tx.commit().await?;
        Ok(rows)
    }

    /// Current `max(position)` for a pair. Callers composing a larger
    /// transaction must hold the pair lock.
    pub async fn max_position(
        conn: &mut SqliteConnection,
        character_id: &Uuid,
        user_id: &Uuid,
    ) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(position), 0) AS p FROM chat_history
            WHERE CAST(character_id AS TEXT) = ? AND CAST(user_id AS TEXT) = ?
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .fetch_one(conn)
        .await?;
        Ok(row.get("p"))
    }

    /// Insert a turn at an explicit position inside a caller-owned
    /// transaction.
    pub async fn insert_turn(
        conn: &mut SqliteConnection,
        character_id: &Uuid,
        user_id: &Uuid,
        turn: &NewTurn,
        position: i64,
    ) -> Result<ChatHistoryRow> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let metadata = turn.metadata.as_ref().map(|m| m.to_string());

        sqlx::query(
            r#"
            INSERT INTO chat_history (
                id, character_id, user_id, role, content, metadata,
                position, is_active, compressed, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, TRUE, FALSE, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(metadata)
        .bind(position)
        .bind(now.naive_utc())
        .execute(conn)
        .await?;

        debug!(position, role = turn.role.as_str(), "appended history row");
        Ok(ChatHistoryRow {
            id,
            character_id: *character_id,
            user_id: *user_id,
            role: turn.role,
            content: turn.content.clone(),
            metadata: turn.metadata.clone(),
            position,
            is_active: true,
            compressed: false,
            created_at: now,
        })
    }

    /// Last `n` active rows in position order.
    pub async fn fetch_recent(
        &self,
        character_id: &Uuid,
        user_id: &Uuid,
        n: usize,
    ) -> Result<Vec<ChatHistoryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM (
                SELECT id, character_id, user_id, role, content, metadata,
                       position, is_active, compressed, created_at
                FROM chat_history
                WHERE CAST(character_id AS TEXT) = ? AND CAST(user_id AS TEXT) = ? AND is_active
                ORDER BY position DESC
                LIMIT ?
            ) ORDER BY position ASC
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_from_sqlite).collect())
    }

    /// Oldest contiguous block of active rows, up to `size`, position order.
    pub async fn oldest_active_block(
        &self,
        character_id: &Uuid,
        user_id: &Uuid,
        size: usize,
    ) -> Result<Vec<ChatHistoryRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, character_id, user_id, role, content, metadata,
                   position, is_active, compressed, created_at
            FROM chat_history
            WHERE CAST(character_id AS TEXT) = ? AND CAST(user_id AS TEXT) = ? AND is_active
            ORDER BY position ASC
            LIMIT ?
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .bind(size as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::row_from_sqlite).collect())
    }

    pub async fn count_active(&self, character_id: &Uuid, user_id: &Uuid) -> Result<usize> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM chat_history
            WHERE CAST(character_id AS TEXT) = ? AND CAST(user_id AS TEXT) = ? AND is_active
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("n") as usize)
    }

    /// Flip rows inactive inside a caller-owned transaction. Compression
    /// engine only.
    pub async fn mark_inactive(
        conn: &mut SqliteConnection,
        ids: &[Uuid],
        compressed: bool,
    ) -> Result<()> {
        for id in ids {
            sqlx::query(
                r#"
                UPDATE chat_history SET is_active = FALSE, compressed = ?
                WHERE CAST(id AS TEXT) = ?
                "#,
            )
            .bind(compressed)
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Deactivate every active row for a pair; returns how many were hit.
    pub async fn deactivate_all(&self, character_id: &Uuid, user_id: &Uuid) -> Result<usize> {
        let result = sqlx::query(
            r#"
            UPDATE chat_history SET is_active = FALSE
            WHERE CAST(character_id AS TEXT) = ? AND CAST(user_id AS TEXT) = ? AND is_active
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Pairs whose active row count exceeds the threshold; feeds the
    /// background compression sweep.
    pub async fn pairs_over_threshold(&self, threshold: usize) -> Result<Vec<(Uuid, Uuid)>> {
        let rows = sqlx::query(
            r#"
            SELECT character_id, user_id, COUNT(*) AS n FROM chat_history
            WHERE is_active
            GROUP BY character_id, user_id
            HAVING n > ?
            "#,
        )
        .bind(threshold as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let c: String = row.get("character_id");
                let u: String = row.get("user_id");
                Some((Uuid::parse_str(&c).ok()?, Uuid::parse_str(&u).ok()?))
            })
            .collect())
    }

    fn row_from_sqlite(row: &sqlx::sqlite::SqliteRow) -> ChatHistoryRow {
        let id: String = row.get("id");
        let character_id: String = row.get("character_id");
        let user_id: String = row.get("user_id");
        let role: String = row.get("role");
        let metadata: Option<String> = row.get("metadata");
        let created_at: NaiveDateTime = row.get("created_at");

        ChatHistoryRow {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            character_id: Uuid::parse_str(&character_id).unwrap_or_default(),
            user_id: Uuid::parse_str(&user_id).unwrap_or_default(),
            role: Role::parse(&role),
            content: row.get("content"),
            metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
            position: row.get("position"),
            is_active: row.get("is_active"),
            compressed: row.get("compressed"),
            created_at: Utc.from_utc_datetime(&created_at),
        }
    }
}
