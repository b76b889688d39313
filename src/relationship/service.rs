// src/relationship/service.rs

use std::sync::Arc;

use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::history::PairLocks;
use crate::relationship::{AffinityDelta, RelationshipState, Stage};

/// Maintains affinity state per (user, character).
///
/// Updates are read-modify-write under the pair lock shared with history
/// appends, so a turn that writes both cannot interleave with itself.
pub struct RelationshipTracker {
    pool: SqlitePool,
    locks: Arc<PairLocks>,
}

impl RelationshipTracker {
    pub fn new(pool: SqlitePool, locks: Arc<PairLocks>) -> Self {
        Self { pool, locks }
    }

    /// Current state, materialising the initial record on first touch.
    pub async fn get_or_init(&self, user_id: &Uuid, character_id: &Uuid) -> Result<RelationshipState> {
        if let Some(state) = self.fetch(user_id, character_id).await? {
            return Ok(state);
        }

        let state = RelationshipState::initial(*user_id, *character_id);
        sqlx::query(
            r#"
            INSERT INTO relationship_state (
                user_id, character_id, general, friendship, romance, trust, stage, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, character_id) DO NOTHING
            "#,
        )
        .bind(state.user_id.to_string())
        .bind(state.character_id.to_string())
        .bind(state.general)
        .bind(state.friendship)
        .bind(state.romance)
        .bind(state.trust)
        .bind(state.stage.as_str())
        .bind(state.updated_at.naive_utc())
        .execute(&self.pool)
        .await?;

        debug!(user_id = %user_id, character_id = %character_id, "initialised relationship state");
        Ok(state)
    }

    /// Apply a turn- or gift-derived delta. The caller holds the pair lock
    /// when the same turn also appends history; otherwise this takes it.
    pub async fn apply(
        &self,
        user_id: &Uuid,
        character_id: &Uuid,
        delta: &AffinityDelta,
        lock_held: bool,
    ) -> Result<RelationshipState> {
        if lock_held {
            return self.apply_inner(user_id, character_id, delta).await;
        }
        let lock = self.locks.for_pair(character_id, user_id);
        let _guard = lock.lock().await;
        self.apply_inner(user_id, character_id, delta).await
    }

    async fn apply_inner(
        &self,
        user_id: &Uuid,
        character_id: &Uuid,
        delta: &AffinityDelta,
    ) -> Result<RelationshipState> {
        let mut state = self.get_or_init(user_id, character_id).await?;
        let before = state.stage;
        state.apply(delta);

        sqlx::query(
            r#"
            UPDATE relationship_state
            SET general = ?, friendship = ?, romance = ?, trust = ?, stage = ?, updated_at = ?
            WHERE CAST(user_id AS TEXT) = ? AND CAST(character_id AS TEXT) = ?
            "#,
        )
        .bind(state.general)
        .bind(state.friendship)
        .bind(state.romance)
        .bind(state.trust)
        .bind(state.stage.as_str())
        .bind(state.updated_at.naive_utc())
        .bind(user_id.to_string())
        .bind(character_id.to_string())
        .execute(&self.pool)
        .await?;

        if before != state.stage {
            info!(
                user_id = %user_id,
                character_id = %character_id,
                from = before.as_str(),
                to = state.stage.as_str(),
                "relationship stage changed"
            );
        }
        Ok(state)
    }

    async fn fetch(&self, user_id: &Uuid, character_id: &Uuid) -> Result<Option<RelationshipState>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, character_id, general, friendship, romance, trust, stage, updated_at
            FROM relationship_state
            WHERE CAST(user_id AS TEXT) = ? AND CAST(character_id AS TEXT) = ?
            "#,
        )
        .bind(user_id.to_string())
        .bind(character_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let user_id: String = row.get("user_id");
            let character_id: String = row.get("character_id");
            let stage: String = row.get("stage");
            let updated_at: NaiveDateTime = row.get("updated_at");
            RelationshipState {
                user_id: Uuid::parse_str(&user_id).unwrap_or_default(),
                character_id: Uuid::parse_str(&character_id).unwrap_or_default(),
                general: row.get("general"),
                friendship: row.get("friendship"),
                romance: row.get("romance"),
                trust: row.get("trust"),
                stage: Stage::parse(&stage),
                updated_at: Utc.from_utc_datetime(&updated_at),
            }
        }))
    }
}
