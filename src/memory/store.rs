// src/memory/store.rs
//! Persistent typed store of per-(character, user) facts.
//!
//! The table may carry a legacy `type` column, the current `memory_type`
//! column, or both; writes populate every type column that exists and reads
//! coalesce. When the observed columns change at runtime the store re-probes
//! once and retries with the reduced column set instead of failing.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::SchemaProfile;
use crate::error::{Error, Result};
use crate::identity::{SYSTEM_USER_ID, id_suffix};
use crate::memory::types::{
    DEFAULT_CATEGORY, DEFAULT_MEMORY_TYPE, MemoryCandidate, MemoryEntry, clamp_importance,
};

pub struct MemoryStore {
    pool: SqlitePool,
    profile: RwLock<SchemaProfile>,
    drift_logged: AtomicBool,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool, profile: SchemaProfile) -> Self {
        Self {
            pool,
            profile: RwLock::new(profile),
            drift_logged: AtomicBool::new(false),
        }
    }

    fn profile(&self) -> SchemaProfile {
        *self.profile.read().unwrap()
    }

    /// Insert a fact, deduplicating against active rows with the same
    /// `(character_id, user_id, content)`. Returns the id of the surviving
    /// row either way.
    ///
    /// A missing or unknown `user_id` is reassigned to the system user so
    /// the fact stays queryable. Empty content is the only hard failure.
    pub async fn insert(
        &self,
        character_id: &Uuid,
        user_id: Option<&Uuid>,
        memory_type: &str,
        category: &str,
        content: &str,
        importance: i64,
    ) -> Result<Uuid> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::InvalidInput("memory content must not be empty".into()));
        }

        let owner = self.resolve_owner(user_id).await?;
        let memory_type = if memory_type.trim().is_empty() { DEFAULT_MEMORY_TYPE } else { memory_type };
        let category = if category.trim().is_empty() { DEFAULT_CATEGORY } else { category };
        let importance = clamp_importance(importance);

        if let Some(existing) = self.find_active(character_id, &owner, content).await? {
            debug!(memory_id = %existing, "deduplicated memory insert");
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        match self
            .try_insert(&id, character_id, &owner, memory_type, category, content, importance)
            .await
        {
            Ok(()) => {}
            Err(Error::Database(e)) if is_unique_violation(&e) => {
                // Lost the race to an identical concurrent insert
                if let Some(existing) = self.find_active(character_id, &owner, content).await? {
                    return Ok(existing);
                }
                return Err(Error::Database(e));
            }
            Err(Error::Database(e)) if is_missing_column(&e) => {
                self.reprobe("insert").await?;
                self.try_insert(&id, character_id, &owner, memory_type, category, content, importance)
                    .await?;
            }
            Err(e) => return Err(e),
        }

        info!(
            memory_id = %id,
            character_id = %character_id,
            memory_type,
            category,
            importance,
            "🧠 memory added"
        );
        Ok(id)
    }

    /// Run every candidate through `insert`, logging and skipping failures.
    /// Returns how many candidates ended up with an active row.
    pub async fn ingest(
        &self,
        character_id: &Uuid,
        user_id: Option<&Uuid>,
        candidates: &[MemoryCandidate],
    ) -> usize {
        let mut stored = 0;
        for candidate in candidates {
            match self
                .insert(
                    character_id,
                    user_id,
                    &candidate.memory_type,
                    &candidate.category,
                    &candidate.content,
                    candidate.importance,
                )
                .await
            {
                Ok(_) => stored += 1,
                Err(e) => warn!("skipping memory candidate: {}", e),
            }
        }
        stored
    }

    /// Active memories for a pair, `importance DESC, created_at DESC`.
    ///
    /// User filtering is best-effort across four tiers merged in priority
    /// order until `limit`: exact user id, suffix match, the system user,
    /// and finally unfiltered.
    pub async fn query(
        &self,
        character_id: &Uuid,
        user_id: Option<&Uuid>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let mut entries: Vec<MemoryEntry> = Vec::new();
        let mut seen: Vec<Uuid> = Vec::new();

        let mut tiers: Vec<(Option<String>, bool)> = Vec::new();
        if let Some(user) = user_id {
            tiers.push((Some(user.to_string()), false));
            tiers.push((Some(id_suffix(user)), true));
        }
        tiers.push((Some(SYSTEM_USER_ID.to_string()), false));
        tiers.push((None, false));

        for (filter, is_suffix) in tiers {
            if entries.len() >= limit {
                break;
            }
            let batch = self
                .query_tier(character_id, filter.as_deref(), is_suffix, limit)
                .await?;
            for entry in batch {
                if entries.len() >= limit {
                    break;
                }
                if !seen.contains(&entry.id) {
                    seen.push(entry.id);
                    entries.push(entry);
                }
            }
        }

        Ok(entries)
    }

    pub async fn deactivate(&self, id: &Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE memory_entries
            SET is_active = FALSE, updated_at = ?
            WHERE CAST(id AS TEXT) = ?
            "#,
        )
        .bind(Utc::now().naive_utc())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("memory {}", id)));
        }
        Ok(())
    }

    /// Physical removal; admin only. Regular flows deactivate instead.
    pub async fn delete(&self, id: &Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM memory_entries WHERE CAST(id AS TEXT) = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("memory {}", id)));
        }
        Ok(())
    }

    pub async fn count_active(&self, character_id: &Uuid, user_id: &Uuid) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM memory_entries
            WHERE CAST(character_id AS TEXT) = ? AND CAST(user_id AS TEXT) = ? AND is_active
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    // ── internals ──────────────────────────────────────────────────────

    async fn resolve_owner(&self, user_id: Option<&Uuid>) -> Result<Uuid> {
        let Some(user_id) = user_id else {
            return Ok(SYSTEM_USER_ID);
        };
        if *user_id == SYSTEM_USER_ID {
            return Ok(SYSTEM_USER_ID);
        }
        let known = sqlx::query("SELECT 1 FROM users WHERE CAST(id AS TEXT) = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if known {
            Ok(*user_id)
        } else {
            debug!(user_id = %user_id, "unknown user on memory write, using system user");
            Ok(SYSTEM_USER_ID)
        }
    }

    async fn find_active(
        &self,
        character_id: &Uuid,
        user_id: &Uuid,
        content: &str,
    ) -> Result<Option<Uuid>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM memory_entries
            WHERE CAST(character_id AS TEXT) = ?
              AND CAST(user_id AS TEXT) = ?
              AND content = ?
              AND is_active
            "#,
        )
        .bind(character_id.to_string())
        .bind(user_id.to_string())
        .bind(content)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|r| Uuid::parse_str(&r.get::<String, _>("id")).ok()))
    }

    async fn try_insert(
        &self,
        id: &Uuid,
        character_id: &Uuid,
        user_id: &Uuid,
        memory_type: &str,
        category: &str,
        content: &str,
        importance: i64,
    ) -> Result<()> {
        let profile = self.profile();

        let mut columns = vec!["id", "character_id", "user_id"];
        if profile.has_type {
            columns.push("type");
        }
        if profile.has_memory_type {
            columns.push("memory_type");
        }
        if profile.has_category {
            columns.push("category");
        }
        columns.extend(["content", "importance", "is_active", "created_at", "updated_at"]);

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO memory_entries ({}) VALUES ({})",
            columns.join(", "),
            placeholders
        );

        let now = Utc::now().naive_utc();
        let mut query = sqlx::query(&sql)
            .bind(id.to_string())
            .bind(character_id.to_string())
            .bind(user_id.to_string());
        if profile.has_type {
            query = query.bind(memory_type);
        }
        if profile.has_memory_type {
            query = query.bind(memory_type);
        }
        if profile.has_category {
            query = query.bind(category);
        }
        query = query.bind(content).bind(importance).bind(true).bind(now).bind(now);

        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn query_tier(
        &self,
        character_id: &Uuid,
        user_filter: Option<&str>,
        suffix: bool,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        match self.try_query_tier(character_id, user_filter, suffix, limit).await {
            Ok(entries) => Ok(entries),
            Err(Error::Database(e)) if is_missing_column(&e) => {
                self.reprobe("query").await?;
                self.try_query_tier(character_id, user_filter, suffix, limit).await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_query_tier(
        &self,
        character_id: &Uuid,
        user_filter: Option<&str>,
        suffix: bool,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let profile = self.profile();

        let user_clause = match (user_filter, suffix) {
            (Some(_), false) => "AND CAST(m.user_id AS TEXT) = ?",
            (Some(_), true) => "AND CAST(m.user_id AS TEXT) LIKE '%' || ?",
            (None, _) => "",
        };

        // Orphaned rows (user deleted out from under the memory) come back
        // owned by the system user; the row itself is untouched.
        let sql = format!(
            r#"
            SELECT m.id, m.character_id, m.user_id,
                   {} AS memory_type, {} AS category,
                   m.content, m.importance, m.is_active, m.created_at, m.updated_at,
                   u.id AS owner_id
            FROM memory_entries m
            LEFT JOIN users u ON CAST(u.id AS TEXT) = CAST(m.user_id AS TEXT)
            WHERE CAST(m.character_id AS TEXT) = ?
              AND m.is_active
              {}
            ORDER BY m.importance DESC, m.created_at DESC
            LIMIT ?
            "#,
            profile.type_expr(),
            profile.category_expr(),
            user_clause,
        );

        let mut query = sqlx::query(&sql).bind(character_id.to_string());
        if let Some(filter) = user_filter {
            query = query.bind(filter);
        }
        query = query.bind(limit as i64);

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::entry_from_row).collect())
    }

    async fn reprobe(&self, operation: &str) -> Result<()> {
        let fresh = SchemaProfile::probe(&self.pool).await?;
        let mut profile = self.profile.write().unwrap();
        if !self.drift_logged.swap(true, Ordering::SeqCst) {
            warn!(
                ?fresh,
                operation, "memory_entries schema drifted, falling back to reduced query"
            );
        }
        *profile = fresh;
        Ok(())
    }

    fn entry_from_row(row: &sqlx::sqlite::SqliteRow) -> MemoryEntry {
        let id: String = row.get("id");
        let character_id: String = row.get("character_id");
        let user_id: String = row.get("user_id");
        let owner: Option<String> = row.get("owner_id");
        let created_at: NaiveDateTime = row.get("created_at");
        let updated_at: NaiveDateTime = row.get("updated_at");

        let user_id = match owner {
            Some(_) => Uuid::parse_str(&user_id).unwrap_or(SYSTEM_USER_ID),
            None => SYSTEM_USER_ID,
        };

        MemoryEntry {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            character_id: Uuid::parse_str(&character_id).unwrap_or_default(),
            user_id,
            memory_type: row.get("memory_type"),
            category: row.get("category"),
            content: row.get("content"),
            importance: row.get("importance"),
            is_active: row.get("is_active"),
            created_at: Utc.from_utc_datetime(&created_at),
            updated_at: Utc.from_utc_datetime(&updated_at),
        }
    }
}

fn is_missing_column(e: &sqlx::Error) -> bool {
    let message = e.to_string();
    message.contains("no such column") || message.contains("has no column named")
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
