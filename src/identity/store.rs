// src/identity/store.rs

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::identity::{id_suffix, internal_id_of, SYSTEM_USER_ID};

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct UserStore {
    pool: SqlitePool,
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Look up a user by external id or internal id, in that order, with a
    /// suffix match as the last tier to tolerate historical data.
    pub async fn resolve(&self, reference: &str) -> Result<Option<User>> {
        let reference = reference.trim();

        let row = sqlx::query(
            r#"
            SELECT id, external_id, display_name, created_at
            FROM users
            WHERE CAST(external_id AS TEXT) = ?
            "#,
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = row {
            return Ok(Some(Self::user_from_row(&row)));
        }

        let internal = internal_id_of(reference);
        let row = sqlx::query(
            r#"
            SELECT id, external_id, display_name, created_at
            FROM users
            WHERE CAST(id AS TEXT) = ?
            "#,
        )
        .bind(internal.to_string())
        .fetch_optional(&self.pool)
        .await?;
        if let Some(row) = row {
            return Ok(Some(Self::user_from_row(&row)));
        }

        let suffix = id_suffix(&internal);
        let row = sqlx::query(
            r#"
            SELECT id, external_id, display_name, created_at
            FROM users
            WHERE CAST(id AS TEXT) LIKE '%' || ?
            "#,
        )
        .bind(&suffix)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            debug!(reference, suffix, "resolved user via suffix match");
        }
        Ok(row.map(|r| Self::user_from_row(&r)))
    }

    /// Resolve a reference to a known user id, falling back to the system
    /// user when nothing matches. Used by memory writes so that orphaned
    /// facts stay attributable.
    pub async fn resolve_or_system(&self, reference: Option<&str>) -> Result<Uuid> {
        match reference {
            Some(r) if !r.trim().is_empty() => match self.resolve(r).await? {
                Some(user) => Ok(user.id),
                None => Ok(SYSTEM_USER_ID),
            },
            _ => Ok(SYSTEM_USER_ID),
        }
    }

    /// Create the user for an external id if absent; returns the internal id
    /// either way.
    pub async fn ensure(&self, external_id: &str, display_name: Option<&str>) -> Result<Uuid> {
        if let Some(user) = self.resolve(external_id).await? {
            return Ok(user.id);
        }

        let id = internal_id_of(external_id);
        sqlx::query(
            r#"
            INSERT INTO users (id, external_id, display_name, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id.to_string())
        .bind(external_id)
        .bind(display_name)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;

        debug!(%id, external_id, "created user");
        Ok(id)
    }

    pub async fn exists(&self, id: &Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE CAST(id AS TEXT) = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> User {
        let id: String = row.get("id");
        let created_at: NaiveDateTime = row.get("created_at");
        User {
            id: Uuid::parse_str(&id).unwrap_or(SYSTEM_USER_ID),
            external_id: row.get("external_id"),
            display_name: row.get("display_name"),
            created_at: Utc.from_utc_datetime(&created_at),
        }
    }
}
