// src/db/schema.rs

use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::Result;

/// Which optional columns exist on `memory_entries`.
///
/// Legacy deployments carry either a `type` column, a `memory_type` column,
/// or both; some predate `category`. The profile is probed at startup and
/// re-probed when a query fails against the observed columns, so the store
/// can dispatch to a reduced query instead of failing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaProfile {
    pub has_type: bool,
    pub has_memory_type: bool,
    pub has_category: bool,
}

impl SchemaProfile {
    /// Probe the live table layout.
    pub async fn probe(pool: &SqlitePool) -> Result<Self> {
        let rows = sqlx::query("SELECT name FROM pragma_table_info('memory_entries')")
            .fetch_all(pool)
            .await?;

        let mut profile = SchemaProfile {
            has_type: false,
            has_memory_type: false,
            has_category: false,
        };
        for row in rows {
            let name: String = row.get("name");
            match name.as_str() {
                "type" => profile.has_type = true,
                "memory_type" => profile.has_memory_type = true,
                "category" => profile.has_category = true,
                _ => {}
            }
        }

        debug!(?profile, "probed memory_entries schema");
        Ok(profile)
    }

    /// The SELECT expression for the memory type, coalescing whichever
    /// columns exist.
    pub fn type_expr(&self) -> &'static str {
        match (self.has_memory_type, self.has_type) {
            (true, true) => "COALESCE(memory_type, type, 'unknown')",
            (true, false) => "COALESCE(memory_type, 'unknown')",
            (false, true) => "COALESCE(type, 'unknown')",
            (false, false) => "'unknown'",
        }
    }

    pub fn category_expr(&self) -> &'static str {
        if self.has_category {
            "COALESCE(category, 'general')"
        } else {
            "'general'"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_expr_coalesces_both_columns() {
        let profile = SchemaProfile { has_type: true, has_memory_type: true, has_category: true };
        assert!(profile.type_expr().contains("memory_type, type"));

        let legacy = SchemaProfile { has_type: true, has_memory_type: false, has_category: false };
        assert_eq!(legacy.type_expr(), "COALESCE(type, 'unknown')");
        assert_eq!(legacy.category_expr(), "'general'");
    }
}
