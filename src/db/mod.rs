// src/db/mod.rs

pub mod migration;
pub mod schema;

pub use schema::SchemaProfile;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::config::Config;
use crate::error::Result;

/// Open the pool and bring the schema up to date.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(config.sqlite_max_connections)
        .connect(&config.database_url)
        .await?;
    migration::run(&pool).await?;
    Ok(pool)
}
