// src/db/migration.rs
//! Brings the SQLite schema up to date at startup. Statements are additive
//! and idempotent; deployments with older layouts (a lone `type` column on
//! memory_entries, missing `category`) keep working through SchemaProfile.

use sqlx::SqlitePool;
use tracing::info;

use crate::error::Result;
use crate::identity::SYSTEM_USER_ID;

const CREATE_CHARACTERS: &str = r#"
CREATE TABLE IF NOT EXISTS characters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    age INTEGER,
    gender TEXT,
    personality_traits TEXT,
    interests TEXT,
    background TEXT,
    current_emotion TEXT,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

const CREATE_USERS: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    external_id TEXT UNIQUE,
    display_name TEXT,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

/// Both the legacy `type` column and the current `memory_type` column exist
/// in a fresh schema; writes populate both and the trigger keeps them in
/// sync on update. Reads coalesce.
const CREATE_MEMORY_ENTRIES: &str = r#"
CREATE TABLE IF NOT EXISTS memory_entries (
    id TEXT PRIMARY KEY,
    character_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    type TEXT,
    memory_type TEXT,
    category TEXT,
    content TEXT NOT NULL,
    importance INTEGER NOT NULL DEFAULT 5,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

const CREATE_MEMORY_TYPE_SYNC_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS memory_entries_type_sync
AFTER UPDATE OF memory_type ON memory_entries
FOR EACH ROW WHEN NEW.memory_type IS NOT NULL AND (NEW.type IS NULL OR NEW.type <> NEW.memory_type)
BEGIN
    UPDATE memory_entries SET type = NEW.memory_type WHERE id = NEW.id;
END;
"#;

const CREATE_CHAT_HISTORY: &str = r#"
CREATE TABLE IF NOT EXISTS chat_history (
    id TEXT PRIMARY KEY,
    character_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT,
    position INTEGER NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    compressed BOOLEAN NOT NULL DEFAULT FALSE,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    UNIQUE (character_id, user_id, position)
);
"#;

const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    sender_id TEXT NOT NULL,
    sender_type TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    recipient_type TEXT NOT NULL,
    content TEXT NOT NULL,
    emotion TEXT,
    is_gift BOOLEAN NOT NULL DEFAULT FALSE,
    is_read BOOLEAN NOT NULL DEFAULT FALSE,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

const CREATE_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    character_id TEXT NOT NULL,
    user_id TEXT,
    event_type TEXT NOT NULL,
    data TEXT,
    created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#;

const CREATE_RELATIONSHIP_STATE: &str = r#"
CREATE TABLE IF NOT EXISTS relationship_state (
    user_id TEXT NOT NULL,
    character_id TEXT NOT NULL,
    general REAL NOT NULL DEFAULT 0.5,
    friendship REAL NOT NULL DEFAULT 0.0,
    romance REAL NOT NULL DEFAULT 0.0,
    trust REAL NOT NULL DEFAULT 0.0,
    stage TEXT NOT NULL DEFAULT 'acquaintances',
    updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (user_id, character_id)
);
"#;

const CREATE_INDICES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_memory_entries_pair ON memory_entries(character_id, user_id);
CREATE INDEX IF NOT EXISTS idx_memory_entries_importance ON memory_entries(importance);
CREATE UNIQUE INDEX IF NOT EXISTS idx_memory_entries_active_dedup
    ON memory_entries(character_id, user_id, content) WHERE is_active;
CREATE INDEX IF NOT EXISTS idx_chat_history_pair ON chat_history(character_id, user_id);
CREATE INDEX IF NOT EXISTS idx_messages_participants ON messages(sender_id, recipient_id);
CREATE INDEX IF NOT EXISTS idx_events_character ON events(character_id, event_type);
"#;

pub async fn run(pool: &SqlitePool) -> Result<()> {
    for statement in [
        CREATE_CHARACTERS,
        CREATE_USERS,
        CREATE_MEMORY_ENTRIES,
        CREATE_MEMORY_TYPE_SYNC_TRIGGER,
        CREATE_CHAT_HISTORY,
        CREATE_MESSAGES,
        CREATE_EVENTS,
        CREATE_RELATIONSHIP_STATE,
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    // Multi-statement batch
    sqlx::raw_sql(CREATE_INDICES).execute(pool).await?;

    // Seed the reserved system user for orphaned records
    sqlx::query(
        r#"
        INSERT INTO users (id, external_id, display_name)
        VALUES (?, NULL, 'system')
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(SYSTEM_USER_ID.to_string())
    .execute(pool)
    .await?;

    info!("database schema up to date");
    Ok(())
}
