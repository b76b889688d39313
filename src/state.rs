// src/state.rs
//! Explicit dependency wiring. A single `Services` value carries the config,
//! the stores, and the oracle; it is threaded through every operation
//! instead of living in module-level globals.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;

use crate::character::CharacterStore;
use crate::chat::ChatService;
use crate::compression::CompressionEngine;
use crate::config::Config;
use crate::db::SchemaProfile;
use crate::error::Result;
use crate::events::EventStore;
use crate::history::{HistoryStore, MessageStore, PairLocks};
use crate::identity::UserStore;
use crate::llm::{CompletionOracle, OracleClient};
use crate::memory::MemoryStore;
use crate::relationship::RelationshipTracker;

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub pool: SqlitePool,

    // -------- Storage --------
    pub characters: Arc<CharacterStore>,
    pub users: Arc<UserStore>,
    pub memories: Arc<MemoryStore>,
    pub history: Arc<HistoryStore>,
    pub messages: Arc<MessageStore>,
    pub events: Arc<EventStore>,

    // -------- Services --------
    pub relationships: Arc<RelationshipTracker>,
    pub compression: Arc<CompressionEngine>,
    pub chat: Arc<ChatService>,
}

impl Services {
    /// Assemble the full service graph over an open pool. The oracle is
    /// injected so tests can script it.
    pub async fn assemble(
        config: Config,
        pool: SqlitePool,
        oracle: Arc<dyn CompletionOracle>,
    ) -> Result<Self> {
        let profile = SchemaProfile::probe(&pool).await?;
        let locks = Arc::new(PairLocks::new());

        let characters = Arc::new(CharacterStore::new(
            pool.clone(),
            Duration::from_secs(config.character_cache_ttl_secs),
        ));
        let users = Arc::new(UserStore::new(pool.clone()));
        let memories = Arc::new(MemoryStore::new(pool.clone(), profile));
        let history = Arc::new(HistoryStore::new(pool.clone(), locks.clone()));
        let messages = Arc::new(MessageStore::new(pool.clone()));
        let events = Arc::new(EventStore::new(pool.clone()));
        let relationships = Arc::new(RelationshipTracker::new(pool.clone(), locks.clone()));

        let compression = Arc::new(CompressionEngine::new(
            history.clone(),
            oracle.clone(),
            config.compression_threshold,
            config.compression_block_size,
            config.compression_min_messages,
            config.oracle_timeout(),
        ));

        let chat = Arc::new(ChatService::new(
            &config,
            characters.clone(),
            users.clone(),
            memories.clone(),
            history.clone(),
            messages.clone(),
            events.clone(),
            relationships.clone(),
            compression.clone(),
            oracle,
            locks,
        ));

        Ok(Self {
            config: Arc::new(config),
            pool,
            characters,
            users,
            memories,
            history,
            messages,
            events,
            relationships,
            compression,
            chat,
        })
    }

    /// Production wiring: HTTP oracle from the config.
    pub async fn from_config(config: Config) -> Result<Self> {
        let pool = crate::db::connect(&config).await?;
        let oracle: Arc<dyn CompletionOracle> = Arc::new(OracleClient::new(&config));
        Self::assemble(config, pool, oracle).await
    }
}
