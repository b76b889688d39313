// tests/test_helpers.rs
//! Shared setup for integration tests: in-memory SQLite plus a scripted
//! oracle so no network or model is involved.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use elara::Services;
use elara::character::Character;
use elara::config::Config;
use elara::error::{Error, Result};
use elara::llm::{CompletionOracle, EnvelopeMessage};

/// Oracle that replays a fixed script. When the script runs dry it keeps
/// returning a plain valid reply; constructed failing, it always errors.
pub struct MockOracle {
    replies: Mutex<VecDeque<String>>,
    pub calls: Mutex<Vec<Vec<EnvelopeMessage>>>,
    fail: bool,
}

impl MockOracle {
    pub fn scripted(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            calls: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionOracle for MockOracle {
    async fn complete(&self, envelope: &[EnvelopeMessage], _deadline: Duration) -> Result<String> {
        self.calls.lock().unwrap().push(envelope.to_vec());
        if self.fail {
            return Err(Error::UpstreamError("scripted failure".into()));
        }
        let next = self.replies.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| {
            r#"{"text":"Хорошо!","emotion":"neutral","relationship_changes":{"general":0}}"#
                .to_string()
        }))
    }
}

pub async fn setup_services(oracle: Arc<MockOracle>) -> Services {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("create in-memory sqlite pool");
    elara::db::migration::run(&pool).await.expect("run migrations");

    Services::assemble(Config::from_env(), pool, oracle)
        .await
        .expect("assemble services")
}

pub async fn create_test_character(services: &Services, name: &str) -> Character {
    let character = Character {
        id: Uuid::new_v4(),
        name: name.to_string(),
        age: Some(24),
        gender: Some("female".to_string()),
        personality_traits: vec!["весёлая".to_string(), "внимательная".to_string()],
        interests: vec!["музыка".to_string(), "кино".to_string()],
        background: Some("Любит долгие разговоры по вечерам.".to_string()),
        current_emotion: Some("neutral".to_string()),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    services.characters.create(&character).await.expect("create character");
    character
}
