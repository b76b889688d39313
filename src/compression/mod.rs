// src/compression/mod.rs
//! Rewrites the oldest block of active history into a single summary turn.
//!
//! The oracle call happens before any write; the summary insert and the
//! deactivation of the originals share one transaction, so readers observe
//! either the old rows or the summary, never both halves.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::character::Character;
use crate::error::{Error, Result};
use crate::history::{HistoryStore, NewTurn, Role};
use crate::llm::{CompletionOracle, EnvelopeMessage};

const SUMMARY_PROMPT: &str = "\
Ты помощник по сжатию истории разговора. Проанализируй диалог между пользователем \
и собеседницей и составь краткое резюме, сохранив: факты о пользователе (имя, возраст, \
работа, увлечения, город), темы и ключевые моменты беседы, договорённости и обещания, \
эмоциональный фон и как развивались отношения. Не более 350 слов, в третьем лице, \
без шаблонных вступлений.";

const SUMMARY_HEADER: &str = "## Сжатая история предыдущего диалога:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionReport {
    pub original_messages: usize,
    pub compressed_messages: usize,
    pub summary: String,
}

pub struct CompressionEngine {
    history: Arc<HistoryStore>,
    oracle: Arc<dyn CompletionOracle>,
    pub threshold: usize,
    block_size: usize,
    min_messages: usize,
    deadline: Duration,
}

impl CompressionEngine {
    pub fn new(
        history: Arc<HistoryStore>,
        oracle: Arc<dyn CompletionOracle>,
        threshold: usize,
        block_size: usize,
        min_messages: usize,
        deadline: Duration,
    ) -> Self {
        Self { history, oracle, threshold, block_size, min_messages, deadline }
    }

    /// Whether the pair has grown past the compression threshold.
    pub async fn is_due(&self, character_id: &Uuid, user_id: &Uuid) -> Result<bool> {
        Ok(self.history.count_active(character_id, user_id).await? > self.threshold)
    }

    /// Compress the oldest contiguous active block for a pair.
    pub async fn compress(
        &self,
        character: &Character,
        user_id: &Uuid,
    ) -> Result<CompressionReport> {
        let character_id = character.id;
        let active = self.history.count_active(&character_id, user_id).await?;
        if active < self.min_messages {
            return Err(Error::InsufficientMessages { count: active, minimum: self.min_messages });
        }

        let block = self
            .history
            .oldest_active_block(&character_id, user_id, self.block_size)
            .await?;
        let block_len = block.len();
        let pos_lo = block.first().map(|r| r.position).unwrap_or(0);
        let pos_hi = block.last().map(|r| r.position).unwrap_or(0);

        // Oracle first; nothing is written if it fails or times out.
        let summary = self.summarize(character, &block).await?;

        let ids: Vec<Uuid> = block.iter().map(|r| r.id).collect();
        let lock = self.history.locks().for_pair(&character_id, user_id);
        let _guard = lock.lock().await;

        let mut tx = self.history.pool().begin().await?;
        let position = HistoryStore::max_position(&mut tx, &character_id, user_id).await? + 1;
        let turn = NewTurn::with_metadata(
            Role::System,
            format!("{}\n\n{}", SUMMARY_HEADER, summary),
            json!({"summary": true, "covers": [pos_lo, pos_hi]}),
        );
        HistoryStore::insert_turn(&mut tx, &character_id, user_id, &turn, position).await?;
        HistoryStore::mark_inactive(&mut tx, &ids, true).await?;
        tx.commit().await?;

        info!(
            character_id = %character_id,
            user_id = %user_id,
            compressed = block_len,
            summary_position = position,
            "🗜️ compressed history block"
        );

        Ok(CompressionReport {
            original_messages: block_len,
            compressed_messages: 1,
            summary,
        })
    }

    async fn summarize(
        &self,
        character: &Character,
        block: &[crate::history::ChatHistoryRow],
    ) -> Result<String> {
        let mut envelope = vec![
            EnvelopeMessage::system(SUMMARY_PROMPT),
            EnvelopeMessage::system(format!("Информация о персонаже:\n{}", character.sheet())),
        ];
        for row in block {
            envelope.push(match row.role {
                Role::User => EnvelopeMessage::user(row.content.clone()),
                Role::Assistant => EnvelopeMessage::assistant(row.content.clone()),
                Role::System => EnvelopeMessage::system(row.content.clone()),
            });
        }
        envelope.push(EnvelopeMessage::user(
            "Сожми историю разговора: о чём говорили, какие факты пользователь рассказал о себе, \
             какие планы или договорённости были сделаны, каким был эмоциональный фон."
                .to_string(),
        ));

        let summary = self.oracle.complete(&envelope, self.deadline).await?.trim().to_string();
        if summary.is_empty() {
            return Err(Error::UpstreamError("oracle returned an empty summary".into()));
        }
        Ok(summary)
    }
}
