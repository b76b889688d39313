// src/chat/mod.rs
//! The inbound boundary of the memory core: start a chat, exchange
//! messages and gifts, clear or compress history, list memories.
//!
//! Every operation resolves ids through the identity mapper, so callers may
//! pass external platform ids or internal ids interchangeably.

pub mod gifts;

pub use gifts::Gift;

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::character::{Character, CharacterStore};
use crate::compression::{CompressionEngine, CompressionReport};
use crate::config::Config;
use crate::context::{ContextAssembler, CurrentInteraction};
use crate::error::{Error, Result};
use crate::events::EventStore;
use crate::history::{
    HistoryStore, MessageStore, Message, NewMessage, NewTurn, PairLocks, Participant, Role,
};
use crate::identity::{UserStore, internal_id_of};
use crate::llm::response::{OracleReply, ReplyPart};
use crate::llm::CompletionOracle;
use crate::memory::{MemoryEntry, MemoryExtractor, MemoryStore};
use crate::relationship::{AffinityDelta, RelationshipTracker};

const DEFAULT_GREETING: &str = "Привет! Рада познакомиться с тобой. Как твои дела?";

/// A reaction shorter than this is judged templated and retried once.
const MIN_REACTION_CHARS: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SendOutcome {
    Single {
        text: String,
        emotion: String,
        relationship_changes: AffinityDelta,
    },
    Multi {
        multi_messages: Vec<ReplyPart>,
        relationship_changes: AffinityDelta,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftOutcome {
    pub reaction: ReplyPart,
    pub relationship_changes: AffinityDelta,
}

pub struct ChatService {
    characters: Arc<CharacterStore>,
    users: Arc<UserStore>,
    memories: Arc<MemoryStore>,
    extractor: MemoryExtractor,
    history: Arc<HistoryStore>,
    messages: Arc<MessageStore>,
    events: Arc<EventStore>,
    relationships: Arc<RelationshipTracker>,
    assembler: ContextAssembler,
    compression: Arc<CompressionEngine>,
    oracle: Arc<dyn CompletionOracle>,
    locks: Arc<PairLocks>,
    oracle_deadline: Duration,
    name_pattern: Regex,
}

impl ChatService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        characters: Arc<CharacterStore>,
        users: Arc<UserStore>,
        memories: Arc<MemoryStore>,
        history: Arc<HistoryStore>,
        messages: Arc<MessageStore>,
        events: Arc<EventStore>,
        relationships: Arc<RelationshipTracker>,
        compression: Arc<CompressionEngine>,
        oracle: Arc<dyn CompletionOracle>,
        locks: Arc<PairLocks>,
    ) -> Self {
        Self {
            characters,
            users,
            memories,
            extractor: MemoryExtractor::new(),
            history,
            messages,
            events,
            relationships,
            assembler: ContextAssembler::new(config),
            compression,
            oracle,
            locks,
            oracle_deadline: config.oracle_timeout(),
            name_pattern: Regex::new(r"Имя пользователя:\s*(.+)").unwrap(),
        }
    }

    /// Open a conversation. The greeting is personalised when a name-typed
    /// memory already exists for the pair.
    pub async fn start_chat(&self, character_id: &Uuid, user_ref: &str) -> Result<Message> {
        let character = self.characters.get(character_id).await?;
        let user_id = self.users.ensure(user_ref, None).await?;

        let greeting = match self.known_name(character_id, &user_id).await? {
            Some(name) => {
                info!(character_id = %character_id, "personalised greeting for returning user");
                format!("Привет, {}! Рада видеть тебя снова. Как у тебя дела?", name)
            }
            None => DEFAULT_GREETING.to_string(),
        };

        self.history
            .append(character_id, &user_id, NewTurn::new(Role::Assistant, greeting.clone()))
            .await?;

        self.messages
            .record(NewMessage {
                sender_id: &character.id,
                sender_type: Participant::Character,
                recipient_id: &user_id,
                recipient_type: Participant::User,
                content: &greeting,
                emotion: Some("happy"),
                is_gift: false,
            })
            .await
    }

    /// One user turn: assemble, complete, record, learn.
    pub async fn send_message(
        &self,
        character_id: &Uuid,
        user_ref: &str,
        text: &str,
    ) -> Result<SendOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("message text must not be empty".into()));
        }

        let character = self.characters.get(character_id).await?;
        let user_id = self.users.ensure(user_ref, None).await?;

        let envelope = {
            let relationship = self.relationships.get_or_init(&user_id, character_id).await?;
            let memories = self
                .memories
                .query(character_id, Some(&user_id), self.assembler.memory_top_k)
                .await?;
            let events = self
                .events
                .recent_gifts(character_id, &user_id, self.assembler.event_window)
                .await?;
            let history = self
                .history
                .fetch_recent(character_id, &user_id, self.assembler.history_window)
                .await?;
            self.assembler.assemble(
                &character,
                &relationship,
                &memories,
                &events,
                &history,
                &CurrentInteraction::UserMessage(text.to_string()),
            )?
        };

        // All writes are staged after the oracle returns; a timeout or
        // cancellation leaves no half-applied turn.
        let raw = self.oracle.complete(&envelope, self.oracle_deadline).await?;
        let reply = OracleReply::parse(&raw);

        let parts: Vec<ReplyPart> = if reply.parts.is_empty() {
            vec![ReplyPart { text: reply.text.clone(), emotion: reply.emotion.clone() }]
        } else {
            reply.parts.clone()
        };

        self.record_turn(&character, &user_id, text, &parts, &reply.relationship_changes)
            .await?;

        self.learn_from_turn(&character, &user_id, text, &reply).await;
        self.maybe_compress(&character, &user_id).await;

        let applied = reply.relationship_changes.clipped();
        if reply.parts.is_empty() {
            Ok(SendOutcome::Single {
                text: reply.text,
                emotion: reply.emotion,
                relationship_changes: applied,
            })
        } else {
            Ok(SendOutcome::Multi { multi_messages: parts, relationship_changes: applied })
        }
    }

    /// Gift flow: reaction with at most one retry, then the full write set.
    pub async fn send_gift(
        &self,
        character_id: &Uuid,
        user_ref: &str,
        gift_id: &str,
    ) -> Result<GiftOutcome> {
        let gift = gifts::find(gift_id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown gift '{}'", gift_id)))?;

        let character = self.characters.get(character_id).await?;
        let user_id = self.users.ensure(user_ref, None).await?;

        let mut reply = self.gift_reaction(&character, &user_id, gift, false).await?;
        if reply.narrative().chars().count() < MIN_REACTION_CHARS {
            info!(gift = gift.id, "gift reaction too short, retrying once");
            reply = self.gift_reaction(&character, &user_id, gift, true).await?;
        }

        let reaction_text = if reply.narrative().is_empty() {
            format!("Спасибо за {}!", gift.name)
        } else {
            reply.narrative().to_string()
        };
        let emotion =
            if reply.emotion == "neutral" { "happy".to_string() } else { reply.emotion.clone() };

        let gift_delta = AffinityDelta::for_gift(gift.effect);

        // Single transaction for history, messages, and the event; the
        // relationship update follows under the same pair lock.
        let lock = self.locks.for_pair(character_id, &user_id);
        let applied = {
            let _guard = lock.lock().await;

            let mut tx = self.history.pool().begin().await?;
            let base = HistoryStore::max_position(&mut tx, character_id, &user_id).await?;

            let gift_event = json!({
                "gift_id": gift.id,
                "gift_name": gift.name,
                "gift_effect": gift.effect,
            });
            HistoryStore::insert_turn(
                &mut tx,
                character_id,
                &user_id,
                &NewTurn::with_metadata(
                    Role::System,
                    format!("Пользователь отправил подарок: {}", gift.name),
                    json!({"gift_event": gift_event.clone()}),
                ),
                base + 1,
            )
            .await?;
            HistoryStore::insert_turn(
                &mut tx,
                character_id,
                &user_id,
                &NewTurn::with_metadata(
                    Role::Assistant,
                    reaction_text.clone(),
                    json!({"emotion": emotion, "gift_response": true}),
                ),
                base + 2,
            )
            .await?;

            MessageStore::insert(
                &mut tx,
                NewMessage {
                    sender_id: &user_id,
                    sender_type: Participant::User,
                    recipient_id: &character.id,
                    recipient_type: Participant::Character,
                    content: &format!("Отправил подарок: {}", gift.name),
                    emotion: Some("happy"),
                    is_gift: true,
                },
            )
            .await?;
            MessageStore::insert(
                &mut tx,
                NewMessage {
                    sender_id: &character.id,
                    sender_type: Participant::Character,
                    recipient_id: &user_id,
                    recipient_type: Participant::User,
                    content: &reaction_text,
                    emotion: Some(&emotion),
                    is_gift: false,
                },
            )
            .await?;

            EventStore::insert(&mut tx, character_id, Some(&user_id), "gift_received", gift_event)
                .await?;

            tx.commit().await?;

            // Gift-derived delta always applies; a turn-derived delta from
            // the oracle stacks on top when present.
            let mut applied = gift_delta.clipped();
            if let Err(e) =
                self.relationships.apply(&user_id, character_id, &gift_delta, true).await
            {
                warn!("gift relationship update failed: {}", e);
            }
            if !reply.relationship_changes.is_zero() {
                match self
                    .relationships
                    .apply(&user_id, character_id, &reply.relationship_changes, true)
                    .await
                {
                    Ok(_) => {
                        let extra = reply.relationship_changes.clipped();
                        applied.general += extra.general;
                        applied.friendship += extra.friendship;
                        applied.romance += extra.romance;
                        applied.trust += extra.trust;
                    }
                    Err(e) => warn!("turn relationship update failed: {}", e),
                }
            }
            applied
        };

        if let Err(e) = self.characters.update_emotion(&character.id, &emotion).await {
            warn!("emotion update failed: {}", e);
        }
        if let Err(e) = self
            .memories
            .insert(
                character_id,
                Some(&user_id),
                "fact",
                "gift",
                &format!("Пользователь подарил: {}", gift.name),
                6,
            )
            .await
        {
            warn!("gift memory insert failed: {}", e);
        }

        info!(gift = gift.id, character_id = %character_id, "🎁 gift processed");
        Ok(GiftOutcome {
            reaction: ReplyPart { text: reaction_text, emotion },
            relationship_changes: applied,
        })
    }

    /// Deactivate the pair's history and drop its boundary messages.
    /// Returns how many history rows were deactivated.
    pub async fn clear_history(&self, character_id: &Uuid, user_ref: &str) -> Result<usize> {
        let character = self.characters.get(character_id).await?;
        let user_id = self.resolve_user_id(user_ref).await?;

        let cleared = self.history.deactivate_all(&character.id, &user_id).await?;
        let deleted = self.messages.delete_between(&character.id, &user_id).await?;
        info!(
            character_id = %character_id,
            cleared,
            deleted,
            "cleared conversation history"
        );
        Ok(cleared)
    }

    /// Explicit compression request.
    pub async fn compress_history(
        &self,
        character_id: &Uuid,
        user_ref: &str,
    ) -> Result<CompressionReport> {
        let character = self.characters.get(character_id).await?;
        let user_id = self.resolve_user_id(user_ref).await?;
        self.compression.compress(&character, &user_id).await
    }

    pub async fn list_memories(
        &self,
        character_id: &Uuid,
        user_ref: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let user_id = match user_ref {
            Some(reference) => Some(self.resolve_user_id(reference).await?),
            None => None,
        };
        self.memories.query(character_id, user_id.as_ref(), limit).await
    }

    // ── internals ──────────────────────────────────────────────────────

    async fn resolve_user_id(&self, user_ref: &str) -> Result<Uuid> {
        Ok(match self.users.resolve(user_ref).await? {
            Some(user) => user.id,
            None => internal_id_of(user_ref),
        })
    }

    async fn known_name(&self, character_id: &Uuid, user_id: &Uuid) -> Result<Option<String>> {
        let memories = self.memories.query(character_id, Some(user_id), 50).await?;
        Ok(memories
            .iter()
            .find(|m| m.memory_type == "personal_info" && m.category == "name")
            .and_then(|m| self.name_pattern.captures(&m.content))
            .map(|captures| captures[1].trim().to_string()))
    }

    async fn record_turn(
        &self,
        character: &Character,
        user_id: &Uuid,
        user_text: &str,
        parts: &[ReplyPart],
        delta: &AffinityDelta,
    ) -> Result<()> {
        let lock = self.locks.for_pair(&character.id, user_id);
        let _guard = lock.lock().await;

        let mut tx = self.history.pool().begin().await?;
        let mut position = HistoryStore::max_position(&mut tx, &character.id, user_id).await?;

        position += 1;
        HistoryStore::insert_turn(
            &mut tx,
            &character.id,
            user_id,
            &NewTurn::new(Role::User, user_text),
            position,
        )
        .await?;
        MessageStore::insert(
            &mut tx,
            NewMessage {
                sender_id: user_id,
                sender_type: Participant::User,
                recipient_id: &character.id,
                recipient_type: Participant::Character,
                content: user_text,
                emotion: None,
                is_gift: false,
            },
        )
        .await?;

        for part in parts {
            if part.text.is_empty() {
                continue;
            }
            position += 1;
            HistoryStore::insert_turn(
                &mut tx,
                &character.id,
                user_id,
                &NewTurn::with_metadata(
                    Role::Assistant,
                    part.text.clone(),
                    json!({"emotion": part.emotion}),
                ),
                position,
            )
            .await?;
            MessageStore::insert(
                &mut tx,
                NewMessage {
                    sender_id: &character.id,
                    sender_type: Participant::Character,
                    recipient_id: user_id,
                    recipient_type: Participant::User,
                    content: &part.text,
                    emotion: Some(&part.emotion),
                    is_gift: false,
                },
            )
            .await?;
        }

        tx.commit().await?;

        // Same turn, same lock: relationship read-modify-write.
        if !delta.is_zero() {
            if let Err(e) = self.relationships.apply(user_id, &character.id, delta, true).await {
                warn!("relationship update failed: {}", e);
            }
        }
        Ok(())
    }

    /// Best-effort side effects of a turn: emotion, extraction.
    async fn learn_from_turn(
        &self,
        character: &Character,
        user_id: &Uuid,
        user_text: &str,
        reply: &OracleReply,
    ) {
        if !reply.emotion.is_empty() {
            if let Err(e) = self.characters.update_emotion(&character.id, &reply.emotion).await {
                warn!("emotion update failed: {}", e);
            }
        }

        // The structured block wins; the pattern pass runs over the user's
        // words, which is where the facts actually live.
        let candidates = if reply.memory.is_some() {
            self.extractor.extract(reply.memory.as_ref(), user_text)
        } else {
            self.extractor.extract_from_text(user_text)
        };
        if candidates.is_empty() {
            return;
        }
        let stored = self.memories.ingest(&character.id, Some(user_id), &candidates).await;
        if stored > 0 {
            info!(stored, character_id = %character.id, "🧠 extracted memories from turn");
        }
    }

    async fn maybe_compress(&self, character: &Character, user_id: &Uuid) {
        match self.compression.is_due(&character.id, user_id).await {
            Ok(true) => {
                if let Err(e) = self.compression.compress(character, user_id).await {
                    warn!("background compression failed: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("compression check failed: {}", e),
        }
    }

    async fn gift_reaction(
        &self,
        character: &Character,
        user_id: &Uuid,
        gift: &Gift,
        explicit: bool,
    ) -> Result<OracleReply> {
        let relationship = self.relationships.get_or_init(user_id, &character.id).await?;
        let memories = self
            .memories
            .query(&character.id, Some(user_id), self.assembler.memory_top_k)
            .await?;
        let events = self
            .events
            .recent_gifts(&character.id, user_id, self.assembler.event_window)
            .await?;
        let history = self
            .history
            .fetch_recent(&character.id, user_id, self.assembler.history_window)
            .await?;

        let envelope = self.assembler.assemble(
            character,
            &relationship,
            &memories,
            &events,
            &history,
            &CurrentInteraction::Gift {
                gift_id: gift.id.to_string(),
                gift_name: gift.name.to_string(),
                effect: gift.effect,
                explicit,
            },
        )?;

        let raw = self.oracle.complete(&envelope, self.oracle_deadline).await?;
        Ok(OracleReply::parse(&raw))
    }
}
