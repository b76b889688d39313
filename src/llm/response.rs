// src/llm/response.rs
//! Normalises raw oracle output into the structured reply the rest of the
//! core consumes. The model is asked for strict JSON but replies have been
//! seen fenced, bare, or as plain prose; all three shapes parse.

use serde_json::Value;
use tracing::debug;

use crate::relationship::AffinityDelta;

/// One part of a (possibly multi-part) reply.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ReplyPart {
    pub text: String,
    pub emotion: String,
}

/// A parsed oracle reply.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub text: String,
    pub emotion: String,
    pub relationship_changes: AffinityDelta,
    /// The raw `memory` field, handed to the extractor untouched.
    pub memory: Option<Value>,
    /// Present when the model split its reply into several messages.
    pub parts: Vec<ReplyPart>,
}

impl OracleReply {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if let Some(json) = as_json_object(raw) {
            return Self::from_json(&json, raw);
        }

        Self {
            text: raw.to_string(),
            emotion: detect_emotion(raw),
            relationship_changes: AffinityDelta::default(),
            memory: None,
            parts: Vec::new(),
        }
    }

    fn from_json(json: &Value, raw: &str) -> Self {
        let text = json
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();

        let parts = json
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(ReplyPart {
                            text: s.clone(),
                            emotion: detect_emotion(s),
                        }),
                        Value::Object(_) => {
                            let text = item.get("text")?.as_str()?.to_string();
                            let emotion = item
                                .get("emotion")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| detect_emotion(&text));
                            Some(ReplyPart { text, emotion })
                        }
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        // A reply that is JSON-shaped but carries no text at all falls back
        // to the raw body so the narrative is never lost.
        let text = if text.is_empty() && parts.is_empty() && json.get("text").is_none() {
            raw.to_string()
        } else {
            text
        };

        let emotion = json
            .get("emotion")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| detect_emotion(&text));

        let relationship_changes = json
            .get("relationship_changes")
            .and_then(|v| serde_json::from_value::<AffinityDelta>(v.clone()).ok())
            .unwrap_or_default();

        debug!(
            has_memory = json.get("memory").is_some(),
            parts = parts.len(),
            "parsed oracle reply"
        );

        Self {
            text,
            emotion,
            relationship_changes,
            memory: json.get("memory").cloned(),
            parts,
        }
    }

    /// The narrative surfaced upstream: the single text, or the first part
    /// of a multi-part reply.
    pub fn narrative(&self) -> &str {
        if !self.text.is_empty() {
            &self.text
        } else if let Some(first) = self.parts.first() {
            &first.text
        } else {
            ""
        }
    }
}

/// Strip a ```json fence or accept a bare object.
fn as_json_object(raw: &str) -> Option<Value> {
    let candidate = if raw.starts_with("```") {
        let inner = raw.trim_start_matches("```json").trim_start_matches("```");
        inner.rsplit_once("```").map(|(body, _)| body).unwrap_or(inner).trim()
    } else {
        raw
    };

    if !(candidate.starts_with('{') && candidate.ends_with('}')) {
        return None;
    }
    serde_json::from_str::<Value>(candidate).ok().filter(Value::is_object)
}

/// Keyword fallback when the model omits the emotion field.
pub fn detect_emotion(text: &str) -> String {
    let lowered = text.to_lowercase();
    let keyword_sets: &[(&str, &[&str])] = &[
        ("happy", &["счастлив", "радост", "весел", "здорово", "улыбк", "смех", "хаха", "😊", "😄"]),
        ("sad", &["груст", "печал", "тоск", "жаль", "сожале", "слез", "😢", "😭"]),
        ("excited", &["вау", "невероятно", "потрясающ", "ого", "класс", "ура", "🤩"]),
        ("angry", &["зл", "раздраж", "серд", "гнев", "😠", "😡"]),
        ("surprised", &["удивл", "шокиров", "неожида", "не может быть", "😲", "😮"]),
        ("flirty", &["флирт", "подмиг", "мило", "сладк", "😏", "😉", "😘"]),
    ];

    let mut best = ("neutral", 0usize);
    for (emotion, keywords) in keyword_sets {
        let hits = keywords.iter().filter(|k| lowered.contains(*k)).count();
        if hits > best.1 {
            best = (emotion, hits);
        }
    }
    best.0.to_string()
}
