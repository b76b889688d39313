// src/memory/extractor.rs
//! Lifts structured facts out of assistant turns.
//!
//! The oracle is asked to attach a `memory` array to every reply; when it
//! does, that array is the source of truth. When it does not, a lightweight
//! pattern pass over the narrative recovers facts for a known set of
//! categories. Extraction never fails a turn: anything unparseable is
//! logged and dropped.

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::memory::types::{DEFAULT_IMPORTANCE, MemoryCandidate};

const RECOVERED_IMPORTANCE: i64 = 5;

/// Words the name pattern keeps matching that are never names.
const NAME_STOPLIST: &[&str] = &[
    "привет", "меня", "зовут", "хочу", "тебя", "знаю", "имя", "память", "как", "все", "мое",
    "нет", "люблю", "завтра", "сегодня",
];

pub struct MemoryExtractor {
    name: Regex,
    age: Regex,
    job: Regex,
    location: Regex,
    hobby: Regex,
    meeting: Regex,
}

impl MemoryExtractor {
    pub fn new() -> Self {
        // The patterns are anchored on the phrases users actually type;
        // loosening them floods the store with junk facts.
        Self {
            name: Regex::new(r"(?i)(?:меня зовут|моё имя|мое имя)\s+([А-ЯЁа-яё]{3,})").unwrap(),
            age: Regex::new(r"(?i)(?:мне|мой возраст)\s+(\d{1,2})\s*(?:лет|год|года)?").unwrap(),
            job: Regex::new(r"(?i)(?:я работаю|моя профессия|я по профессии)\s+([^.,!?\n]+)")
                .unwrap(),
            location: Regex::new(r"(?i)(?:я живу в|я из|проживаю в)\s+([А-ЯЁа-яё]+)").unwrap(),
            hobby: Regex::new(r"(?i)(?:я увлекаюсь|моё хобби|мое хобби|обожаю)\s+([^.,!?\n]+)")
                .unwrap(),
            meeting: Regex::new(
                r"(?i)(?:свидание|встреча|встретимся|увидимся)[^.!?\n]*(?:завтра|сегодня|послезавтра)",
            )
            .unwrap(),
        }
    }

    /// Candidates for a turn: the structured block when present, the
    /// pattern pass otherwise.
    pub fn extract(&self, memory_block: Option<&Value>, narrative: &str) -> Vec<MemoryCandidate> {
        if let Some(block) = memory_block {
            let structured = parse_memory_block(block);
            if !structured.is_empty() {
                debug!(count = structured.len(), "extracted memories from structured block");
                return structured;
            }
        }
        self.extract_from_text(narrative)
    }

    /// Pattern pass over narrative text. Recovered items receive the fixed
    /// fallback importance.
    pub fn extract_from_text(&self, text: &str) -> Vec<MemoryCandidate> {
        let mut candidates = Vec::new();

        if let Some(captures) = self.name.captures(text) {
            let name = captures[1].trim().to_string();
            if name.chars().count() >= 3 && !NAME_STOPLIST.contains(&name.to_lowercase().as_str()) {
                candidates.push(MemoryCandidate::new(
                    "personal_info",
                    "name",
                    format!("Имя пользователя: {}", capitalize(&name)),
                    RECOVERED_IMPORTANCE,
                ));
            }
        }

        if let Some(captures) = self.age.captures(text) {
            candidates.push(MemoryCandidate::new(
                "personal_info",
                "age",
                format!("Возраст: {}", &captures[1]),
                RECOVERED_IMPORTANCE,
            ));
        }

        if let Some(captures) = self.job.captures(text) {
            candidates.push(MemoryCandidate::new(
                "personal_info",
                "job",
                format!("Профессия пользователя: {}", captures[1].trim()),
                RECOVERED_IMPORTANCE,
            ));
        }

        if let Some(captures) = self.location.captures(text) {
            candidates.push(MemoryCandidate::new(
                "personal_info",
                "location",
                format!("Место проживания пользователя: {}", captures[1].trim()),
                RECOVERED_IMPORTANCE,
            ));
        }

        if let Some(captures) = self.hobby.captures(text) {
            candidates.push(MemoryCandidate::new(
                "personal_info",
                "hobby",
                format!("Хобби пользователя: {}", captures[1].trim()),
                RECOVERED_IMPORTANCE,
            ));
        }

        if let Some(found) = self.meeting.find(text) {
            candidates.push(MemoryCandidate::new(
                "date",
                "meeting",
                format!("Запланированная встреча: {}", found.as_str().trim()),
                RECOVERED_IMPORTANCE,
            ));
        }

        dedup(candidates)
    }
}

impl Default for MemoryExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalise the oracle's `memory` field. It should be an array of objects,
/// but replies have been seen carrying a lone object, a JSON string, or
/// items missing fields.
fn parse_memory_block(block: &Value) -> Vec<MemoryCandidate> {
    let items: Vec<Value> = match block {
        Value::Array(items) => items.clone(),
        Value::Object(_) => vec![block.clone()],
        Value::String(raw) => match serde_json::from_str::<Value>(raw) {
            Ok(parsed) => return parse_memory_block(&parsed),
            Err(e) => {
                warn!("unparseable memory block string: {}", e);
                return Vec::new();
            }
        },
        _ => return Vec::new(),
    };

    items
        .into_iter()
        .filter_map(|item| {
            let object = item.as_object()?;
            let content = object.get("content")?.as_str()?.trim().to_string();
            if content.is_empty() {
                return None;
            }
            Some(MemoryCandidate {
                memory_type: object
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                category: object
                    .get("category")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                content,
                importance: object
                    .get("importance")
                    .and_then(Value::as_i64)
                    .unwrap_or(DEFAULT_IMPORTANCE),
            })
        })
        .collect()
}

fn dedup(candidates: Vec<MemoryCandidate>) -> Vec<MemoryCandidate> {
    let mut seen: Vec<String> = Vec::new();
    let mut unique = Vec::new();
    for candidate in candidates {
        let key = format!("{}:{}:{}", candidate.memory_type, candidate.category, candidate.content);
        if !seen.contains(&key) {
            seen.push(key);
            unique.push(candidate);
        }
    }
    unique
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_structured_block_wins() {
        let extractor = MemoryExtractor::new();
        let block = json!([
            {"type": "personal_info", "category": "name", "content": "Имя пользователя: Пётр", "importance": 8}
        ]);
        let candidates = extractor.extract(Some(&block), "меня зовут Иван");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].content, "Имя пользователя: Пётр");
        assert_eq!(candidates[0].importance, 8);
    }

    #[test]
    fn test_pattern_pass_recovers_name_and_age() {
        let extractor = MemoryExtractor::new();
        let candidates = extractor.extract(None, "меня зовут Пётр, мне 31 год");
        assert!(candidates.iter().any(|c| c.content == "Имя пользователя: Пётр"));
        assert!(candidates.iter().any(|c| c.content == "Возраст: 31"));
        assert!(candidates.iter().all(|c| c.importance == RECOVERED_IMPORTANCE));
    }

    #[test]
    fn test_stoplist_filters_false_names() {
        let extractor = MemoryExtractor::new();
        let candidates = extractor.extract_from_text("меня зовут завтра на встречу");
        assert!(!candidates.iter().any(|c| c.category == "name"));
    }

    #[test]
    fn test_meeting_detection() {
        let extractor = MemoryExtractor::new();
        let candidates = extractor.extract_from_text("у нас свидание завтра вечером");
        assert!(candidates.iter().any(|c| c.memory_type == "date" && c.category == "meeting"));
    }

    #[test]
    fn test_lone_object_and_string_blocks() {
        let block = json!({"type": "fact", "category": "general", "content": "Любит кофе"});
        assert_eq!(parse_memory_block(&block).len(), 1);

        let as_string = json!(r#"[{"type":"fact","content":"Любит чай"}]"#);
        let parsed = parse_memory_block(&as_string);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].content, "Любит чай");
    }

    #[test]
    fn test_entries_without_content_dropped() {
        let block = json!([{"type": "fact"}, {"content": ""}]);
        assert!(parse_memory_block(&block).is_empty());
    }
}
