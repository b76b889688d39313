// src/history/mod.rs
//! Conversation log: positional per-pair history plus the boundary
//! messages projection.

pub mod locks;
pub mod messages;
pub mod store;
pub mod types;

pub use locks::PairLocks;
pub use messages::{MessageStore, NewMessage};
pub use store::HistoryStore;
pub use types::{ChatHistoryRow, Message, NewTurn, Participant, Role};
