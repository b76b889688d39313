// src/history/locks.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Per-(character, user) mutual exclusion.
///
/// Position assignment reads `max(position)` and inserts; concurrent appends
/// for the same pair must serialise around that critical section or produce
/// duplicate positions. Relationship read-modify-writes share the same lock
/// when the same turn updates both. Different pairs never contend.
///
/// Never hold a pair lock across an oracle call.
#[derive(Default)]
pub struct PairLocks {
    locks: Mutex<HashMap<(Uuid, Uuid), Arc<tokio::sync::Mutex<()>>>>,
}

impl PairLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a pair, created on first use and shared thereafter.
    pub fn for_pair(&self, character_id: &Uuid, user_id: &Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry((*character_id, *user_id))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
