// src/relationship/mod.rs
//! Per-(user, character) affinity tracking and the coarse stage derived
//! from it.

pub mod service;

pub use service::RelationshipTracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The most a single turn may move one dimension.
pub const MAX_TURN_DELTA: f64 = 0.2;

/// Per-dimension gift multipliers applied to a gift's advertised effect.
pub const GIFT_ALPHA_GENERAL: f64 = 0.01;
pub const GIFT_ALPHA_FRIENDSHIP: f64 = 0.007;
pub const GIFT_ALPHA_ROMANCE: f64 = 0.003;
pub const GIFT_ALPHA_TRUST: f64 = 0.005;

/// Coarse relationship stage, a pure function of the affinities. These are
/// internal identifiers; localisation happens at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Strangers,
    Acquaintances,
    Friends,
    Close,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Strangers => "strangers",
            Stage::Acquaintances => "acquaintances",
            Stage::Friends => "friends",
            Stage::Close => "close",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "close" => Stage::Close,
            "friends" => Stage::Friends,
            "strangers" => Stage::Strangers,
            _ => Stage::Acquaintances,
        }
    }
}

/// Bounded affinity components, each in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipState {
    pub user_id: Uuid,
    pub character_id: Uuid,
    pub general: f64,
    pub friendship: f64,
    pub romance: f64,
    pub trust: f64,
    pub stage: Stage,
    pub updated_at: DateTime<Utc>,
}

impl RelationshipState {
    /// Fresh pairs start mid-scale on general and cold everywhere else.
    pub fn initial(user_id: Uuid, character_id: Uuid) -> Self {
        let mut state = Self {
            user_id,
            character_id,
            general: 0.5,
            friendship: 0.0,
            romance: 0.0,
            trust: 0.0,
            stage: Stage::Acquaintances,
            updated_at: Utc::now(),
        };
        state.stage = state.derive_stage();
        state
    }

    pub fn derive_stage(&self) -> Stage {
        if self.friendship >= 0.8 && self.romance >= 0.8 {
            Stage::Close
        } else if self.general >= 0.6 {
            Stage::Friends
        } else if self.general >= 0.2 {
            Stage::Acquaintances
        } else {
            Stage::Strangers
        }
    }

    /// Apply a delta with per-turn clipping and saturation into [0, 1].
    pub fn apply(&mut self, delta: &AffinityDelta) {
        self.general = saturate(self.general, clip(delta.general));
        self.friendship = saturate(self.friendship, clip(delta.friendship));
        self.romance = saturate(self.romance, clip(delta.romance));
        self.trust = saturate(self.trust, clip(delta.trust));
        self.stage = self.derive_stage();
        self.updated_at = Utc::now();
    }

    /// One-line rendering for the prompt envelope, affinities at 2 decimals.
    pub fn summary(&self) -> String {
        format!(
            "Стадия отношений: {} (general: {:.2}, friendship: {:.2}, romance: {:.2}, trust: {:.2})",
            self.stage.as_str(),
            self.general,
            self.friendship,
            self.romance,
            self.trust,
        )
    }
}

/// A change to the four affinities, as reported by the oracle or derived
/// from a gift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AffinityDelta {
    #[serde(default)]
    pub general: f64,
    #[serde(default)]
    pub friendship: f64,
    #[serde(default)]
    pub romance: f64,
    #[serde(default)]
    pub trust: f64,
}

impl AffinityDelta {
    pub fn for_gift(effect: i64) -> Self {
        let effect = effect as f64;
        Self {
            general: effect * GIFT_ALPHA_GENERAL,
            friendship: effect * GIFT_ALPHA_FRIENDSHIP,
            romance: effect * GIFT_ALPHA_ROMANCE,
            trust: effect * GIFT_ALPHA_TRUST,
        }
    }

    /// The clipped delta that would actually be applied.
    pub fn clipped(&self) -> Self {
        Self {
            general: clip(self.general),
            friendship: clip(self.friendship),
            romance: clip(self.romance),
            trust: clip(self.trust),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.general == 0.0 && self.friendship == 0.0 && self.romance == 0.0 && self.trust == 0.0
    }
}

fn clip(delta: f64) -> f64 {
    delta.clamp(-MAX_TURN_DELTA, MAX_TURN_DELTA)
}

fn saturate(value: f64, delta: f64) -> f64 {
    (value + delta).clamp(0.0, 1.0)
}
