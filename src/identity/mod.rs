// src/identity/mod.rs
//! Deterministic mapping between external platform identifiers and internal
//! opaque ids, plus the user directory built on top of it.

pub mod store;

pub use store::UserStore;

use uuid::Uuid;

/// Namespace for deterministic conversion of external ids. Changing this
/// value orphans every previously mapped user.
pub const USER_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0xc7, 0xe7, 0xf1, 0xd0, 0x5a, 0x5d, 0x5a, 0x5e, 0xa2, 0xb0, 0x91, 0x4b, 0x8c, 0x42, 0xa3, 0xd7,
]);

/// The reserved user id that owns orphaned or unattributed records.
pub const SYSTEM_USER_ID: Uuid = Uuid::nil();

/// Map an external identifier (messaging-platform numeric id, account name,
/// already-internal uuid) to the internal 128-bit id.
///
/// The mapping is total and stable: the same input yields the same id across
/// processes, and an input that already is a canonical uuid maps to itself.
pub fn internal_id_of(external_id: &str) -> Uuid {
    let trimmed = external_id.trim();
    if let Ok(uuid) = Uuid::parse_str(trimmed) {
        return uuid;
    }
    Uuid::new_v5(&USER_ID_NAMESPACE, trimmed.as_bytes())
}

/// Last hyphen-separated segment of an id's canonical text form. Historical
/// rows sometimes carry only this suffix, so lookups try it as a final tier.
pub fn id_suffix(id: &Uuid) -> String {
    let text = id.to_string();
    text.rsplit('-').next().unwrap_or(&text).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_is_deterministic() {
        let a = internal_id_of("123456789");
        let b = internal_id_of("123456789");
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_inputs_diverge() {
        assert_ne!(internal_id_of("123456789"), internal_id_of("123456790"));
        assert_ne!(internal_id_of("alice"), internal_id_of("bob"));
    }

    #[test]
    fn test_uuid_input_maps_to_itself() {
        let id = Uuid::new_v4();
        assert_eq!(internal_id_of(&id.to_string()), id);
    }

    #[test]
    fn test_suffix() {
        let id = Uuid::parse_str("c7cb5b5c-e469-586e-8e87-000123456789").unwrap();
        assert_eq!(id_suffix(&id), "000123456789");
    }
}
