//! Deterministic String Identifiers
//!
//! A [`StringId`] is the FNV-1a 32 bit hash of a name. Unlike an interned
//! symbol its value does not depend on interning order, so it can be folded
//! into persisted cache keys and compared across process restarts.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::hash::{FNV1A32_INITIAL_HASH, fnv1a32_bytes};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StringId(u32);

impl StringId {
    /// Marker for an unset id, also used as "alias" tag in cache blobs.
    pub const UNINITIALIZED: u32 = u32::MAX;

    #[inline]
    #[must_use]
    pub const fn new(name: &str) -> Self {
        Self(fnv1a32_bytes(name.as_bytes(), FNV1A32_INITIAL_HASH))
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }
}

impl From<&str> for StringId {
    #[inline]
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Identifies a shader blueprint, shader piece or material blueprint asset.
pub type AssetId = StringId;
/// Identifies a shader property (`USE_SKINNING`, `NUM_LIGHTS`, ...).
pub type ShaderPropertyId = StringId;
/// Identifies a named shader piece (`@piece(name)` / `@insertpiece(name)`).
pub type ShaderPieceId = StringId;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_id() {
        assert_eq!(StringId::new("USE_SKINNING"), StringId::from("USE_SKINNING"));
        assert_ne!(StringId::new("USE_SKINNING"), StringId::new("NUM_LIGHTS"));
    }

    #[test]
    fn id_is_fnv1a32_of_name() {
        assert_eq!(StringId::new("a").id(), 0xe40c_292c);
        assert_eq!(StringId::from_raw(7).id(), 7);
    }

    #[test]
    fn usable_in_const_context() {
        const ID: StringId = StringId::new("NUM_LIGHTS");
        assert_eq!(ID, StringId::new("NUM_LIGHTS"));
    }
}
