//! Stable Hashing
//!
//! Every identity that is folded into a cache key or written to a persisted
//! shader cache must be identical across process restarts. `FxHasher` and the
//! default `SipHash` do not give that guarantee, so ids are built with FNV-1a
//! (32 bit for ids, 64 bit for combined asset file hashes) over little-endian
//! bytes. Generated shader source is keyed by xxh3-128.

use std::hash::{Hash, Hasher};

use xxhash_rust::xxh3::{xxh3_64, xxh3_128_with_seed};

pub const FNV1A32_INITIAL_HASH: u32 = 0x811c_9dc5;
pub const FNV1A32_MAGIC_PRIME: u32 = 0x0100_0193;
pub const FNV1A64_INITIAL_HASH: u64 = 0xcbf2_9ce4_8422_2325;
pub const FNV1A64_MAGIC_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Folds `bytes` into an FNV-1a 32 bit hash.
#[inline]
#[must_use]
pub const fn fnv1a32_bytes(bytes: &[u8], mut hash: u32) -> u32 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV1A32_MAGIC_PRIME);
        i += 1;
    }
    hash
}

#[inline]
#[must_use]
pub const fn fnv1a32_u32(value: u32, hash: u32) -> u32 {
    fnv1a32_bytes(&value.to_le_bytes(), hash)
}

#[inline]
#[must_use]
pub const fn fnv1a32_i32(value: i32, hash: u32) -> u32 {
    fnv1a32_bytes(&value.to_le_bytes(), hash)
}

/// Folds `bytes` into an FNV-1a 64 bit hash.
#[inline]
#[must_use]
pub const fn fnv1a64_bytes(bytes: &[u8], mut hash: u64) -> u64 {
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV1A64_MAGIC_PRIME);
        i += 1;
    }
    hash
}

#[inline]
#[must_use]
pub const fn fnv1a64_u64(value: u64, hash: u64) -> u64 {
    fnv1a64_bytes(&value.to_le_bytes(), hash)
}

/// `std::hash::Hasher` adapter over FNV-1a 32.
///
/// Lets `#[derive(Hash)]` mirror types (see `pipeline_key`) produce a stable
/// serialized hash without hand-written folding.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a32Hasher(u32);

impl Default for Fnv1a32Hasher {
    fn default() -> Self {
        Self(FNV1A32_INITIAL_HASH)
    }
}

impl Hasher for Fnv1a32Hasher {
    #[inline]
    fn finish(&self) -> u64 {
        u64::from(self.0)
    }

    #[inline]
    fn write(&mut self, bytes: &[u8]) {
        self.0 = fnv1a32_bytes(bytes, self.0);
    }
}

/// Compute a stable `u32` hash of any `Hash`-able value.
#[inline]
pub fn fnv_hash_key<K: Hash>(key: &K) -> u32 {
    let mut hasher = Fnv1a32Hasher::default();
    key.hash(&mut hasher);
    hasher.0
}

/// xxh3-128 of generated shader source, seeded with the shader stage so that
/// byte-identical text compiled for two different stages never collides.
#[inline]
#[must_use]
pub fn source_code_hash(source_code: &str, seed: u64) -> u128 {
    xxh3_128_with_seed(source_code.as_bytes(), seed)
}

/// Content hash of an asset file, recorded for cache invalidation.
#[inline]
#[must_use]
pub fn file_content_hash(bytes: &[u8]) -> u64 {
    xxh3_64(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a32_reference_vectors() {
        assert_eq!(fnv1a32_bytes(b"", FNV1A32_INITIAL_HASH), 0x811c_9dc5);
        assert_eq!(fnv1a32_bytes(b"a", FNV1A32_INITIAL_HASH), 0xe40c_292c);
    }

    #[test]
    fn fnv1a64_reference_vectors() {
        assert_eq!(fnv1a64_bytes(b"", FNV1A64_INITIAL_HASH), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a64_bytes(b"a", FNV1A64_INITIAL_HASH), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn folding_is_order_sensitive() {
        let ab = fnv1a32_u32(2, fnv1a32_u32(1, FNV1A32_INITIAL_HASH));
        let ba = fnv1a32_u32(1, fnv1a32_u32(2, FNV1A32_INITIAL_HASH));
        assert_ne!(ab, ba);
    }

    #[test]
    fn hasher_matches_byte_folding() {
        let mut hasher = Fnv1a32Hasher::default();
        hasher.write(b"abc");
        assert_eq!(
            hasher.finish(),
            u64::from(fnv1a32_bytes(b"abc", FNV1A32_INITIAL_HASH))
        );
    }

    #[test]
    fn source_hash_depends_on_seed() {
        let source = "fn main() {}";
        assert_eq!(source_code_hash(source, 0), source_code_hash(source, 0));
        assert_ne!(source_code_hash(source, 0), source_code_hash(source, 4));
    }
}
