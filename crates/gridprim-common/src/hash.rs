use core::hash::Hasher;
use derive_more::{Deref, DerefMut};

pub use u128 as StableHash;
use xxhash_rust::const_xxh3;

/// Stable hasher, the output only depends on the bytes written to it.
///
/// # Important
/// *Do not call the [`Hasher::finish`] method. It will panic.*
/// Use [`StableHasher::finalize`] instead.
#[derive(Default, Deref, DerefMut)]
pub struct StableHasher(xxhash_rust::xxh3::Xxh3Default);

impl StableHasher {
    /// Create a new stable hasher
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash a byte slice in a const context.
    pub const fn const_hash(value: &[u8]) -> StableHash {
        const_xxh3::xxh3_128(value)
    }

    /// Hash a byte slice and return the digest as a fixed width hex string.
    pub fn hex_digest(value: &[u8]) -> String {
        let mut hasher = Self::new();
        hasher.write(value);
        format!("{:032x}", hasher.finalize())
    }

    /// Finalize and return the hash
    pub fn finalize(&self) -> StableHash {
        self.0.digest128()
    }
}

impl Hasher for StableHasher {
    fn finish(&self) -> u64 {
        unimplemented!("Can't finish to `u64`, use `StableHasher::finalize`")
    }

    fn write(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_is_stable_and_fixed_width() {
        let first = StableHasher::hex_digest(b"radixsort");
        let second = StableHasher::hex_digest(b"radixsort");

        assert_eq!(first, second);
        assert_eq!(first.len(), 32);
        assert_ne!(first, StableHasher::hex_digest(b"scan"));
    }

    #[test]
    fn const_hash_matches_streaming_hash() {
        let mut hasher = StableHasher::new();
        hasher.write(b"reduce");
        hasher.write(b"_v1");

        assert_eq!(hasher.finalize(), StableHasher::const_hash(b"reduce_v1"));
    }
}
