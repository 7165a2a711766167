//! Keccak256 hashing utilities.
//!
//! This module provides the hash functions used throughout Rondo:
//!
//! - `keccak256` - hash a single byte slice
//! - `keccak256_concat` - hash multiple byte slices concatenated
//! - [`Hasher`] - a streaming hasher for incremental data

use sha3::{Digest, Keccak256};

/// Compute the Keccak256 hash of the input data.
///
/// # Example
///
/// ```rust
/// use rondo_crypto::keccak256;
///
/// let hash = keccak256(b"hello");
/// assert_eq!(hash.len(), 32);
/// ```
#[inline]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the Keccak256 hash of multiple concatenated inputs.
///
/// This is more efficient than manually concatenating the inputs and then
/// hashing, as it avoids allocating a temporary buffer.
#[inline]
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// A streaming Keccak256 hasher for incremental hashing.
///
/// # Example
///
/// ```rust
/// use rondo_crypto::Hasher;
///
/// let mut hasher = Hasher::new();
/// hasher.update(b"part1");
/// hasher.update(b"part2");
/// let hash = hasher.finalize();
/// ```
#[derive(Clone, Default)]
pub struct Hasher {
    inner: Keccak256,
}

impl Hasher {
    /// Create a new Keccak256 hasher.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the hasher with additional data.
    #[inline]
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finalize the hasher and return the hash.
    #[inline]
    pub fn finalize(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hasher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        // Known hash of empty input
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak256_concat_equivalence() {
        assert_eq!(
            keccak256(b"hello world"),
            keccak256_concat(&[b"hello", b" ", b"world"])
        );
    }

    #[test]
    fn test_hasher_streaming() {
        let mut hasher = Hasher::new();
        hasher.update(b"hello");
        hasher.update(b" world");
        assert_eq!(hasher.finalize(), keccak256(b"hello world"));
    }
}
