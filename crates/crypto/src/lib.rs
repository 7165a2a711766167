//! # Rondo Crypto
//!
//! Cryptographic primitives for the Rondo SPoS chain.
//!
//! This crate provides:
//! - **Keccak256 hashing** - used for all digests
//! - **Schnorr signatures** - secp256k1 signing and verification with
//!   deterministic nonces, used for consensus record envelopes
//! - **Interactive multi-signing** - the commitment / commitment-hash /
//!   reveal / partial-signature / aggregation protocol that produces a
//!   round's block certificate
//!
//! ## Example
//!
//! ```rust
//! use rondo_crypto::{keccak256, SchnorrSecretKey};
//!
//! let hash = keccak256(b"hello world");
//! assert_eq!(hash.len(), 32);
//!
//! let secret = SchnorrSecretKey::random();
//! let signature = secret.sign(b"message");
//! assert!(secret.public_key().verify(b"message", &signature));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod hash;
pub mod multisig;
pub mod schnorr;

// Re-export commonly used items
pub use hash::{keccak256, keccak256_concat, Hasher};
pub use multisig::{MultiSigError, MultiSigner, COMMITMENT_LEN, SIGNATURE_SHARE_LEN};
pub use schnorr::{SchnorrPublicKey, SchnorrSecretKey, SchnorrSignature};

/// Error types for cryptographic operations
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid private key bytes
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Invalid public key bytes
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid signature bytes
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Invalid input length
    #[error("invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

/// Result type for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;
