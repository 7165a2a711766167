//! # Rondo Types
//!
//! Core type definitions for the Rondo SPoS chain.
//!
//! This crate provides the fundamental types used throughout Rondo:
//! - [`H256`] - 32-byte hashes with Keccak256 support
//! - [`Header`] and [`TxBlockBody`] - block structures agreed on per round
//! - [`Blockchain`] - the locally committed chain tip
//!
//! All wire-level structures encode canonically with RLP: the encoding is
//! deterministic, stable across implementations, and reversible.
//!
//! ## Example
//!
//! ```rust
//! use rondo_types::{H256, Header};
//!
//! let hash = H256::keccak256(b"hello world");
//! assert_ne!(hash, H256::NIL);
//!
//! let header = Header::default();
//! let decoded = Header::rlp_decode(&header.rlp_encode()).unwrap();
//! assert_eq!(header, decoded);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod block;
pub mod chain;
pub mod hash;

// Re-export main types at crate root
pub use block::{Header, MiniBlock, TxBlockBody};
pub use chain::Blockchain;
pub use hash::H256;

/// Result type alias for Rondo types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Rondo types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid hash format
    #[error("invalid hash format: {0}")]
    InvalidHash(String),

    /// RLP decoding error
    #[error("RLP decode error: {0}")]
    RlpDecode(#[from] rlp::DecoderError),
}
