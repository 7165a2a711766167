//! Block structures agreed on by the consensus group.
//!
//! This module provides the block-related types:
//! - [`Header`] - the per-round block header carrying the aggregated
//!   multi-signature certificate
//! - [`TxBlockBody`] and [`MiniBlock`] - the transaction content for the
//!   local shard, opaque to consensus

use crate::{Error, Result, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A block header.
///
/// One header is produced per successful consensus round. The
/// `signature` and `pub_keys_bitmap` fields form the round certificate:
/// they are empty while the header circulates during the round and are
/// attached when the round commits.
///
/// Within a round the following invariants hold:
/// - `block_body_hash = keccak256(rlp(body))`
/// - the header hash is computed with the certificate fields cleared, so
///   attaching the certificate does not change the header's identity
/// - `nonce = tip.nonce + 1`, except the first block after genesis which
///   has `nonce = 1` and a nil `prev_hash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Header {
    /// Sequence number of the block, one above the local tip
    pub nonce: u64,
    /// Consensus round index in which the block was proposed
    pub round: u64,
    /// Proposer-local unix timestamp in seconds
    pub timestamp: u64,
    /// Hash of the previous block header (nil for the first block)
    pub prev_hash: H256,
    /// Hash of the canonical encoding of the block body
    pub block_body_hash: H256,
    /// Aggregated multi-signature over the header hash (empty until commit)
    #[serde(with = "serde_bytes_hex")]
    pub signature: Vec<u8>,
    /// Bitmap of the validators whose partial signatures were aggregated
    #[serde(with = "serde_bytes_hex")]
    pub pub_keys_bitmap: Vec<u8>,
}

impl Header {
    /// Creates a new uncertified header.
    pub fn new(nonce: u64, round: u64, timestamp: u64, prev_hash: H256) -> Self {
        Self {
            nonce,
            round,
            timestamp,
            prev_hash,
            ..Default::default()
        }
    }

    /// Computes the hash of this header.
    ///
    /// The hash is the Keccak256 of the RLP encoding with the certificate
    /// fields (`signature`, `pub_keys_bitmap`) cleared, so a certified and
    /// an uncertified copy of the same header hash identically.
    pub fn hash(&self) -> H256 {
        let mut bare = self.clone();
        bare.signature.clear();
        bare.pub_keys_bitmap.clear();
        H256::keccak256(&bare.rlp_encode())
    }

    /// RLP encodes the header.
    pub fn rlp_encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Decodes a header from RLP bytes.
    pub fn rlp_decode(data: &[u8]) -> Result<Self> {
        rlp::decode(data).map_err(Error::RlpDecode)
    }

    /// True once the aggregated signature has been attached.
    pub fn is_certified(&self) -> bool {
        !self.signature.is_empty()
    }
}

impl Encodable for Header {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(7);
        s.append(&self.nonce);
        s.append(&self.round);
        s.append(&self.timestamp);
        s.append(&self.prev_hash);
        s.append(&self.block_body_hash);
        s.append(&self.signature);
        s.append(&self.pub_keys_bitmap);
    }
}

impl Decodable for Header {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 7 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            nonce: rlp.val_at(0)?,
            round: rlp.val_at(1)?,
            timestamp: rlp.val_at(2)?,
            prev_hash: rlp.val_at(3)?,
            block_body_hash: rlp.val_at(4)?,
            signature: rlp.val_at(5)?,
            pub_keys_bitmap: rlp.val_at(6)?,
        })
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Header(nonce={}, round={}, hash={})",
            self.nonce,
            self.round,
            self.hash().short_hex()
        )
    }
}

/// A group of transaction hashes destined for one shard.
///
/// Transactions themselves live in the pool; consensus only carries their
/// hashes and leaves execution to the block processor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MiniBlock {
    /// Destination shard of the transactions
    pub shard_id: u32,
    /// Hashes of the included transactions, in execution order
    pub tx_hashes: Vec<H256>,
}

impl Encodable for MiniBlock {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append(&self.shard_id);
        s.begin_list(self.tx_hashes.len());
        for hash in &self.tx_hashes {
            s.append(hash);
        }
    }
}

impl Decodable for MiniBlock {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 2 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            shard_id: rlp.val_at(0)?,
            tx_hashes: rlp.list_at(1)?,
        })
    }
}

/// The transaction content of one block, as an ordered sequence of
/// mini-blocks for the local shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxBlockBody {
    /// The mini-blocks, in order
    pub mini_blocks: Vec<MiniBlock>,
}

impl TxBlockBody {
    /// Creates a body from a list of mini-blocks.
    pub fn new(mini_blocks: Vec<MiniBlock>) -> Self {
        Self { mini_blocks }
    }

    /// Computes the hash of the canonical encoding of this body.
    pub fn hash(&self) -> H256 {
        H256::keccak256(&self.rlp_encode())
    }

    /// RLP encodes the body.
    pub fn rlp_encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Decodes a body from RLP bytes.
    pub fn rlp_decode(data: &[u8]) -> Result<Self> {
        rlp::decode(data).map_err(Error::RlpDecode)
    }

    /// Total number of transactions across all mini-blocks.
    pub fn tx_count(&self) -> usize {
        self.mini_blocks.iter().map(|mb| mb.tx_hashes.len()).sum()
    }
}

impl Encodable for TxBlockBody {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(self.mini_blocks.len());
        for mb in &self.mini_blocks {
            s.append(mb);
        }
    }
}

impl Decodable for TxBlockBody {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        Ok(Self {
            mini_blocks: rlp.as_list()?,
        })
    }
}

mod serde_bytes_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> TxBlockBody {
        TxBlockBody::new(vec![MiniBlock {
            shard_id: 0,
            tx_hashes: vec![H256::keccak256(b"tx-1"), H256::keccak256(b"tx-2")],
        }])
    }

    #[test]
    fn test_header_rlp_round_trip() {
        let mut header = Header::new(7, 12, 1_700_000_000, H256::keccak256(b"prev"));
        header.block_body_hash = sample_body().hash();
        let decoded = Header::rlp_decode(&header.rlp_encode()).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_header_hash_ignores_certificate() {
        let mut header = Header::new(3, 3, 42, H256::NIL);
        let bare_hash = header.hash();

        header.signature = vec![0xaa; 65];
        header.pub_keys_bitmap = vec![0b0000_0111];
        assert_eq!(header.hash(), bare_hash);
        assert!(header.is_certified());
    }

    #[test]
    fn test_header_hash_covers_content() {
        let header = Header::new(3, 3, 42, H256::NIL);
        let mut other = header.clone();
        other.nonce += 1;
        assert_ne!(header.hash(), other.hash());
    }

    #[test]
    fn test_body_rlp_round_trip() {
        let body = sample_body();
        let decoded = TxBlockBody::rlp_decode(&body.rlp_encode()).unwrap();
        assert_eq!(body, decoded);
        assert_eq!(decoded.tx_count(), 2);
    }

    #[test]
    fn test_empty_body_round_trip() {
        let body = TxBlockBody::default();
        let decoded = TxBlockBody::rlp_decode(&body.rlp_encode()).unwrap();
        assert_eq!(body, decoded);
        assert_eq!(decoded.tx_count(), 0);
    }
}
