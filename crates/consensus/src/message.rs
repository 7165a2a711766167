//! The signed consensus record envelope.
//!
//! A [`ConsensusRecord`] is the wire-level unit exchanged between the
//! validators of a round. Encoding is canonical RLP with the fields in
//! fixed order, so the bytes a sender signs are exactly the bytes a
//! verifier reproduces after clearing the signature field.

use crate::subround::MessageKind;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use rondo_crypto::{SchnorrPublicKey, SchnorrSecretKey, SchnorrSignature};
use rondo_types::H256;
use std::fmt;

/// Errors produced while encoding, decoding or verifying records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// RLP decoding failed
    #[error("record decode error: {0}")]
    Decode(#[from] DecoderError),

    /// The sender public key field is empty
    #[error("record has no sender public key")]
    MissingPublicKey,

    /// The sender public key is not a valid curve point
    #[error("record has an invalid sender public key")]
    InvalidPublicKey,

    /// The record is not signed
    #[error("record has no signature")]
    MissingSignature,

    /// The signature bytes are malformed
    #[error("record has a malformed signature")]
    MalformedSignature,

    /// The signature does not verify against the sender public key
    #[error("record signature verification failed")]
    InvalidSignature,

    /// A fixed-length field has the wrong length
    #[error("invalid field length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },
}

/// The data needed to communicate between the validators of a round, in
/// every subround.
///
/// `header_hash` binds a record to the round's consensus data (the
/// proposed header's hash); it is absent only on `BlockBody` records.
/// `signature` is the sender's Schnorr signature over the record encoded
/// with the signature field cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusRecord {
    /// Hash of the proposed block header this record refers to
    pub header_hash: Option<H256>,
    /// Opaque subround payload
    pub payload: Vec<u8>,
    /// Sender public key (x-only Schnorr encoding)
    pub pub_key: Vec<u8>,
    /// Sender signature over the record; `None` until signed
    pub signature: Option<Vec<u8>>,
    /// Payload kind
    pub kind: MessageKind,
    /// Sender-local unix timestamp in seconds
    pub timestamp: u64,
}

impl ConsensusRecord {
    /// Creates a new unsigned record.
    pub fn new(
        header_hash: Option<H256>,
        payload: Vec<u8>,
        pub_key: Vec<u8>,
        kind: MessageKind,
        timestamp: u64,
    ) -> Self {
        Self {
            header_hash,
            payload,
            pub_key,
            signature: None,
            kind,
            timestamp,
        }
    }

    /// RLP encodes the record.
    pub fn rlp_encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    /// Decodes a record from RLP bytes.
    pub fn rlp_decode(data: &[u8]) -> Result<Self, RecordError> {
        Ok(rlp::decode(data)?)
    }

    /// The exact bytes covered by the sender signature: the record encoded
    /// with the signature field cleared.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut unsigned = self.clone();
        unsigned.signature = None;
        unsigned.rlp_encode()
    }

    /// Signs the record in place with the sender secret key.
    pub fn sign(&mut self, secret: &SchnorrSecretKey) {
        let signature = secret.sign(&self.signing_bytes());
        self.signature = Some(signature.to_bytes().to_vec());
    }

    /// Verifies the sender signature.
    ///
    /// Rejects records with a missing sender key, a missing signature, or
    /// a signature that does not verify against the re-encoded record.
    pub fn verify_signature(&self) -> Result<(), RecordError> {
        if self.pub_key.is_empty() {
            return Err(RecordError::MissingPublicKey);
        }
        let pub_key = SchnorrPublicKey::from_bytes(&self.pub_key)
            .map_err(|_| RecordError::InvalidPublicKey)?;

        let sig_bytes = self
            .signature
            .as_deref()
            .ok_or(RecordError::MissingSignature)?;
        let signature = SchnorrSignature::from_bytes(sig_bytes)
            .map_err(|_| RecordError::MalformedSignature)?;

        if pub_key.verify(&self.signing_bytes(), &signature) {
            Ok(())
        } else {
            Err(RecordError::InvalidSignature)
        }
    }
}

impl Encodable for ConsensusRecord {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(6);
        match &self.header_hash {
            Some(hash) => s.append(hash),
            None => s.append_empty_data(),
        };
        s.append(&self.payload);
        s.append(&self.pub_key);
        match &self.signature {
            Some(signature) => s.append(signature),
            None => s.append_empty_data(),
        };
        s.append(&self.kind.as_u8());
        s.append(&self.timestamp);
    }
}

impl Decodable for ConsensusRecord {
    fn decode(rlp: &Rlp<'_>) -> Result<Self, DecoderError> {
        if rlp.item_count()? != 6 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let header_hash_bytes: Vec<u8> = rlp.val_at(0)?;
        let header_hash = if header_hash_bytes.is_empty() {
            None
        } else {
            Some(
                H256::from_slice(&header_hash_bytes)
                    .map_err(|_| DecoderError::Custom("header hash must be 32 bytes"))?,
            )
        };
        let signature_bytes: Vec<u8> = rlp.val_at(3)?;
        let signature = if signature_bytes.is_empty() {
            None
        } else {
            Some(signature_bytes)
        };
        Ok(Self {
            header_hash,
            payload: rlp.val_at(1)?,
            pub_key: rlp.val_at(2)?,
            signature,
            kind: MessageKind::from_u8(rlp.val_at::<u8>(4)?),
            timestamp: rlp.val_at(5)?,
        })
    }
}

impl fmt::Display for ConsensusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConsensusRecord({}, sender=0x{}, signed={})",
            self.kind,
            hex::encode(&self.pub_key[..self.pub_key.len().min(4)]),
            self.signature.is_some(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(kind: MessageKind) -> ConsensusRecord {
        let header_hash = match kind {
            MessageKind::BlockBody => None,
            _ => Some(H256::keccak256(b"header")),
        };
        ConsensusRecord::new(
            header_hash,
            b"payload".to_vec(),
            SchnorrSecretKey::from_seed(&[5u8; 32])
                .public_key()
                .to_bytes()
                .to_vec(),
            kind,
            1_700_000_000,
        )
    }

    #[test]
    fn test_rlp_round_trip_unsigned() {
        for kind in MessageKind::ROUTED {
            let record = sample_record(kind);
            let decoded = ConsensusRecord::rlp_decode(&record.rlp_encode()).unwrap();
            assert_eq!(record, decoded);
        }
    }

    #[test]
    fn test_sign_then_verify() {
        let secret = SchnorrSecretKey::from_seed(&[5u8; 32]);
        let mut record = sample_record(MessageKind::CommitmentHash);
        record.sign(&secret);

        let decoded = ConsensusRecord::rlp_decode(&record.rlp_encode()).unwrap();
        decoded.verify_signature().unwrap();
    }

    #[test]
    fn test_cleared_record_reencodes_to_signed_bytes() {
        let secret = SchnorrSecretKey::from_seed(&[5u8; 32]);
        let mut record = sample_record(MessageKind::Signature);
        let unsigned_bytes = record.rlp_encode();
        record.sign(&secret);

        assert_eq!(record.signing_bytes(), unsigned_bytes);
    }

    #[test]
    fn test_signing_is_idempotent() {
        let secret = SchnorrSecretKey::from_seed(&[5u8; 32]);
        let mut record = sample_record(MessageKind::Commitment);
        record.sign(&secret);
        let first = record.signature.clone();

        record.signature = None;
        record.sign(&secret);
        assert_eq!(record.signature, first);
    }

    #[test]
    fn test_verify_rejects_missing_fields() {
        let record = sample_record(MessageKind::Bitmap);
        assert!(matches!(
            record.verify_signature(),
            Err(RecordError::MissingSignature)
        ));

        let mut keyless = record.clone();
        keyless.pub_key.clear();
        assert!(matches!(
            keyless.verify_signature(),
            Err(RecordError::MissingPublicKey)
        ));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let secret = SchnorrSecretKey::from_seed(&[5u8; 32]);
        let mut record = sample_record(MessageKind::CommitmentHash);
        record.sign(&secret);
        record.payload.push(0xff);
        assert!(matches!(
            record.verify_signature(),
            Err(RecordError::InvalidSignature)
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_sender_key() {
        let secret = SchnorrSecretKey::from_seed(&[5u8; 32]);
        let other = SchnorrSecretKey::from_seed(&[6u8; 32]);
        let mut record = sample_record(MessageKind::CommitmentHash);
        record.pub_key = other.public_key().to_bytes().to_vec();
        record.sign(&secret);
        assert!(matches!(
            record.verify_signature(),
            Err(RecordError::InvalidSignature)
        ));
    }

    #[test]
    fn test_unknown_kind_survives_decode() {
        let mut record = sample_record(MessageKind::CommitmentHash);
        record.kind = MessageKind::Unknown;
        let decoded = ConsensusRecord::rlp_decode(&record.rlp_encode()).unwrap();
        assert_eq!(decoded.kind, MessageKind::Unknown);
    }
}
