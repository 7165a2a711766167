//! Interactive Schnorr multi-signing.
//!
//! A [`MultiSigner`] is bound to one consensus group for one round and
//! walks the interactive protocol that produces the round certificate:
//!
//! 1. every participant creates a nonce commitment `R_i = k_i * G` and
//!    first circulates only its hash;
//! 2. the leader selects participants into a bitmap;
//! 3. selected participants reveal their commitments, which are checked
//!    against the previously circulated hashes;
//! 4. commitments are aggregated into `R = Σ R_i` and each participant
//!    produces a partial signature `s_i = k_i + e * a_i * x_i`;
//! 5. partial signatures are summed into the final signature `(R, Σ s_i)`,
//!    which verifies against the coefficient-weighted aggregate public key
//!    of the selected subset.
//!
//! Commitments travel as 33-byte compressed SEC1 points so point parity
//! survives the wire; partial signatures are 32-byte scalars.

use crate::schnorr::{SchnorrPublicKey, SchnorrSecretKey};
use k256::{
    elliptic_curve::{
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        PrimeField,
    },
    AffinePoint, ProjectivePoint, Scalar, U256,
};
use rand::RngCore;
use std::fmt;

/// Length in bytes of a wire-format nonce commitment (compressed point).
pub const COMMITMENT_LEN: usize = 33;

/// Length in bytes of a wire-format partial signature (scalar).
pub const SIGNATURE_SHARE_LEN: usize = 32;

/// Length in bytes of the aggregated signature (`R || s`).
pub const AGGREGATE_SIGNATURE_LEN: usize = COMMITMENT_LEN + SIGNATURE_SHARE_LEN;

const KEYAGG_DOMAIN: &[u8] = b"RONDO_MULTISIG_KEYAGG_V1";
const CHALLENGE_DOMAIN: &[u8] = b"RONDO_MULTISIG_CHALLENGE_V1";

/// Errors produced by the multi-signer.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MultiSigError {
    /// The consensus group is empty
    #[error("empty consensus group")]
    EmptyGroup,

    /// Self index does not fall inside the group
    #[error("self index {index} out of range for group of {size}")]
    SelfIndexOutOfRange {
        /// The offending index
        index: u16,
        /// The group size
        size: usize,
    },

    /// The secret key does not match the group entry at the self index
    #[error("secret key does not match group member at self index")]
    KeyMismatch,

    /// Index does not fall inside the group
    #[error("index {0} out of range")]
    IndexOutOfRange(u16),

    /// Payload is not a valid curve point
    #[error("invalid commitment point")]
    InvalidPoint,

    /// Payload is not a valid scalar
    #[error("invalid scalar")]
    InvalidScalar,

    /// Payload has the wrong length
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// No commitment stored for the index
    #[error("missing commitment for index {0}")]
    MissingCommitment(u16),

    /// No commitment hash stored for the index
    #[error("missing commitment hash for index {0}")]
    MissingCommitmentHash(u16),

    /// No signature share stored for the index
    #[error("missing signature share for index {0}")]
    MissingSignatureShare(u16),

    /// The message to sign has not been set
    #[error("message not set")]
    MissingMessage,

    /// Commitments have not been aggregated yet
    #[error("commitments not aggregated")]
    MissingAggregateCommitment,

    /// The nonce secret has not been set
    #[error("commitment secret not set")]
    MissingCommitmentSecret,

    /// The own index is not part of the aggregation selection
    #[error("self index not selected in bitmap")]
    NotInSelection,

    /// A partial signature failed verification
    #[error("invalid signature share from index {0}")]
    InvalidSignatureShare(u16),
}

/// Result type for multi-signer operations.
pub type MultiSigResult<T> = std::result::Result<T, MultiSigError>;

/// Per-round interactive multi-signer.
///
/// Created fresh at the start of each round, bound to the round's group
/// and the node's own key, and owned by the round state until the round
/// ends.
pub struct MultiSigner {
    pub_keys: Vec<SchnorrPublicKey>,
    self_index: u16,
    secret: SchnorrSecretKey,
    message: Option<Vec<u8>>,
    commitment_secret: Option<Scalar>,
    commitments: Vec<Option<ProjectivePoint>>,
    commitment_hashes: Vec<Option<[u8; 32]>>,
    sig_shares: Vec<Option<Scalar>>,
    agg_commitment: Option<ProjectivePoint>,
    selection: Option<Vec<usize>>,
}

impl MultiSigner {
    /// Binds a signer to a consensus group.
    ///
    /// `self_index` is the node's position in `pub_keys`; the secret key
    /// must correspond to the group entry at that position.
    pub fn new(
        pub_keys: Vec<SchnorrPublicKey>,
        secret: SchnorrSecretKey,
        self_index: u16,
    ) -> MultiSigResult<Self> {
        if pub_keys.is_empty() {
            return Err(MultiSigError::EmptyGroup);
        }
        if self_index as usize >= pub_keys.len() {
            return Err(MultiSigError::SelfIndexOutOfRange {
                index: self_index,
                size: pub_keys.len(),
            });
        }
        if &pub_keys[self_index as usize] != secret.public_key() {
            return Err(MultiSigError::KeyMismatch);
        }

        let size = pub_keys.len();
        Ok(Self {
            pub_keys,
            self_index,
            secret,
            message: None,
            commitment_secret: None,
            commitments: vec![None; size],
            commitment_hashes: vec![None; size],
            sig_shares: vec![None; size],
            agg_commitment: None,
            selection: None,
        })
    }

    /// The size of the bound group.
    pub fn group_size(&self) -> usize {
        self.pub_keys.len()
    }

    /// The node's own index in the group.
    pub fn self_index(&self) -> u16 {
        self.self_index
    }

    /// Creates a fresh nonce commitment pair.
    ///
    /// Returns `(secret, commitment)`: the 32-byte nonce scalar to keep
    /// private and the 33-byte compressed point to circulate.
    pub fn create_commitment(&self) -> ([u8; 32], [u8; COMMITMENT_LEN]) {
        let mut rng = rand::thread_rng();
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        let mut k = <Scalar as Reduce<U256>>::reduce_bytes(&seed.into());
        if bool::from(k.is_zero()) {
            k = Scalar::ONE;
        }
        let point = ProjectivePoint::GENERATOR * k;
        (k.to_bytes().into(), compress(&point))
    }

    /// Stores the node's own nonce secret for later partial signing.
    pub fn set_commitment_secret(&mut self, secret: &[u8]) -> MultiSigResult<()> {
        self.commitment_secret = Some(parse_scalar(secret)?);
        Ok(())
    }

    /// Sets the message the group is signing (the round's consensus data).
    pub fn set_message(&mut self, message: &[u8]) {
        self.message = Some(message.to_vec());
    }

    /// Stores the commitment revealed by the participant at `index`.
    pub fn add_commitment(&mut self, index: u16, data: &[u8]) -> MultiSigResult<()> {
        self.check_index(index)?;
        self.commitments[index as usize] = Some(parse_point(data)?);
        Ok(())
    }

    /// The stored commitment of the participant at `index`.
    pub fn commitment(&self, index: u16) -> MultiSigResult<[u8; COMMITMENT_LEN]> {
        self.check_index(index)?;
        self.commitments[index as usize]
            .as_ref()
            .map(compress)
            .ok_or(MultiSigError::MissingCommitment(index))
    }

    /// Stores the commitment hash circulated by the participant at `index`.
    pub fn add_commitment_hash(&mut self, index: u16, hash: &[u8]) -> MultiSigResult<()> {
        self.check_index(index)?;
        let fixed: [u8; 32] = hash.try_into().map_err(|_| MultiSigError::InvalidLength {
            expected: 32,
            actual: hash.len(),
        })?;
        self.commitment_hashes[index as usize] = Some(fixed);
        Ok(())
    }

    /// The stored commitment hash of the participant at `index`.
    pub fn commitment_hash(&self, index: u16) -> MultiSigResult<[u8; 32]> {
        self.check_index(index)?;
        self.commitment_hashes[index as usize].ok_or(MultiSigError::MissingCommitmentHash(index))
    }

    /// Whether [`aggregate_commitments`](Self::aggregate_commitments)
    /// has fixed a selection already.
    pub fn has_aggregate_commitment(&self) -> bool {
        self.agg_commitment.is_some()
    }

    /// Aggregates the revealed commitments of the bitmap-selected
    /// participants into the combined point `R = Σ R_i`.
    ///
    /// Fixes the aggregation selection; partial signatures are produced
    /// and verified against it.
    pub fn aggregate_commitments(&mut self, bitmap: &[u8]) -> MultiSigResult<Vec<u8>> {
        let selection = indices_from_bitmap(bitmap, self.pub_keys.len());
        let mut agg = ProjectivePoint::IDENTITY;
        for &idx in &selection {
            let point = self.commitments[idx]
                .ok_or(MultiSigError::MissingCommitment(idx as u16))?;
            agg += point;
        }
        let encoded = compress(&agg).to_vec();
        self.agg_commitment = Some(agg);
        self.selection = Some(selection);
        Ok(encoded)
    }

    /// Produces the node's partial signature over the stored message.
    ///
    /// Requires the aggregation selection to include the node itself.
    pub fn sign_partial(&mut self) -> MultiSigResult<[u8; SIGNATURE_SHARE_LEN]> {
        let selection = self
            .selection
            .as_ref()
            .ok_or(MultiSigError::MissingAggregateCommitment)?;
        if !selection.contains(&(self.self_index as usize)) {
            return Err(MultiSigError::NotInSelection);
        }
        let k = self
            .commitment_secret
            .ok_or(MultiSigError::MissingCommitmentSecret)?;

        let e = self.challenge()?;
        let coeff = key_coeff(&self.pub_keys, selection, self.self_index as usize);
        let s = k + e * coeff * self.secret.scalar();

        self.sig_shares[self.self_index as usize] = Some(s);
        Ok(s.to_bytes().into())
    }

    /// Verifies the partial signature of the participant at `index`
    /// against its revealed commitment: `s_i * G == R_i + e * a_i * P_i`.
    pub fn verify_partial(&self, index: u16, share: &[u8]) -> MultiSigResult<()> {
        self.check_index(index)?;
        let selection = self
            .selection
            .as_ref()
            .ok_or(MultiSigError::MissingAggregateCommitment)?;
        let s = parse_scalar(share)?;
        let r_i = self.commitments[index as usize]
            .ok_or(MultiSigError::MissingCommitment(index))?;

        let e = self.challenge()?;
        let coeff = key_coeff(&self.pub_keys, selection, index as usize);
        let p_i = *self.pub_keys[index as usize].point();

        if ProjectivePoint::GENERATOR * s == r_i + p_i * (e * coeff) {
            Ok(())
        } else {
            Err(MultiSigError::InvalidSignatureShare(index))
        }
    }

    /// Stores a verified partial signature.
    pub fn add_sign_partial(&mut self, index: u16, share: &[u8]) -> MultiSigResult<()> {
        self.check_index(index)?;
        self.sig_shares[index as usize] = Some(parse_scalar(share)?);
        Ok(())
    }

    /// Sums the partial signatures of the bitmap-selected participants
    /// into the final aggregated signature `R || Σ s_i`.
    pub fn aggregate_sigs(&self, bitmap: &[u8]) -> MultiSigResult<Vec<u8>> {
        let agg_r = self
            .agg_commitment
            .as_ref()
            .ok_or(MultiSigError::MissingAggregateCommitment)?;

        let mut sum = Scalar::ZERO;
        for idx in indices_from_bitmap(bitmap, self.pub_keys.len()) {
            let share = self.sig_shares[idx].ok_or(MultiSigError::MissingSignatureShare(idx as u16))?;
            sum += share;
        }

        let mut out = Vec::with_capacity(AGGREGATE_SIGNATURE_LEN);
        out.extend_from_slice(&compress(agg_r));
        out.extend_from_slice(sum.to_bytes().as_slice());
        Ok(out)
    }

    fn challenge(&self) -> MultiSigResult<Scalar> {
        let message = self.message.as_ref().ok_or(MultiSigError::MissingMessage)?;
        let agg_r = self
            .agg_commitment
            .as_ref()
            .ok_or(MultiSigError::MissingAggregateCommitment)?;
        let selection = self
            .selection
            .as_ref()
            .ok_or(MultiSigError::MissingAggregateCommitment)?;
        let agg_pk = aggregate_public_point(&self.pub_keys, selection);
        Ok(challenge_scalar(&compress(agg_r), &compress(&agg_pk), message))
    }

    fn check_index(&self, index: u16) -> MultiSigResult<()> {
        if (index as usize) < self.pub_keys.len() {
            Ok(())
        } else {
            Err(MultiSigError::IndexOutOfRange(index))
        }
    }
}

impl fmt::Debug for MultiSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSigner")
            .field("group_size", &self.pub_keys.len())
            .field("self_index", &self.self_index)
            .finish_non_exhaustive()
    }
}

/// Verifies an aggregated signature produced by [`MultiSigner::aggregate_sigs`]
/// against the coefficient-weighted aggregate public key of the
/// bitmap-selected subset of `pub_keys`.
pub fn verify_aggregate(
    pub_keys: &[SchnorrPublicKey],
    bitmap: &[u8],
    message: &[u8],
    signature: &[u8],
) -> MultiSigResult<bool> {
    if signature.len() != AGGREGATE_SIGNATURE_LEN {
        return Err(MultiSigError::InvalidLength {
            expected: AGGREGATE_SIGNATURE_LEN,
            actual: signature.len(),
        });
    }
    let agg_r = parse_point(&signature[..COMMITMENT_LEN])?;
    let s = parse_scalar(&signature[COMMITMENT_LEN..])?;

    let selection = indices_from_bitmap(bitmap, pub_keys.len());
    let agg_pk = aggregate_public_point(pub_keys, &selection);
    let e = challenge_scalar(&compress(&agg_r), &compress(&agg_pk), message);

    Ok(ProjectivePoint::GENERATOR * s == agg_r + agg_pk * e)
}

/// Expands a little-endian bitmap into the list of set group indices.
pub fn indices_from_bitmap(bitmap: &[u8], group_size: usize) -> Vec<usize> {
    let mut indices = Vec::new();
    for i in 0..group_size {
        let byte = i / 8;
        let bit = i % 8;
        if byte < bitmap.len() && bitmap[byte] & (1 << bit) != 0 {
            indices.push(i);
        }
    }
    indices
}

/// Key-aggregation coefficient `a_i = H(L || P_i)` where `L` commits to
/// the selected subset.
fn key_coeff(pub_keys: &[SchnorrPublicKey], selection: &[usize], index: usize) -> Scalar {
    let mut hasher = crate::Hasher::new();
    hasher.update(KEYAGG_DOMAIN);
    for &idx in selection {
        hasher.update(pub_keys[idx].as_bytes());
    }
    hasher.update(pub_keys[index].as_bytes());
    let hash = hasher.finalize();
    <Scalar as Reduce<U256>>::reduce_bytes(&hash.into())
}

fn aggregate_public_point(pub_keys: &[SchnorrPublicKey], selection: &[usize]) -> ProjectivePoint {
    let mut agg = ProjectivePoint::IDENTITY;
    for &idx in selection {
        let coeff = key_coeff(pub_keys, selection, idx);
        agg += *pub_keys[idx].point() * coeff;
    }
    agg
}

fn challenge_scalar(agg_r: &[u8], agg_pk: &[u8], message: &[u8]) -> Scalar {
    let mut hasher = crate::Hasher::new();
    hasher.update(CHALLENGE_DOMAIN);
    hasher.update(agg_r);
    hasher.update(agg_pk);
    hasher.update(message);
    let hash = hasher.finalize();
    <Scalar as Reduce<U256>>::reduce_bytes(&hash.into())
}

fn compress(point: &ProjectivePoint) -> [u8; COMMITMENT_LEN] {
    let encoded = point.to_affine().to_encoded_point(true);
    let mut out = [0u8; COMMITMENT_LEN];
    out.copy_from_slice(encoded.as_bytes());
    out
}

fn parse_point(data: &[u8]) -> MultiSigResult<ProjectivePoint> {
    if data.len() != COMMITMENT_LEN {
        return Err(MultiSigError::InvalidLength {
            expected: COMMITMENT_LEN,
            actual: data.len(),
        });
    }
    let encoded = k256::EncodedPoint::from_bytes(data).map_err(|_| MultiSigError::InvalidPoint)?;
    let affine = AffinePoint::from_encoded_point(&encoded);
    if affine.is_some().into() {
        Ok(ProjectivePoint::from(affine.unwrap()))
    } else {
        Err(MultiSigError::InvalidPoint)
    }
}

fn parse_scalar(data: &[u8]) -> MultiSigResult<Scalar> {
    let fixed: [u8; 32] = data.try_into().map_err(|_| MultiSigError::InvalidLength {
        expected: 32,
        actual: data.len(),
    })?;
    let scalar = Scalar::from_repr(fixed.into());
    if scalar.is_some().into() {
        Ok(scalar.unwrap())
    } else {
        Err(MultiSigError::InvalidScalar)
    }
}
