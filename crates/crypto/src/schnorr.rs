//! Schnorr signatures over secp256k1.
//!
//! Keys follow the BIP-340 x-only convention: secret scalars are
//! normalized so the public point always has an even y-coordinate, which
//! makes the 32-byte x-only encoding round-trip exactly. Nonces are
//! derived deterministically from the secret key and the message, so
//! signing the same message twice with the same key yields the same
//! signature.

use crate::{keccak256, CryptoError, Result};
use k256::{
    elliptic_curve::{
        ops::Reduce,
        sec1::{FromEncodedPoint, ToEncodedPoint},
        PrimeField,
    },
    AffinePoint, ProjectivePoint, Scalar, U256,
};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const NONCE_DOMAIN: &[u8] = b"RONDO_SCHNORR_NONCE_V1";
const CHALLENGE_DOMAIN: &[u8] = b"RONDO_SCHNORR_CHALLENGE_V1";

/// Schnorr secret key (32-byte scalar, even-y normalized).
#[derive(Clone)]
pub struct SchnorrSecretKey {
    scalar: Scalar,
    public: SchnorrPublicKey,
}

/// Schnorr public key (32-byte x-only coordinate of an even-y point).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchnorrPublicKey {
    point: ProjectivePoint,
    bytes: [u8; 32],
}

/// Schnorr signature (64 bytes: `R_x || s`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchnorrSignature {
    /// Commitment point R (x-coordinate only, even y)
    pub r: [u8; 32],
    /// Response scalar s
    pub s: [u8; 32],
}

impl SchnorrSecretKey {
    /// Generate a new random secret key.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self::generate(&mut rng)
    }

    /// Generate a new secret key with the provided RNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self::from_seed(&seed)
    }

    /// Create from a 32-byte seed (deterministic).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let hash = keccak256(seed);
        let scalar = <Scalar as Reduce<U256>>::reduce_bytes(&hash.into());
        let scalar = if scalar.is_zero().into() {
            Scalar::ONE
        } else {
            scalar
        };
        Self::from_scalar(scalar)
    }

    /// Create from raw scalar bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let scalar_opt = Scalar::from_repr((*bytes).into());
        if scalar_opt.is_none().into() {
            return Err(CryptoError::InvalidPrivateKey(
                "invalid scalar bytes".to_string(),
            ));
        }
        let scalar = scalar_opt.unwrap();
        if scalar.is_zero().into() {
            return Err(CryptoError::InvalidPrivateKey(
                "scalar cannot be zero".to_string(),
            ));
        }
        Ok(Self::from_scalar(scalar))
    }

    fn from_scalar(scalar: Scalar) -> Self {
        let point = ProjectivePoint::GENERATOR * scalar;
        // Even-y normalization: negate the scalar when the public point has
        // an odd y, so the x-only public key encoding is exact.
        let (scalar, point) = if has_odd_y(&point) {
            (-scalar, -point)
        } else {
            (scalar, point)
        };
        let bytes = x_coordinate(&point);
        Self {
            scalar,
            public: SchnorrPublicKey { point, bytes },
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> &SchnorrPublicKey {
        &self.public
    }

    /// The raw scalar, used by the multi-signer for partial signing.
    pub(crate) fn scalar(&self) -> &Scalar {
        &self.scalar
    }

    /// Sign a message.
    ///
    /// The nonce is derived deterministically from the secret key and the
    /// message, so signing is idempotent.
    pub fn sign(&self, message: &[u8]) -> SchnorrSignature {
        let k = self.generate_nonce(message);
        let r_point = ProjectivePoint::GENERATOR * k;
        // BIP-340 style: commit to the even-y representative of R
        let k = if has_odd_y(&r_point) { -k } else { k };
        let r = x_coordinate(&r_point);

        let e = challenge(&r, &self.public.bytes, message);
        let s = k + e * self.scalar;

        SchnorrSignature {
            r,
            s: s.to_bytes().into(),
        }
    }

    fn generate_nonce(&self, message: &[u8]) -> Scalar {
        let mut hasher = crate::Hasher::new();
        hasher.update(NONCE_DOMAIN);
        hasher.update(&self.scalar.to_bytes());
        hasher.update(message);
        let hash = hasher.finalize();
        let nonce = <Scalar as Reduce<U256>>::reduce_bytes(&hash.into());
        if nonce.is_zero().into() {
            Scalar::ONE
        } else {
            nonce
        }
    }
}

impl fmt::Debug for SchnorrSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchnorrSecretKey")
            .field("public", &hex::encode(self.public.bytes))
            .finish_non_exhaustive()
    }
}

impl SchnorrPublicKey {
    /// Create from a 32-byte x-only encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let fixed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            })?;
        let point = lift_x(&fixed).ok_or_else(|| {
            CryptoError::InvalidPublicKey("not an x-coordinate on the curve".to_string())
        })?;
        Ok(Self {
            point,
            bytes: fixed,
        })
    }

    /// The x-only byte encoding.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Convert to a byte array.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    /// The curve point, used by the multi-signer.
    pub(crate) fn point(&self) -> &ProjectivePoint {
        &self.point
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &SchnorrSignature) -> bool {
        let Some(r_point) = lift_x(&signature.r) else {
            return false;
        };
        let s_opt = Scalar::from_repr(signature.s.into());
        if s_opt.is_none().into() {
            return false;
        }
        let s = s_opt.unwrap();

        let e = challenge(&signature.r, &self.bytes, message);

        // s * G == R + e * P
        ProjectivePoint::GENERATOR * s == r_point + self.point * e
    }
}

impl fmt::Display for SchnorrPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.bytes[..8]))
    }
}

impl Serialize for SchnorrPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.bytes))
    }
}

impl<'de> Deserialize<'de> for SchnorrPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s))
            .map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl SchnorrSignature {
    /// Create from raw bytes (64 bytes: `R_x || s`).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 64 {
            return Err(CryptoError::InvalidLength {
                expected: 64,
                actual: bytes.len(),
            });
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s })
    }

    /// Convert to raw bytes (64 bytes: `R_x || s`).
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[0..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes
    }
}

/// Compute the challenge scalar `e = H(domain || R || P || m)`.
pub(crate) fn challenge(r: &[u8; 32], pubkey: &[u8; 32], message: &[u8]) -> Scalar {
    let mut hasher = crate::Hasher::new();
    hasher.update(CHALLENGE_DOMAIN);
    hasher.update(r);
    hasher.update(pubkey);
    hasher.update(message);
    let hash = hasher.finalize();
    <Scalar as Reduce<U256>>::reduce_bytes(&hash.into())
}

pub(crate) fn has_odd_y(point: &ProjectivePoint) -> bool {
    point.to_affine().to_encoded_point(true).as_bytes()[0] == 0x03
}

pub(crate) fn x_coordinate(point: &ProjectivePoint) -> [u8; 32] {
    let encoded = point.to_affine().to_encoded_point(true);
    let mut out = [0u8; 32];
    out.copy_from_slice(&encoded.as_bytes()[1..33]);
    out
}

/// Lift an x-only encoding to the even-y point on the curve.
pub(crate) fn lift_x(x_bytes: &[u8; 32]) -> Option<ProjectivePoint> {
    let mut compressed = [0u8; 33];
    compressed[0] = 0x02; // even y
    compressed[1..].copy_from_slice(x_bytes);

    let encoded = k256::EncodedPoint::from_bytes(compressed).ok()?;
    let affine = AffinePoint::from_encoded_point(&encoded);
    if affine.is_some().into() {
        Some(ProjectivePoint::from(affine.unwrap()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let secret = SchnorrSecretKey::random();
        let signature = secret.sign(b"hello");
        assert!(secret.public_key().verify(b"hello", &signature));
        assert!(!secret.public_key().verify(b"other", &signature));
    }

    #[test]
    fn test_signing_is_deterministic() {
        let secret = SchnorrSecretKey::from_seed(&[7u8; 32]);
        let sig_a = secret.sign(b"repeatable");
        let sig_b = secret.sign(b"repeatable");
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn test_public_key_round_trip() {
        let secret = SchnorrSecretKey::from_seed(&[9u8; 32]);
        let public = secret.public_key();
        let parsed = SchnorrPublicKey::from_bytes(public.as_bytes()).unwrap();
        assert_eq!(public, &parsed);

        let signature = secret.sign(b"round trip");
        assert!(parsed.verify(b"round trip", &signature));
    }

    #[test]
    fn test_wrong_key_rejects() {
        let secret = SchnorrSecretKey::from_seed(&[1u8; 32]);
        let other = SchnorrSecretKey::from_seed(&[2u8; 32]);
        let signature = secret.sign(b"message");
        assert!(!other.public_key().verify(b"message", &signature));
    }

    #[test]
    fn test_signature_bytes_round_trip() {
        let secret = SchnorrSecretKey::from_seed(&[3u8; 32]);
        let signature = secret.sign(b"bytes");
        let parsed = SchnorrSignature::from_bytes(&signature.to_bytes()).unwrap();
        assert_eq!(signature, parsed);
    }

    #[test]
    fn test_from_bytes_rejects_zero_scalar() {
        assert!(SchnorrSecretKey::from_bytes(&[0u8; 32]).is_err());
    }
}
