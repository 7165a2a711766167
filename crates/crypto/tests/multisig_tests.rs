//! Integration tests for the interactive multi-signing protocol.

use rondo_crypto::multisig::{indices_from_bitmap, verify_aggregate};
use rondo_crypto::{keccak256, MultiSigError, MultiSigner, SchnorrSecretKey, COMMITMENT_LEN};

fn group_of(n: usize) -> (Vec<SchnorrSecretKey>, Vec<rondo_crypto::SchnorrPublicKey>) {
    let secrets: Vec<_> = (0..n)
        .map(|i| SchnorrSecretKey::from_seed(&[i as u8 + 1; 32]))
        .collect();
    let pubs: Vec<_> = secrets.iter().map(|s| s.public_key().clone()).collect();
    (secrets, pubs)
}

fn signer_for(index: u16, secrets: &[SchnorrSecretKey]) -> MultiSigner {
    let pubs: Vec<_> = secrets.iter().map(|s| s.public_key().clone()).collect();
    MultiSigner::new(pubs, secrets[index as usize].clone(), index).unwrap()
}

/// Runs the full protocol for the participants selected by `bitmap` and
/// returns the aggregated signature as produced by participant 0.
fn run_protocol(secrets: &[SchnorrSecretKey], bitmap: &[u8], message: &[u8]) -> Vec<u8> {
    let n = secrets.len();
    let mut signers: Vec<_> = (0..n).map(|i| signer_for(i as u16, secrets)).collect();

    // Phase 1: everyone creates a commitment and circulates its hash,
    // then reveals the commitment itself.
    let mut commitments = Vec::new();
    for (i, signer) in signers.iter_mut().enumerate() {
        let (secret, commitment) = signer.create_commitment();
        signer.set_commitment_secret(&secret).unwrap();
        commitments.push((i as u16, commitment));
    }
    for signer in signers.iter_mut() {
        for (idx, commitment) in &commitments {
            signer
                .add_commitment_hash(*idx, &keccak256(commitment))
                .unwrap();
            signer.add_commitment(*idx, commitment).unwrap();
        }
        signer.set_message(message);
    }

    // Phase 2: aggregate commitments over the bitmap, sign partially.
    let selected = indices_from_bitmap(bitmap, n);
    let mut shares = Vec::new();
    for &idx in &selected {
        signers[idx].aggregate_commitments(bitmap).unwrap();
        let share = signers[idx].sign_partial().unwrap();
        shares.push((idx as u16, share));
    }

    // Phase 3: participant 0 verifies and collects all shares.
    let collector = &mut signers[0];
    for (idx, share) in &shares {
        collector.verify_partial(*idx, share).unwrap();
        if *idx != 0 {
            collector.add_sign_partial(*idx, share).unwrap();
        }
    }
    collector.aggregate_sigs(bitmap).unwrap()
}

#[test]
fn test_full_protocol_all_participants() {
    let (secrets, pubs) = group_of(4);
    let message = keccak256(b"block header hash");
    let bitmap = vec![0b0000_1111u8];

    let signature = run_protocol(&secrets, &bitmap, &message);
    assert!(verify_aggregate(&pubs, &bitmap, &message, &signature).unwrap());
}

#[test]
fn test_full_protocol_subset() {
    let (secrets, pubs) = group_of(4);
    let message = keccak256(b"subset message");
    // Positions 0, 1, 2 selected; 3 left out.
    let bitmap = vec![0b0000_0111u8];

    let signature = run_protocol(&secrets, &bitmap, &message);
    assert!(verify_aggregate(&pubs, &bitmap, &message, &signature).unwrap());

    // The certificate does not verify for a different selection.
    let other_bitmap = vec![0b0000_1011u8];
    assert!(!verify_aggregate(&pubs, &other_bitmap, &message, &signature).unwrap());

    // Nor for a different message.
    let other = keccak256(b"another message");
    assert!(!verify_aggregate(&pubs, &bitmap, &other, &signature).unwrap());
}

#[test]
fn test_verify_partial_rejects_forged_share() {
    let (secrets, _) = group_of(4);
    let message = keccak256(b"forged share");
    let bitmap = vec![0b0000_0111u8];

    let mut signers: Vec<_> = (0..4).map(|i| signer_for(i as u16, &secrets)).collect();
    let mut commitments = Vec::new();
    for signer in signers.iter_mut() {
        let (secret, commitment) = signer.create_commitment();
        signer.set_commitment_secret(&secret).unwrap();
        commitments.push(commitment);
    }
    for signer in signers.iter_mut() {
        for (idx, commitment) in commitments.iter().enumerate() {
            signer.add_commitment(idx as u16, commitment).unwrap();
        }
        signer.set_message(&message);
        signer.aggregate_commitments(&bitmap).unwrap();
    }

    let share = signers[1].sign_partial().unwrap();
    assert!(signers[0].verify_partial(1, &share).is_ok());

    let mut forged = share;
    forged[31] ^= 0x01;
    assert_eq!(
        signers[0].verify_partial(1, &forged),
        Err(MultiSigError::InvalidSignatureShare(1))
    );
}

#[test]
fn test_sign_partial_requires_selection() {
    let (secrets, _) = group_of(4);
    // Bitmap without position 3.
    let bitmap = vec![0b0000_0111u8];

    let mut signer = signer_for(3, &secrets);
    let (secret, commitment) = signer.create_commitment();
    signer.set_commitment_secret(&secret).unwrap();
    signer.set_message(b"left out");

    // Only commitments from the selected participants are needed; give
    // the excluded node a view of everyone's commitment anyway.
    for idx in 0..4u16 {
        signer.add_commitment(idx, &commitment).unwrap();
    }
    signer.aggregate_commitments(&bitmap).unwrap();

    assert_eq!(signer.sign_partial(), Err(MultiSigError::NotInSelection));
}

#[test]
fn test_aggregate_requires_all_selected_commitments() {
    let (secrets, _) = group_of(4);
    let mut signer = signer_for(0, &secrets);
    let (secret, commitment) = signer.create_commitment();
    signer.set_commitment_secret(&secret).unwrap();
    signer.add_commitment(0, &commitment).unwrap();

    // Position 1 is selected but never revealed a commitment.
    let bitmap = vec![0b0000_0011u8];
    assert_eq!(
        signer.aggregate_commitments(&bitmap),
        Err(MultiSigError::MissingCommitment(1))
    );
}

#[test]
fn test_constructor_rejects_mismatched_key() {
    let (secrets, pubs) = group_of(3);
    let stranger = SchnorrSecretKey::from_seed(&[99u8; 32]);
    assert_eq!(
        MultiSigner::new(pubs, stranger, 0).err(),
        Some(MultiSigError::KeyMismatch)
    );
    let pubs2: Vec<_> = secrets.iter().map(|s| s.public_key().clone()).collect();
    assert!(matches!(
        MultiSigner::new(pubs2, secrets[0].clone(), 7),
        Err(MultiSigError::SelfIndexOutOfRange { index: 7, size: 3 })
    ));
}

#[test]
fn test_commitment_wire_length() {
    let (secrets, _) = group_of(1);
    let signer = signer_for(0, &secrets);
    let (_, commitment) = signer.create_commitment();
    assert_eq!(commitment.len(), COMMITMENT_LEN);
}

#[test]
fn test_indices_from_bitmap_ignores_padding() {
    // Bit 5 set beyond a group of 4 is ignored.
    let indices = indices_from_bitmap(&[0b0010_0101u8], 4);
    assert_eq!(indices, vec![0, 2]);
}
