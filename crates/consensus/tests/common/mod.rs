//! Shared mock collaborators for the consensus integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use rondo_consensus::{
    BlockProcessor, Chronology, ConsensusConfig, ConsensusGroup, ConsensusRecord, ConsensusWorker,
    HaveTime, MessageKind, Outbound, SubroundId,
};
use rondo_crypto::{MultiSigner, SchnorrPublicKey, SchnorrSecretKey};
use rondo_types::{Blockchain, Header, MiniBlock, TxBlockBody, H256};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A chronology pinned to one round, with every deadline a fixed delay
/// away from the moment it is asked for.
#[derive(Debug)]
pub struct ManualClock {
    pub round: u64,
    pub time: u64,
    pub deadline_in: Duration,
}

impl ManualClock {
    pub fn at_round(round: u64) -> Self {
        Self {
            round,
            time: 1_700_000_000,
            deadline_in: Duration::from_secs(5),
        }
    }

    pub fn with_deadline_in(mut self, deadline_in: Duration) -> Self {
        self.deadline_in = deadline_in;
        self
    }
}

impl Chronology for ManualClock {
    fn round_index(&self) -> u64 {
        self.round
    }

    fn clock_offset(&self) -> Duration {
        Duration::ZERO
    }

    fn current_time(&self) -> u64 {
        self.time
    }

    fn current_subround(&self) -> SubroundId {
        SubroundId::Block
    }

    fn deadline(&self, _subround: SubroundId) -> Instant {
        Instant::now() + self.deadline_in
    }

    fn round_end(&self) -> Instant {
        Instant::now() + self.deadline_in
    }
}

/// Block processor stub: builds deterministic bodies, commits by
/// advancing the chain tip, and can be told to fail the commit.
#[derive(Debug, Default)]
pub struct MockProcessor {
    pub fail_commit: bool,
    pub processed: AtomicUsize,
    pub committed: AtomicUsize,
    pub reverted: AtomicBool,
}

impl MockProcessor {
    pub fn failing_commit() -> Self {
        Self {
            fail_commit: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl BlockProcessor for MockProcessor {
    async fn create_tx_block_body(
        &self,
        shard_id: u32,
        _max_txs: usize,
        round_index: u64,
        have_time: HaveTime<'_>,
    ) -> Result<TxBlockBody, String> {
        if !have_time() {
            return Ok(TxBlockBody::default());
        }
        Ok(TxBlockBody::new(vec![MiniBlock {
            shard_id,
            tx_hashes: vec![H256::keccak256(&round_index.to_le_bytes())],
        }]))
    }

    async fn process_block(
        &self,
        _chain: &Blockchain,
        _header: &Header,
        _body: &TxBlockBody,
    ) -> Result<(), String> {
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit_block(
        &self,
        chain: &mut Blockchain,
        header: &Header,
        _body: &TxBlockBody,
    ) -> Result<(), String> {
        if self.fail_commit {
            return Err("commit rejected".to_string());
        }
        chain.set_current_header(header.clone());
        self.committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn revert_account_state(&self) {
        self.reverted.store(true, Ordering::SeqCst);
    }

    async fn remove_block_txs_from_pool(&self, _body: &TxBlockBody) -> Result<(), String> {
        Ok(())
    }
}

/// Deterministic validator secrets, one per group position.
pub fn group_secrets(n: usize) -> Vec<SchnorrSecretKey> {
    (0..n)
        .map(|i| SchnorrSecretKey::from_seed(&[i as u8 + 1; 32]))
        .collect()
}

pub fn public_keys(secrets: &[SchnorrSecretKey]) -> Vec<SchnorrPublicKey> {
    secrets.iter().map(|s| s.public_key().clone()).collect()
}

/// The outbound channel ends the tests observe.
pub struct OutboundTaps {
    pub consensus_rx: mpsc::Receiver<Vec<u8>>,
    pub body_rx: mpsc::Receiver<Vec<u8>>,
    pub header_rx: mpsc::Receiver<Vec<u8>>,
}

pub fn make_worker(
    secrets: &[SchnorrSecretKey],
    self_index: usize,
    chain: Blockchain,
    processor: Arc<MockProcessor>,
    clock: ManualClock,
) -> (ConsensusWorker<MockProcessor>, OutboundTaps) {
    let (consensus_tx, consensus_rx) = mpsc::channel(32);
    let (body_tx, body_rx) = mpsc::channel(8);
    let (header_tx, header_rx) = mpsc::channel(8);

    let group = ConsensusGroup::new(public_keys(secrets), self_index).unwrap();
    let worker = ConsensusWorker::new(
        group,
        secrets[self_index].clone(),
        chain,
        processor,
        Outbound::new(consensus_tx, body_tx, header_tx),
        Arc::new(clock),
        ConsensusConfig::default(),
    )
    .unwrap();

    (
        worker,
        OutboundTaps {
            consensus_rx,
            body_rx,
            header_rx,
        },
    )
}

/// An unsigned record as a peer would produce it (worker handlers trust
/// the dispatcher to have verified envelopes already).
pub fn peer_record(
    secret: &SchnorrSecretKey,
    kind: MessageKind,
    header_hash: Option<H256>,
    payload: Vec<u8>,
) -> ConsensusRecord {
    ConsensusRecord::new(
        header_hash,
        payload,
        secret.public_key().to_bytes().to_vec(),
        kind,
        1_700_000_000,
    )
}

/// A signed record, for paths that cross the dispatcher.
pub fn signed_peer_record(
    secret: &SchnorrSecretKey,
    kind: MessageKind,
    header_hash: Option<H256>,
    payload: Vec<u8>,
) -> ConsensusRecord {
    let mut record = peer_record(secret, kind, header_hash, payload);
    record.sign(secret);
    record
}

/// A peer-side view of the interactive signing protocol, used by tests
/// to produce commitment hashes, reveals and partial signatures on
/// behalf of the other group members.
pub struct TestPeer {
    pub index: u16,
    pub secret: SchnorrSecretKey,
    pub signer: MultiSigner,
    pub commitment: [u8; 33],
}

impl TestPeer {
    pub fn new(index: u16, secrets: &[SchnorrSecretKey]) -> Self {
        let mut signer =
            MultiSigner::new(public_keys(secrets), secrets[index as usize].clone(), index).unwrap();
        let (commitment_secret, commitment) = signer.create_commitment();
        signer.set_commitment_secret(&commitment_secret).unwrap();
        signer.add_commitment(index, &commitment).unwrap();
        Self {
            index,
            secret: secrets[index as usize].clone(),
            signer,
            commitment,
        }
    }

    /// The peer's partial signature once all selected commitments are
    /// known to it.
    pub fn partial_signature(
        &mut self,
        others: &[(u16, Vec<u8>)],
        message: &[u8],
        bitmap: &[u8],
    ) -> Vec<u8> {
        for (index, commitment) in others {
            self.signer.add_commitment(*index, commitment).unwrap();
        }
        self.signer.set_message(message);
        self.signer.aggregate_commitments(bitmap).unwrap();
        self.signer.sign_partial().unwrap().to_vec()
    }
}

/// A committed tip at `nonce`, produced in `round`.
pub fn tip_header(nonce: u64, round: u64) -> Header {
    Header::new(nonce, round, 1_600_000_000, H256::keccak256(b"ancestor"))
}
