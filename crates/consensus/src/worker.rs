//! The consensus round worker.
//!
//! [`ConsensusWorker`] owns the shared round state and implements the
//! role-gated outgoing jobs of each subround, the incoming message
//! handlers, and the end-of-round commit. It is driven by the
//! [`RoundController`](crate::controller::RoundController), which is the
//! only task that touches it; handlers therefore need no locking.
//!
//! ## Consensus Flow
//!
//! For each round the group proceeds through the subrounds in order:
//!
//! 1. **StartRound**: state reset, leader computed, multi-signer rebound
//! 2. **Block**: the leader builds and sends a body and header
//! 3. **CommitmentHash**: everyone circulates `H(commitment)`
//! 4. **Bitmap**: the leader selects the contributors it accepts
//! 5. **Commitment**: selected validators reveal their commitments
//! 6. **Signature**: selected validators send partial signatures
//! 7. **EndRound**: signatures are aggregated, the block committed and
//!    broadcast
//!
//! A node that is behind catches up progressively: the job of each
//! subround first re-runs the earliest unfinished predecessor.

use crate::chronology::Chronology;
use crate::config::ConsensusConfig;
use crate::message::ConsensusRecord;
use crate::round_state::{count_bitmap_bits, ConsensusGroup, RoundState};
use crate::subround::{MessageKind, SubroundId, SubroundStatus};
use async_trait::async_trait;
use rondo_crypto::{keccak256, MultiSigner, SchnorrSecretKey};
use rondo_types::{Blockchain, Header, TxBlockBody, H256};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Errors surfaced by the worker outside the per-record handler paths.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// The node's secret key does not match its group entry
    #[error("secret key does not match the group entry at the self index")]
    KeyMismatch,

    /// Group construction failed
    #[error(transparent)]
    Group(#[from] crate::round_state::RoundStateError),

    /// There is no block body to broadcast
    #[error("no block body to broadcast")]
    MissingBody,

    /// There is no block header to broadcast
    #[error("no block header to broadcast")]
    MissingHeader,

    /// An outbound channel is closed
    #[error("outbound {0} channel closed")]
    ChannelClosed(&'static str),
}

/// Deadline predicate handed to the block processor during transaction
/// selection: returns false once the proposing subround is over.
pub type HaveTime<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// The block processor collaborating with consensus (implemented by the
/// execution layer).
///
/// It is the sole writer of account state and of the chain tip.
#[async_trait]
pub trait BlockProcessor: Send + Sync {
    /// Builds a transaction block body for the local shard, selecting at
    /// most `max_txs` transactions while `have_time()` holds.
    async fn create_tx_block_body(
        &self,
        shard_id: u32,
        max_txs: usize,
        round_index: u64,
        have_time: HaveTime<'_>,
    ) -> Result<TxBlockBody, String>;

    /// Executes a proposed block against the current account state.
    async fn process_block(
        &self,
        chain: &Blockchain,
        header: &Header,
        body: &TxBlockBody,
    ) -> Result<(), String>;

    /// Commits a processed block, advancing account state and chain tip.
    async fn commit_block(
        &self,
        chain: &mut Blockchain,
        header: &Header,
        body: &TxBlockBody,
    ) -> Result<(), String>;

    /// Rolls account state back to the last committed block.
    fn revert_account_state(&self);

    /// Drops the committed block's transactions from the pool.
    async fn remove_block_txs_from_pool(&self, body: &TxBlockBody) -> Result<(), String>;
}

/// The injected transport capability: three outbound channels to the
/// embedder's sender tasks.
///
/// Consensus records go to the validator group; body and header
/// broadcasts go to dedicated channels distinct from the consensus one.
/// Sends hand off to the transport task and never block the controller
/// for longer than the channel handoff.
#[derive(Debug, Clone)]
pub struct Outbound {
    consensus_tx: mpsc::Sender<Vec<u8>>,
    body_tx: mpsc::Sender<Vec<u8>>,
    header_tx: mpsc::Sender<Vec<u8>>,
}

impl Outbound {
    /// Bundles the three outbound channels.
    pub fn new(
        consensus_tx: mpsc::Sender<Vec<u8>>,
        body_tx: mpsc::Sender<Vec<u8>>,
        header_tx: mpsc::Sender<Vec<u8>>,
    ) -> Self {
        Self {
            consensus_tx,
            body_tx,
            header_tx,
        }
    }

    async fn send_consensus(&self, bytes: Vec<u8>) -> Result<(), ConsensusError> {
        self.consensus_tx
            .send(bytes)
            .await
            .map_err(|_| ConsensusError::ChannelClosed("consensus"))
    }

    async fn broadcast_body(&self, bytes: Vec<u8>) -> Result<(), ConsensusError> {
        self.body_tx
            .send(bytes)
            .await
            .map_err(|_| ConsensusError::ChannelClosed("body broadcast"))
    }

    async fn broadcast_header(&self, bytes: Vec<u8>) -> Result<(), ConsensusError> {
        self.header_tx
            .send(bytes)
            .await
            .map_err(|_| ConsensusError::ChannelClosed("header broadcast"))
    }
}

/// The state machine and message-handling engine that drives one
/// validator through the rounds.
pub struct ConsensusWorker<P> {
    group: ConsensusGroup,
    secret: SchnorrSecretKey,
    chain: Blockchain,
    processor: Arc<P>,
    outbound: Outbound,
    chronology: Arc<dyn Chronology>,
    config: ConsensusConfig,
    state: RoundState,
    rounds: u64,
    rounds_with_block: u64,
}

impl<P: BlockProcessor> ConsensusWorker<P> {
    /// Creates a worker bound to its group position.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        group: ConsensusGroup,
        secret: SchnorrSecretKey,
        chain: Blockchain,
        processor: Arc<P>,
        outbound: Outbound,
        chronology: Arc<dyn Chronology>,
        config: ConsensusConfig,
    ) -> Result<Self, ConsensusError> {
        if group.self_pub_key() != secret.public_key() {
            return Err(ConsensusError::KeyMismatch);
        }
        let state = RoundState::new(group.size());
        Ok(Self {
            group,
            secret,
            chain,
            processor,
            outbound,
            chronology,
            config,
            state,
            rounds: 0,
            rounds_with_block: 0,
        })
    }

    /// The shared round state (read-only outside the worker).
    pub fn state(&self) -> &RoundState {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut RoundState {
        &mut self.state
    }

    /// The validator group.
    pub fn group(&self) -> &ConsensusGroup {
        &self.group
    }

    /// The locally committed chain.
    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    /// The chronology driving this worker.
    pub fn chronology(&self) -> &Arc<dyn Chronology> {
        &self.chronology
    }

    /// Rounds this worker has lived through.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    /// Rounds that ended with a committed block.
    pub fn rounds_with_block(&self) -> u64 {
        self.rounds_with_block
    }

    // ---- outgoing subround jobs ----

    /// StartRound: clears the round state, computes the leader and
    /// rebinds the multi-signer to the current group.
    pub fn do_start_round_job(&mut self) -> bool {
        self.state.reset();

        let round = self.chronology.round_index();
        let leader_index = self.group.leader_index(round);
        if leader_index == self.group.self_index() {
            info!(round, leader = %self.group.member(leader_index), "step 0: preparing round, my turn to lead");
        } else {
            info!(round, leader = %self.group.member(leader_index), "step 0: preparing round");
        }

        match MultiSigner::new(
            self.group.pub_keys().to_vec(),
            self.secret.clone(),
            self.group.self_index() as u16,
        ) {
            Ok(signer) => {
                self.state.multi_signer = Some(signer);
                true
            }
            Err(e) => {
                error!(round, error = %e, "failed to bind multi-signer");
                false
            }
        }
    }

    /// Runs the job of the given subround, first catching up on the
    /// earliest unfinished predecessor.
    ///
    /// One job runs per tick: a node that is behind advances one subround
    /// per controller invocation.
    pub async fn run_job(&mut self, subround: SubroundId) -> bool {
        let mut target = subround;
        while let Some(prev) = target.prev_active() {
            if self.state.status(prev) == SubroundStatus::Finished {
                break;
            }
            target = prev;
        }
        match target {
            SubroundId::Block => self.do_block_job().await,
            SubroundId::CommitmentHash => self.do_commitment_hash_job().await,
            SubroundId::Bitmap => self.do_bitmap_job().await,
            SubroundId::Commitment => self.do_commitment_job().await,
            SubroundId::Signature => self.do_signature_job().await,
            _ => false,
        }
    }

    /// Block job: as leader, build and send the body then the header.
    pub async fn do_block_job(&mut self) -> bool {
        let round = self.chronology.round_index();
        if self.should_sync() {
            info!(round, subround = %SubroundId::Block, "node not synchronized, canceling round");
            self.state.cancel();
            return false;
        }

        let self_index = self.group.self_index();
        if self.state.status(SubroundId::Block) == SubroundStatus::Finished
            || self.state.job_done(self_index, SubroundId::Block)
            || !self.group.is_self_leader(round)
        {
            return false;
        }

        if !self.send_block_body().await || !self.send_block_header().await {
            return false;
        }

        self.state.set_job_done(self_index, SubroundId::Block, true);
        true
    }

    async fn send_block_body(&mut self) -> bool {
        let round = self.chronology.round_index();
        let start_subround = self.chronology.current_subround();
        let chronology = Arc::clone(&self.chronology);
        // Transaction selection stops once the subround we started in is over.
        let have_time = move || chronology.current_subround() <= start_subround;

        let body = match self
            .processor
            .create_tx_block_body(
                self.config.shard_id,
                self.config.max_transactions_in_block,
                round,
                &have_time,
            )
            .await
        {
            Ok(body) => body,
            Err(e) => {
                error!(round, error = %e, "failed to create block body");
                return false;
            }
        };

        let record = ConsensusRecord::new(
            None,
            body.rlp_encode(),
            self.self_key_bytes(),
            MessageKind::BlockBody,
            self.chronology.current_time(),
        );
        if !self.send_consensus_record(record).await {
            return false;
        }

        info!(round, txs = body.tx_count(), "step 1: sending block body");
        self.state.body = Some(body);
        true
    }

    async fn send_block_header(&mut self) -> bool {
        let round = self.chronology.round_index();
        let body_hash = match &self.state.body {
            Some(body) => body.hash(),
            None => {
                error!(round, "no block body to build a header for");
                return false;
            }
        };

        let mut header = Header::new(
            self.chain.tip_nonce() + 1,
            round,
            self.chronology.current_time(),
            self.chain.current_header_hash().unwrap_or(H256::NIL),
        );
        header.block_body_hash = body_hash;
        let header_hash = header.hash();

        let record = ConsensusRecord::new(
            Some(header_hash),
            header.rlp_encode(),
            self.self_key_bytes(),
            MessageKind::BlockHeader,
            self.chronology.current_time(),
        );
        if !self.send_consensus_record(record).await {
            return false;
        }

        info!(
            round,
            nonce = header.nonce,
            header_hash = header_hash.short_hex(),
            "step 1: sending block header"
        );
        self.state.header = Some(header);
        self.state.consensus_data = Some(header_hash);
        true
    }

    /// CommitmentHash job: create a fresh commitment and circulate its
    /// hash.
    pub async fn do_commitment_hash_job(&mut self) -> bool {
        let round = self.chronology.round_index();
        let self_index = self.group.self_index();
        if self.state.status(SubroundId::CommitmentHash) == SubroundStatus::Finished
            || self.state.job_done(self_index, SubroundId::CommitmentHash)
            || self.state.consensus_data.is_none()
        {
            return false;
        }
        let data = self.state.consensus_data.unwrap();

        let commitment_hash = {
            let Some(signer) = self.state.multi_signer.as_mut() else {
                error!(round, "no multi-signer bound");
                return false;
            };
            let (secret, commitment) = signer.create_commitment();
            let commitment_hash = keccak256(&commitment);
            let mut store = || -> Result<(), rondo_crypto::MultiSigError> {
                signer.add_commitment(self_index as u16, &commitment)?;
                signer.set_commitment_secret(&secret)?;
                signer.add_commitment_hash(self_index as u16, &commitment_hash)
            };
            if let Err(e) = store() {
                error!(round, error = %e, "failed to store own commitment");
                return false;
            }
            commitment_hash
        };

        let record = ConsensusRecord::new(
            Some(data),
            commitment_hash.to_vec(),
            self.self_key_bytes(),
            MessageKind::CommitmentHash,
            self.chronology.current_time(),
        );
        if !self.send_consensus_record(record).await {
            return false;
        }

        info!(round, "step 2: sending commitment hash");
        self.state
            .set_job_done(self_index, SubroundId::CommitmentHash, true);
        true
    }

    /// Bitmap job: as leader, pack the accepted commitment hashes into a
    /// bitmap and circulate it.
    pub async fn do_bitmap_job(&mut self) -> bool {
        let round = self.chronology.round_index();
        let self_index = self.group.self_index();
        if self.state.status(SubroundId::Bitmap) == SubroundStatus::Finished
            || self.state.job_done(self_index, SubroundId::Bitmap)
            || !self.group.is_self_leader(round)
            || self.state.consensus_data.is_none()
        {
            return false;
        }
        let data = self.state.consensus_data.unwrap();

        let bitmap = self.state.bitmap(SubroundId::CommitmentHash);
        let record = ConsensusRecord::new(
            Some(data),
            bitmap.clone(),
            self.self_key_bytes(),
            MessageKind::Bitmap,
            self.chronology.current_time(),
        );
        if !self.send_consensus_record(record).await {
            return false;
        }

        info!(
            round,
            signers = count_bitmap_bits(&bitmap),
            "step 3: sending bitmap"
        );
        for i in 0..self.group.size() {
            if self.state.job_done(i, SubroundId::CommitmentHash) {
                self.state.set_job_done(i, SubroundId::Bitmap, true);
            }
        }
        true
    }

    /// Commitment job: as a bitmap member, reveal the commitment.
    pub async fn do_commitment_job(&mut self) -> bool {
        let round = self.chronology.round_index();
        let self_index = self.group.self_index();
        if self.state.status(SubroundId::Commitment) == SubroundStatus::Finished
            || self.state.job_done(self_index, SubroundId::Commitment)
            || !self.state.job_done(self_index, SubroundId::Bitmap)
            || self.state.consensus_data.is_none()
        {
            return false;
        }
        let data = self.state.consensus_data.unwrap();

        let commitment = {
            let Some(signer) = self.state.multi_signer.as_ref() else {
                error!(round, "no multi-signer bound");
                return false;
            };
            match signer.commitment(self_index as u16) {
                Ok(commitment) => commitment,
                Err(e) => {
                    error!(round, error = %e, "own commitment missing");
                    return false;
                }
            }
        };

        let record = ConsensusRecord::new(
            Some(data),
            commitment.to_vec(),
            self.self_key_bytes(),
            MessageKind::Commitment,
            self.chronology.current_time(),
        );
        if !self.send_consensus_record(record).await {
            return false;
        }

        info!(round, "step 4: sending commitment");
        self.state
            .set_job_done(self_index, SubroundId::Commitment, true);
        true
    }

    /// Signature job: as a bitmap member, aggregate the revealed
    /// commitments and send the partial signature.
    pub async fn do_signature_job(&mut self) -> bool {
        let round = self.chronology.round_index();
        let self_index = self.group.self_index();
        if self.state.status(SubroundId::Signature) == SubroundStatus::Finished
            || self.state.job_done(self_index, SubroundId::Signature)
            || !self.state.job_done(self_index, SubroundId::Bitmap)
            || self.state.consensus_data.is_none()
        {
            return false;
        }
        let data = self.state.consensus_data.unwrap();
        let bitmap = self.state.bitmap(SubroundId::Bitmap);

        let share = {
            let Some(signer) = self.state.multi_signer.as_mut() else {
                error!(round, "no multi-signer bound");
                return false;
            };
            signer.set_message(data.as_bytes());
            // The aggregate may already exist if a peer's signature share
            // arrived before this job ran.
            if !signer.has_aggregate_commitment() {
                if let Err(e) = signer.aggregate_commitments(&bitmap) {
                    error!(round, error = %e, "failed to aggregate commitments");
                    return false;
                }
            }
            match signer.sign_partial() {
                Ok(share) => share,
                Err(e) => {
                    error!(round, error = %e, "failed to sign partially");
                    return false;
                }
            }
        };

        let record = ConsensusRecord::new(
            Some(data),
            share.to_vec(),
            self.self_key_bytes(),
            MessageKind::Signature,
            self.chronology.current_time(),
        );
        if !self.send_consensus_record(record).await {
            return false;
        }

        info!(round, "step 5: sending signature");
        self.state
            .set_job_done(self_index, SubroundId::Signature, true);
        true
    }

    /// EndRound job: aggregate the partial signatures, commit the block
    /// and broadcast body then header.
    pub async fn do_end_round_job(&mut self) -> bool {
        if !self.check_end_round_consensus() {
            return false;
        }
        let round = self.chronology.round_index();
        let bitmap = self.state.bitmap(SubroundId::Bitmap);

        let signature = {
            let Some(signer) = self.state.multi_signer.as_ref() else {
                error!(round, "no multi-signer bound");
                return false;
            };
            match signer.aggregate_sigs(&bitmap) {
                Ok(signature) => signature,
                Err(e) => {
                    error!(round, error = %e, "failed to aggregate signatures");
                    return false;
                }
            }
        };

        let (header, body) = {
            let Some(header) = self.state.header.as_mut() else {
                error!(round, "no header to commit");
                return false;
            };
            header.signature = signature;
            header.pub_keys_bitmap = bitmap;
            let Some(body) = self.state.body.clone() else {
                error!(round, "no body to commit");
                return false;
            };
            (header.clone(), body)
        };

        if let Err(e) = self
            .processor
            .commit_block(&mut self.chain, &header, &body)
            .await
        {
            error!(round, error = %e, "commit failed, reverting account state");
            self.processor.revert_account_state();
            return false;
        }

        if let Err(e) = self.processor.remove_block_txs_from_pool(&body).await {
            warn!(round, error = %e, "failed to remove committed txs from pool");
        }

        if let Err(e) = self.broadcast_tx_block_body().await {
            error!(round, error = %e, "failed to broadcast block body");
        }
        if let Err(e) = self.broadcast_header().await {
            error!(round, error = %e, "failed to broadcast header");
        }

        if self.group.is_self_leader(round) {
            info!(round, nonce = header.nonce, "added proposed block to the blockchain");
        } else {
            info!(round, nonce = header.nonce, "added synchronized block to the blockchain");
        }

        self.rounds += 1;
        self.rounds_with_block += 1;
        true
    }

    // ---- extend handlers ----

    /// Marks a subround Extended when its deadline fires before it
    /// finishes.
    pub fn extend_subround(&mut self, subround: SubroundId) {
        match subround {
            SubroundId::Block => self.extend_block(),
            SubroundId::CommitmentHash => self.extend_commitment_hash(),
            SubroundId::Bitmap => self.extend_bitmap(),
            SubroundId::Commitment => self.extend_commitment(),
            SubroundId::Signature => self.extend_signature(),
            _ => {}
        }
    }

    fn extend_block(&mut self) {
        self.state.set_status(SubroundId::Block, SubroundStatus::Extended);
        info!(subround = %SubroundId::Block, "step 1: extended subround");
    }

    fn extend_commitment_hash(&mut self) {
        self.state
            .set_status(SubroundId::CommitmentHash, SubroundStatus::Extended);
        let got = self.state.compute_size(SubroundId::CommitmentHash);
        if got < self.group.threshold(SubroundId::CommitmentHash) {
            info!(
                got,
                total = self.group.size(),
                "step 2: extended subround, not enough commitment hashes"
            );
        } else {
            info!(subround = %SubroundId::CommitmentHash, "step 2: extended subround");
        }
    }

    fn extend_bitmap(&mut self) {
        self.state.set_status(SubroundId::Bitmap, SubroundStatus::Extended);
        info!(subround = %SubroundId::Bitmap, "step 3: extended subround");
    }

    fn extend_commitment(&mut self) {
        self.state
            .set_status(SubroundId::Commitment, SubroundStatus::Extended);
        info!(
            got = self.state.compute_size(SubroundId::Commitment),
            total = self.group.size(),
            "step 4: extended subround, not enough commitments"
        );
    }

    fn extend_signature(&mut self) {
        self.state
            .set_status(SubroundId::Signature, SubroundStatus::Extended);
        info!(
            got = self.state.compute_size(SubroundId::Signature),
            total = self.group.size(),
            "step 5: extended subround, not enough signatures"
        );
    }

    /// EndRound fallback: the round produced no block.
    pub fn extend_end_round(&mut self) {
        info!(
            round = self.chronology.round_index(),
            "no block was added to the blockchain this round"
        );
        self.rounds += 1;
    }

    // ---- incoming handlers ----

    /// Routes an accepted record to the handler of its kind.
    pub async fn handle_record(&mut self, record: ConsensusRecord) -> bool {
        match record.kind {
            MessageKind::BlockBody => self.received_block_body(record).await,
            MessageKind::BlockHeader => self.received_block_header(record).await,
            MessageKind::CommitmentHash => self.received_commitment_hash(record),
            MessageKind::Bitmap => self.received_bitmap(record),
            MessageKind::Commitment => self.received_commitment(record),
            MessageKind::Signature => self.received_signature(record),
            MessageKind::Unknown => false,
        }
    }

    /// Handles a block body from the leader.
    pub async fn received_block_body(&mut self, record: ConsensusRecord) -> bool {
        let round = self.chronology.round_index();
        if self.is_self(&record) || !self.is_sender_leader(&record, round) || self.state.body.is_some()
        {
            return false;
        }
        let Some(body) = self.decode_block_body(&record.payload) else {
            return false;
        };

        info!(round, txs = body.tx_count(), "step 1: received block body");
        self.state.body = Some(body);
        self.try_process_block(round).await
    }

    /// Handles a block header from the leader.
    ///
    /// An invalid header aborts the round.
    pub async fn received_block_header(&mut self, record: ConsensusRecord) -> bool {
        let round = self.chronology.round_index();
        let leader_index = self.group.leader_index(round);
        if self.is_self(&record)
            || self.state.status(SubroundId::Block) == SubroundStatus::Finished
            || !self.is_sender_leader(&record, round)
            || self.state.job_done(leader_index, SubroundId::Block)
        {
            return false;
        }
        let Some(header_hash) = record.header_hash else {
            return false;
        };
        let Some(header) = self.decode_block_header(&record.payload) else {
            return false;
        };

        if !self.check_if_block_is_valid(&header) {
            info!(
                round,
                subround = %SubroundId::Block,
                "canceling round: invalid header from leader"
            );
            self.state.cancel();
            return false;
        }

        info!(
            round,
            nonce = header.nonce,
            header_hash = header_hash.short_hex(),
            "step 1: received block header"
        );
        self.state.header = Some(header);
        self.state.consensus_data = Some(header_hash);
        self.try_process_block(round).await
    }

    /// Handles a commitment hash from a group member.
    pub fn received_commitment_hash(&mut self, record: ConsensusRecord) -> bool {
        let round = self.chronology.round_index();
        let Some(sender) = self.sender_index(&record) else {
            return false;
        };
        if self.is_self(&record)
            || self.state.status(SubroundId::CommitmentHash) == SubroundStatus::Finished
            || self.state.job_done(sender, SubroundId::CommitmentHash)
            || !self.matches_consensus_data(&record)
        {
            return false;
        }

        // A leader that already collected its threshold ignores the rest.
        if self.group.is_self_leader(round)
            && self.state.compute_size(SubroundId::CommitmentHash)
                >= self.group.threshold(SubroundId::CommitmentHash)
        {
            return false;
        }

        {
            let Some(signer) = self.state.multi_signer.as_mut() else {
                return false;
            };
            if let Err(e) = signer.add_commitment_hash(sender as u16, &record.payload) {
                warn!(round, sender, error = %e, "rejecting commitment hash");
                return false;
            }
        }

        debug!(round, sender, "step 2: received commitment hash");
        self.state
            .set_job_done(sender, SubroundId::CommitmentHash, true);
        true
    }

    /// Handles the leader's bitmap.
    ///
    /// A bitmap below the threshold aborts the round.
    pub fn received_bitmap(&mut self, record: ConsensusRecord) -> bool {
        let round = self.chronology.round_index();
        let leader_index = self.group.leader_index(round);
        if self.is_self(&record)
            || self.state.status(SubroundId::Bitmap) == SubroundStatus::Finished
            || !self.is_sender_leader(&record, round)
            || self.state.job_done(leader_index, SubroundId::Bitmap)
            || !self.matches_consensus_data(&record)
        {
            return false;
        }

        let signers = count_bitmap_bits(&record.payload);
        if signers < self.group.threshold(SubroundId::Bitmap) {
            info!(
                round,
                signers,
                needed = self.group.threshold(SubroundId::Bitmap),
                "canceling round: bitmap below threshold"
            );
            self.state.cancel();
            return false;
        }

        self.state.apply_bitmap(SubroundId::Bitmap, &record.payload);
        let selected = self
            .state
            .job_done(self.group.self_index(), SubroundId::Bitmap);
        info!(round, signers, selected, "step 3: received bitmap from leader");
        true
    }

    /// Handles a commitment reveal from a bitmap member, checking it
    /// against the previously circulated hash.
    pub fn received_commitment(&mut self, record: ConsensusRecord) -> bool {
        let round = self.chronology.round_index();
        let Some(sender) = self.sender_index(&record) else {
            return false;
        };
        if self.is_self(&record)
            || self.state.status(SubroundId::Commitment) == SubroundStatus::Finished
            || !self.state.job_done(sender, SubroundId::Bitmap)
            || self.state.job_done(sender, SubroundId::Commitment)
            || !self.matches_consensus_data(&record)
        {
            return false;
        }

        {
            let Some(signer) = self.state.multi_signer.as_mut() else {
                return false;
            };
            let stored = match signer.commitment_hash(sender as u16) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!(round, sender, error = %e, "rejecting commitment");
                    return false;
                }
            };
            if keccak256(&record.payload) != stored {
                warn!(
                    round,
                    sender, "rejecting commitment: does not match its committed hash"
                );
                return false;
            }
            if let Err(e) = signer.add_commitment(sender as u16, &record.payload) {
                warn!(round, sender, error = %e, "rejecting commitment");
                return false;
            }
        }

        debug!(round, sender, "step 4: received commitment");
        self.state.set_job_done(sender, SubroundId::Commitment, true);
        true
    }

    /// Handles a partial signature from a bitmap member, verifying it
    /// against the bound message before storing it.
    pub fn received_signature(&mut self, record: ConsensusRecord) -> bool {
        let round = self.chronology.round_index();
        let Some(sender) = self.sender_index(&record) else {
            return false;
        };
        if self.is_self(&record)
            || self.state.status(SubroundId::Signature) == SubroundStatus::Finished
            || !self.state.job_done(sender, SubroundId::Bitmap)
            || self.state.job_done(sender, SubroundId::Signature)
            || !self.matches_consensus_data(&record)
        {
            return false;
        }

        // A node outside the bitmap never runs the signature job, so the
        // commitment aggregate may not exist yet; build it here once all
        // selected commitments have been revealed.
        if !self.ensure_commitment_aggregate() {
            return false;
        }

        {
            let Some(signer) = self.state.multi_signer.as_mut() else {
                return false;
            };
            if let Err(e) = signer.verify_partial(sender as u16, &record.payload) {
                warn!(round, sender, error = %e, "rejecting signature share");
                return false;
            }
            if let Err(e) = signer.add_sign_partial(sender as u16, &record.payload) {
                warn!(round, sender, error = %e, "rejecting signature share");
                return false;
            }
        }

        debug!(round, sender, "step 5: received signature share");
        self.state.set_job_done(sender, SubroundId::Signature, true);
        true
    }

    // ---- validity and sync checks ----

    /// Validates a proposed header against the local chain tip.
    ///
    /// Nonce gaps are accepted with a warning while the bootstrap
    /// mechanism is out of scope; a node that is behind would otherwise
    /// never rejoin.
    pub fn check_if_block_is_valid(&self, header: &Header) -> bool {
        let Some(tip) = self.chain.current_header() else {
            if header.nonce == 1 {
                if header.prev_hash.is_nil() {
                    return true;
                }
                info!(
                    prev_hash = header.prev_hash.short_hex(),
                    "hash mismatch: first block must have a nil previous hash"
                );
                return false;
            }
            warn!(
                nonce = header.nonce,
                "accepted block with a nonce gap: bootstrap is not implemented yet"
            );
            return true;
        };

        let expected = tip.nonce + 1;
        if header.nonce < expected {
            info!(
                tip_nonce = tip.nonce,
                nonce = header.nonce,
                "nonce mismatch: received block is behind the local tip"
            );
            return false;
        }
        if header.nonce == expected {
            let tip_hash = tip.hash();
            if header.prev_hash == tip_hash {
                return true;
            }
            info!(
                tip_hash = tip_hash.short_hex(),
                prev_hash = header.prev_hash.short_hex(),
                "hash mismatch: received block does not link to the local tip"
            );
            return false;
        }
        warn!(
            tip_nonce = tip.nonce,
            nonce = header.nonce,
            "accepted block with a nonce gap: bootstrap is not implemented yet"
        );
        true
    }

    /// Whether the node is behind and should keep bootstrapping instead
    /// of participating in this round.
    pub fn should_sync(&self) -> bool {
        let round = self.chronology.round_index();
        match self.chain.current_header() {
            None => round > 0,
            Some(tip) => tip.round + 1 < round,
        }
    }

    // ---- internals ----

    async fn try_process_block(&mut self, round: u64) -> bool {
        if self.state.header.is_none() || self.state.body.is_none() {
            return true;
        }
        let header = self.state.header.clone().expect("checked above");
        let body = self.state.body.clone().expect("checked above");

        if let Err(e) = self.processor.process_block(&self.chain, &header, &body).await {
            error!(round, error = %e, "failed to process proposed block");
            return false;
        }

        let Some(data) = self.state.consensus_data else {
            return false;
        };
        if let Some(signer) = self.state.multi_signer.as_mut() {
            signer.set_message(data.as_bytes());
        }
        let leader_index = self.group.leader_index(round);
        self.state.set_job_done(leader_index, SubroundId::Block, true);
        true
    }

    fn ensure_commitment_aggregate(&mut self) -> bool {
        let Some(data) = self.state.consensus_data else {
            return false;
        };
        let bitmap = self.state.bitmap(SubroundId::Bitmap);
        let Some(signer) = self.state.multi_signer.as_mut() else {
            return false;
        };
        if signer.has_aggregate_commitment() {
            return true;
        }
        signer.set_message(data.as_bytes());
        if let Err(e) = signer.aggregate_commitments(&bitmap) {
            debug!(error = %e, "cannot aggregate commitments yet");
            return false;
        }
        true
    }

    async fn send_consensus_record(&self, mut record: ConsensusRecord) -> bool {
        record.sign(&self.secret);
        match self.outbound.send_consensus(record.rlp_encode()).await {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "failed to send consensus record");
                false
            }
        }
    }

    async fn broadcast_tx_block_body(&self) -> Result<(), ConsensusError> {
        let Some(body) = &self.state.body else {
            return Err(ConsensusError::MissingBody);
        };
        self.outbound.broadcast_body(body.rlp_encode()).await
    }

    async fn broadcast_header(&self) -> Result<(), ConsensusError> {
        let Some(header) = &self.state.header else {
            return Err(ConsensusError::MissingHeader);
        };
        self.outbound.broadcast_header(header.rlp_encode()).await
    }

    fn decode_block_body(&self, data: &[u8]) -> Option<TxBlockBody> {
        match TxBlockBody::rlp_decode(data) {
            Ok(body) => Some(body),
            Err(e) => {
                warn!(error = %e, "dropping malformed block body");
                None
            }
        }
    }

    fn decode_block_header(&self, data: &[u8]) -> Option<Header> {
        match Header::rlp_decode(data) {
            Ok(header) => Some(header),
            Err(e) => {
                warn!(error = %e, "dropping malformed block header");
                None
            }
        }
    }

    fn self_key_bytes(&self) -> Vec<u8> {
        self.group.self_pub_key().to_bytes().to_vec()
    }

    fn is_self(&self, record: &ConsensusRecord) -> bool {
        record.pub_key.as_slice() == self.group.self_pub_key().as_bytes()
    }

    fn is_sender_leader(&self, record: &ConsensusRecord, round: u64) -> bool {
        record.pub_key.as_slice() == self.group.leader(round).as_bytes()
    }

    fn sender_index(&self, record: &ConsensusRecord) -> Option<usize> {
        self.group.index_of(&record.pub_key)
    }

    fn matches_consensus_data(&self, record: &ConsensusRecord) -> bool {
        match (record.header_hash, self.state.consensus_data) {
            (Some(received), Some(local)) => received == local,
            _ => false,
        }
    }
}
