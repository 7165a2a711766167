//! Per-round consensus state: the validator group, the job-done matrix,
//! subround statuses and the drafts being agreed on.
//!
//! The state in this module is owned exclusively by the round controller
//! task. Ingress tasks never touch it; handlers run on the owner.

use crate::subround::{SubroundId, SubroundStatus};
use rondo_crypto::{MultiSigner, SchnorrPublicKey};
use rondo_types::{Header, TxBlockBody, H256};

/// Errors building the group state.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoundStateError {
    /// The validator group is empty
    #[error("empty consensus group")]
    EmptyGroup,

    /// Self index does not fall inside the group
    #[error("self index {index} out of range for group of {size}")]
    SelfIndexOutOfRange {
        /// The offending index
        index: usize,
        /// The group size
        size: usize,
    },
}

/// The fixed, ordered validator group of the current rounds.
///
/// The leader of round `r` is the validator at position `r mod N`.
#[derive(Debug, Clone)]
pub struct ConsensusGroup {
    pub_keys: Vec<SchnorrPublicKey>,
    self_index: usize,
}

impl ConsensusGroup {
    /// Creates a group from an ordered list of validator keys and the
    /// node's own position in it.
    pub fn new(pub_keys: Vec<SchnorrPublicKey>, self_index: usize) -> Result<Self, RoundStateError> {
        if pub_keys.is_empty() {
            return Err(RoundStateError::EmptyGroup);
        }
        if self_index >= pub_keys.len() {
            return Err(RoundStateError::SelfIndexOutOfRange {
                index: self_index,
                size: pub_keys.len(),
            });
        }
        Ok(Self {
            pub_keys,
            self_index,
        })
    }

    /// Number of validators in the group.
    pub fn size(&self) -> usize {
        self.pub_keys.len()
    }

    /// The ordered validator keys.
    pub fn pub_keys(&self) -> &[SchnorrPublicKey] {
        &self.pub_keys
    }

    /// The node's own position in the group.
    pub fn self_index(&self) -> usize {
        self.self_index
    }

    /// The node's own public key.
    pub fn self_pub_key(&self) -> &SchnorrPublicKey {
        &self.pub_keys[self.self_index]
    }

    /// The validator at a given position.
    pub fn member(&self, index: usize) -> &SchnorrPublicKey {
        &self.pub_keys[index]
    }

    /// Position of the leader for a round.
    pub fn leader_index(&self, round_index: u64) -> usize {
        (round_index % self.pub_keys.len() as u64) as usize
    }

    /// The leader's public key for a round.
    pub fn leader(&self, round_index: u64) -> &SchnorrPublicKey {
        &self.pub_keys[self.leader_index(round_index)]
    }

    /// Whether this node leads the given round.
    pub fn is_self_leader(&self, round_index: u64) -> bool {
        self.leader_index(round_index) == self.self_index
    }

    /// Position of a validator given its x-only key bytes.
    pub fn index_of(&self, pub_key: &[u8]) -> Option<usize> {
        self.pub_keys
            .iter()
            .position(|pk| pk.as_bytes().as_slice() == pub_key)
    }

    /// Whether the key belongs to the group.
    pub fn is_member(&self, pub_key: &[u8]) -> bool {
        self.index_of(pub_key).is_some()
    }

    /// Evidence required to finish a subround.
    ///
    /// Block needs the single proposer; the interactive subrounds all
    /// need `2N/3 + 1` contributions.
    pub fn threshold(&self, subround: SubroundId) -> usize {
        match subround {
            SubroundId::Block => 1,
            SubroundId::CommitmentHash
            | SubroundId::Bitmap
            | SubroundId::Commitment
            | SubroundId::Signature => 2 * self.pub_keys.len() / 3 + 1,
            SubroundId::StartRound | SubroundId::EndRound => 0,
        }
    }
}

/// Mutable state of the round in progress.
///
/// Cleared at StartRound, mutated only by the controller task, read-only
/// observable at EndRound.
#[derive(Debug)]
pub struct RoundState {
    group_size: usize,
    statuses: [SubroundStatus; SubroundId::COUNT],
    job_done: Vec<[bool; SubroundId::COUNT]>,
    canceled: bool,
    /// Draft header received from (or proposed by) the leader
    pub header: Option<Header>,
    /// Draft body received from (or proposed by) the leader
    pub body: Option<TxBlockBody>,
    /// The round's consensus data: the proposed header's hash
    pub consensus_data: Option<H256>,
    /// The multi-signer bound to the current group for this round
    pub multi_signer: Option<MultiSigner>,
}

impl RoundState {
    /// Creates empty state for a group of the given size.
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size,
            statuses: [SubroundStatus::NotFinished; SubroundId::COUNT],
            job_done: vec![[false; SubroundId::COUNT]; group_size],
            canceled: false,
            header: None,
            body: None,
            consensus_data: None,
            multi_signer: None,
        }
    }

    /// Clears everything for a new round.
    pub fn reset(&mut self) {
        self.statuses = [SubroundStatus::NotFinished; SubroundId::COUNT];
        self.job_done = vec![[false; SubroundId::COUNT]; self.group_size];
        self.canceled = false;
        self.header = None;
        self.body = None;
        self.consensus_data = None;
        self.multi_signer = None;
    }

    /// Status of a subround.
    pub fn status(&self, subround: SubroundId) -> SubroundStatus {
        self.statuses[subround.index()]
    }

    /// Sets the status of a subround.
    pub fn set_status(&mut self, subround: SubroundId, status: SubroundStatus) {
        self.statuses[subround.index()] = status;
    }

    /// Whether the validator at `index` has an accepted contribution for
    /// the subround.
    pub fn job_done(&self, index: usize, subround: SubroundId) -> bool {
        self.job_done[index][subround.index()]
    }

    /// Records (or clears) a validator's contribution for a subround.
    pub fn set_job_done(&mut self, index: usize, subround: SubroundId, done: bool) {
        self.job_done[index][subround.index()] = done;
    }

    /// Number of accepted contributions in a subround's column.
    pub fn compute_size(&self, subround: SubroundId) -> usize {
        self.job_done
            .iter()
            .filter(|row| row[subround.index()])
            .count()
    }

    /// Packs a subround's job-done column into a little-endian bitmap of
    /// `⌈N/8⌉` bytes, in validator-group order.
    pub fn bitmap(&self, subround: SubroundId) -> Vec<u8> {
        let mut bitmap = vec![0u8; (self.group_size + 7) / 8];
        for (i, row) in self.job_done.iter().enumerate() {
            if row[subround.index()] {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        bitmap
    }

    /// Marks the job done for every group position set in `bitmap`.
    pub fn apply_bitmap(&mut self, subround: SubroundId, bitmap: &[u8]) {
        for i in 0..self.group_size {
            let byte = i / 8;
            if byte < bitmap.len() && bitmap[byte] & (1 << (i % 8)) != 0 {
                self.set_job_done(i, subround, true);
            }
        }
    }

    /// Whether the round has been aborted by a handler.
    pub fn canceled(&self) -> bool {
        self.canceled
    }

    /// Aborts the round; the controller skips the remaining subrounds.
    pub fn cancel(&mut self) {
        self.canceled = true;
    }
}

/// Counts the set bits of a bitmap.
pub fn count_bitmap_bits(bitmap: &[u8]) -> usize {
    bitmap.iter().map(|b| b.count_ones() as usize).sum()
}
