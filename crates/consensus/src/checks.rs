//! Per-subround threshold checks.
//!
//! Each check answers "has enough evidence been collected to declare this
//! subround finished?" and records the transition. Finished is terminal:
//! a finished subround is never reopened, while an extended subround can
//! still finish once the missing evidence arrives.

use crate::round_state::count_bitmap_bits;
use crate::subround::{SubroundId, SubroundStatus};
use crate::worker::{BlockProcessor, ConsensusWorker};
use tracing::info;

impl<P: BlockProcessor> ConsensusWorker<P> {
    /// Runs the threshold check of a subround, marking it Finished when
    /// it passes.
    pub fn check_subround(&mut self, subround: SubroundId) -> bool {
        match subround {
            SubroundId::Block => self.check_block_consensus(),
            SubroundId::CommitmentHash => self.check_commitment_hash_consensus(),
            SubroundId::Bitmap => self.check_bitmap_consensus(),
            SubroundId::Commitment => self.check_commitment_consensus(),
            SubroundId::Signature => self.check_signature_consensus(),
            SubroundId::StartRound | SubroundId::EndRound => true,
        }
    }

    /// Block is finished once the leader's proposal has been accepted.
    pub fn check_block_consensus(&mut self) -> bool {
        if self.state().status(SubroundId::Block) == SubroundStatus::Finished {
            return true;
        }
        let round = self.chronology().round_index();
        let leader_index = self.group().leader_index(round);
        if self.state().job_done(leader_index, SubroundId::Block) {
            if !self.group().is_self_leader(round) {
                info!(round, "step 1: synchronized block");
            }
            self.finish_subround(SubroundId::Block);
            return true;
        }
        false
    }

    /// CommitmentHash is finished when enough hashes were collected: the
    /// leader waits for its own threshold, everyone else only needs
    /// enough to know a bitmap can form.
    pub fn check_commitment_hash_consensus(&mut self) -> bool {
        if self.state().status(SubroundId::CommitmentHash) == SubroundStatus::Finished {
            return true;
        }
        let round = self.chronology().round_index();
        let threshold = if self.group().is_self_leader(round) {
            self.group().threshold(SubroundId::CommitmentHash)
        } else {
            self.group().threshold(SubroundId::Bitmap)
        };
        let got = self.state().compute_size(SubroundId::CommitmentHash);
        if got >= threshold {
            info!(
                round,
                got,
                total = self.group().size(),
                "step 2: collected enough commitment hashes"
            );
            self.finish_subround(SubroundId::CommitmentHash);
            return true;
        }
        false
    }

    /// Bitmap is finished once an accepted bitmap covers the threshold.
    pub fn check_bitmap_consensus(&mut self) -> bool {
        if self.state().status(SubroundId::Bitmap) == SubroundStatus::Finished {
            return true;
        }
        let round = self.chronology().round_index();
        let got = self.state().compute_size(SubroundId::Bitmap);
        if got >= self.group().threshold(SubroundId::Bitmap) {
            if !self.group().is_self_leader(round) {
                let selected = self
                    .state()
                    .job_done(self.group().self_index(), SubroundId::Bitmap);
                info!(
                    round,
                    got,
                    total = self.group().size(),
                    selected,
                    "step 3: bitmap from leader covers enough commitment hashes"
                );
            }
            self.finish_subround(SubroundId::Bitmap);
            return true;
        }
        false
    }

    /// Commitment is finished when every bitmap position has revealed a
    /// hash-verified commitment.
    pub fn check_commitment_consensus(&mut self) -> bool {
        if self.state().status(SubroundId::Commitment) == SubroundStatus::Finished {
            return true;
        }
        if self.bitmap_column_covered(SubroundId::Commitment) {
            info!(
                round = self.chronology().round_index(),
                got = self.state().compute_size(SubroundId::Commitment),
                total = self.group().size(),
                "step 4: collected all commitments in the bitmap"
            );
            self.finish_subround(SubroundId::Commitment);
            return true;
        }
        false
    }

    /// Signature is finished when every bitmap position has sent a
    /// verified partial signature.
    pub fn check_signature_consensus(&mut self) -> bool {
        if self.state().status(SubroundId::Signature) == SubroundStatus::Finished {
            return true;
        }
        if self.bitmap_column_covered(SubroundId::Signature) {
            info!(
                round = self.chronology().round_index(),
                got = self.state().compute_size(SubroundId::Signature),
                total = self.group().size(),
                "step 5: collected all signatures in the bitmap"
            );
            self.finish_subround(SubroundId::Signature);
            return true;
        }
        false
    }

    /// Whether every subround from Block through Signature has met its
    /// threshold, running the pending checks along the way.
    pub fn check_end_round_consensus(&mut self) -> bool {
        SubroundId::ACTIVE
            .into_iter()
            .all(|subround| self.check_subround(subround))
    }

    /// True when the accepted bitmap meets the threshold and every
    /// selected position also contributed in `column`.
    fn bitmap_column_covered(&self, column: SubroundId) -> bool {
        let bitmap = self.state().bitmap(SubroundId::Bitmap);
        if count_bitmap_bits(&bitmap) < self.group().threshold(SubroundId::Bitmap) {
            return false;
        }
        (0..self.group().size()).all(|i| {
            !self.state().job_done(i, SubroundId::Bitmap) || self.state().job_done(i, column)
        })
    }

    fn finish_subround(&mut self, subround: SubroundId) {
        info!(subround = %subround, "subround finished");
        self.state_mut().set_status(subround, SubroundStatus::Finished);
    }
}
