//! The round controller.
//!
//! Runs the seven subrounds of each round in order. In every subround the
//! controller ticks the worker's outgoing job, drains validated records
//! from the ingress queues into the handlers, and falls back to the
//! extend handler when the subround's deadline fires. The controller is
//! the single owner of the worker and its round state.

use crate::dispatcher::IngressQueues;
use crate::subround::SubroundId;
use crate::worker::{BlockProcessor, ConsensusWorker};
use tracing::debug;

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The agreed block was committed and broadcast
    BlockCommitted,
    /// The round aborted or timed out without a block
    NoBlock,
}

/// Drives a [`ConsensusWorker`] through rounds.
pub struct RoundController<P: BlockProcessor> {
    worker: ConsensusWorker<P>,
    queues: IngressQueues,
}

impl<P: BlockProcessor> RoundController<P> {
    /// Creates a controller owning the worker and the ingress queues.
    pub fn new(worker: ConsensusWorker<P>, queues: IngressQueues) -> Self {
        Self { worker, queues }
    }

    /// The owned worker, for observation.
    pub fn worker(&self) -> &ConsensusWorker<P> {
        &self.worker
    }

    /// Runs rounds forever, waiting out the remainder of each round
    /// before starting the next.
    pub async fn run(&mut self) {
        loop {
            let round_end = self.worker.chronology().round_end();
            self.run_round().await;
            tokio::time::sleep_until(round_end).await;
        }
    }

    /// Runs one full round: StartRound, the five active subrounds, then
    /// EndRound.
    pub async fn run_round(&mut self) -> RoundOutcome {
        if !self.worker.do_start_round_job() {
            self.worker.extend_end_round();
            return RoundOutcome::NoBlock;
        }

        for subround in SubroundId::ACTIVE {
            if !self.drive_subround(subround).await {
                // A handler or job canceled the round.
                self.worker.extend_end_round();
                return RoundOutcome::NoBlock;
            }
        }

        self.finish_round().await
    }

    /// Drives one subround until it finishes or its deadline fires.
    ///
    /// Returns false when the round was canceled.
    async fn drive_subround(&mut self, subround: SubroundId) -> bool {
        let deadline = self.worker.chronology().deadline(subround);
        loop {
            if self.worker.state().canceled() {
                return false;
            }
            self.worker.run_job(subround).await;
            if self.worker.state().canceled() {
                return false;
            }
            if self.worker.check_subround(subround) {
                return true;
            }

            match self.queues.recv_until(deadline).await {
                Some(record) => {
                    debug!(kind = %record.kind, "ingress record");
                    self.worker.handle_record(record).await;
                }
                None => {
                    self.worker.extend_subround(subround);
                    return true;
                }
            }
        }
    }

    /// EndRound: commit once every prior subround passed its check, keep
    /// draining messages until then, give up at the deadline.
    async fn finish_round(&mut self) -> RoundOutcome {
        let deadline = self.worker.chronology().deadline(SubroundId::EndRound);
        loop {
            if self.worker.state().canceled() {
                self.worker.extend_end_round();
                return RoundOutcome::NoBlock;
            }
            if self.worker.check_end_round_consensus() {
                return if self.worker.do_end_round_job().await {
                    RoundOutcome::BlockCommitted
                } else {
                    self.worker.extend_end_round();
                    RoundOutcome::NoBlock
                };
            }

            match self.queues.recv_until(deadline).await {
                Some(record) => {
                    self.worker.handle_record(record).await;
                }
                None => {
                    self.worker.extend_end_round();
                    return RoundOutcome::NoBlock;
                }
            }
        }
    }
}
