//! # Rondo Consensus
//!
//! The SPoS (Secure Proof-of-Stake) single-leader consensus round worker
//! for the Rondo chain: a fixed validator group agrees on and commits
//! exactly one block per round, certified by an aggregated Schnorr
//! multi-signature.
//!
//! ## Round Flow
//!
//! ```text
//! Round r, leader = group[r mod N]:
//!
//! ┌──────────────────┐
//! │   START_ROUND    │  reset state, rebind multi-signer
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      BLOCK       │  leader sends body, then header
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ COMMITMENT_HASH  │  everyone sends H(commitment)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      BITMAP      │  leader packs accepted hashes into a bitmap
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    COMMITMENT    │  bitmap members reveal commitments
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    SIGNATURE     │  bitmap members send partial signatures
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    END_ROUND     │  aggregate, commit, broadcast body + header
//! └──────────────────┘
//! ```
//!
//! Every subround has a deadline from the chronology; a subround whose
//! deadline fires without finishing is Extended, and a round that cannot
//! satisfy all thresholds produces no block (there is no view change or
//! leader re-election inside a round).
//!
//! ## Concurrency model
//!
//! One task — the [`RoundController`] — owns the whole round state. The
//! [`Dispatcher`] validates envelope signatures on ingress tasks and
//! fans records into six bounded queues; the controller drains them
//! between job ticks and runs every handler itself, so handlers need no
//! locks. Outbound sends hand off to the embedder's transport tasks
//! through the [`Outbound`] channels.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

mod checks;
pub mod chronology;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod message;
pub mod round_state;
pub mod subround;
pub mod worker;

// Re-export main types at crate root for convenience
pub use chronology::{Chronology, RoundClock, SubroundSchedule};
pub use config::ConsensusConfig;
pub use controller::{RoundController, RoundOutcome};
pub use dispatcher::{ingress_channel, Dispatcher, IngressQueues};
pub use message::{ConsensusRecord, RecordError};
pub use round_state::{count_bitmap_bits, ConsensusGroup, RoundState, RoundStateError};
pub use subround::{MessageKind, SubroundId, SubroundStatus};
pub use worker::{BlockProcessor, ConsensusError, ConsensusWorker, HaveTime, Outbound};
