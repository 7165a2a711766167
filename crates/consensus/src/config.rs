//! Consensus configuration.

use std::time::Duration;

/// Static per-node consensus parameters.
///
/// All values are fixed for the lifetime of a round; nothing here is
/// mutable from within the round. Group size and thresholds derive from
/// the [`ConsensusGroup`](crate::round_state::ConsensusGroup); subround
/// deadlines derive from the round duration via the chronology.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// The shard this node builds blocks for
    pub shard_id: u32,
    /// Upper bound on transactions selected into one block
    pub max_transactions_in_block: usize,
    /// Duration of one full round
    pub round_duration: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            shard_id: 0,
            max_transactions_in_block: 1000,
            round_duration: Duration::from_secs(4),
        }
    }
}

impl ConsensusConfig {
    /// A fast configuration for testing.
    pub fn fast() -> Self {
        Self {
            round_duration: Duration::from_millis(400),
            ..Default::default()
        }
    }
}
