//! Round chronology: the offset-corrected time source that slices time
//! into rounds and subrounds.
//!
//! The consensus core consumes the [`Chronology`] trait; [`RoundClock`]
//! implements it from wall time, a fixed round duration and a
//! [`SubroundSchedule`] of per-subround deadlines. Tests drive the core
//! with a manual clock instead.

use crate::subround::SubroundId;
use std::time::Duration;
use tokio::time::Instant;

/// Clock service consumed by the consensus core.
///
/// All times are offset-corrected: `clock_offset` is the correction the
/// embedder's time-sync layer computed against the network.
pub trait Chronology: Send + Sync {
    /// Index of the current round.
    fn round_index(&self) -> u64;

    /// The correction applied to the local clock.
    fn clock_offset(&self) -> Duration;

    /// Offset-corrected unix time in seconds.
    fn current_time(&self) -> u64;

    /// The subround the current time falls into.
    fn current_subround(&self) -> SubroundId;

    /// Deadline of a subround within the current round.
    fn deadline(&self, subround: SubroundId) -> Instant;

    /// The instant the current round ends.
    fn round_end(&self) -> Instant;
}

/// Per-subround deadlines, as offsets from the round start.
#[derive(Debug, Clone)]
pub struct SubroundSchedule {
    ends: [Duration; SubroundId::COUNT],
}

impl SubroundSchedule {
    /// End-of-subround positions as fractions of the round duration.
    const END_FRACTIONS: [f64; SubroundId::COUNT] = [0.05, 0.25, 0.40, 0.55, 0.70, 0.85, 0.95];

    /// Builds the default schedule for a round of the given duration.
    pub fn proportional(round_duration: Duration) -> Self {
        let mut ends = [Duration::ZERO; SubroundId::COUNT];
        for (i, fraction) in Self::END_FRACTIONS.iter().enumerate() {
            ends[i] = round_duration.mul_f64(*fraction);
        }
        Self { ends }
    }

    /// Offset from the round start at which the subround ends.
    pub fn end_offset(&self, subround: SubroundId) -> Duration {
        self.ends[subround.index()]
    }
}

/// Production chronology: wall time sliced into fixed-duration rounds.
#[derive(Debug, Clone)]
pub struct RoundClock {
    start: Instant,
    genesis_unix: u64,
    round_duration: Duration,
    schedule: SubroundSchedule,
    clock_offset: Duration,
}

impl RoundClock {
    /// Creates a clock whose round 0 starts now.
    ///
    /// `genesis_unix` is the offset-corrected unix time of round 0's
    /// start; `clock_offset` is the local clock correction.
    pub fn new(genesis_unix: u64, round_duration: Duration, clock_offset: Duration) -> Self {
        Self {
            start: Instant::now(),
            genesis_unix,
            round_duration,
            schedule: SubroundSchedule::proportional(round_duration),
            clock_offset,
        }
    }

    fn round_start(&self) -> Instant {
        self.start + self.round_duration * (self.round_index() as u32)
    }
}

impl Chronology for RoundClock {
    fn round_index(&self) -> u64 {
        let elapsed = self.start.elapsed();
        (elapsed.as_nanos() / self.round_duration.as_nanos().max(1)) as u64
    }

    fn clock_offset(&self) -> Duration {
        self.clock_offset
    }

    fn current_time(&self) -> u64 {
        self.genesis_unix + (self.start.elapsed() + self.clock_offset).as_secs()
    }

    fn current_subround(&self) -> SubroundId {
        let within = self.start.elapsed()
            - self.round_duration * (self.round_index() as u32);
        for subround in SubroundId::ALL {
            if within < self.schedule.end_offset(subround) {
                return subround;
            }
        }
        SubroundId::EndRound
    }

    fn deadline(&self, subround: SubroundId) -> Instant {
        self.round_start() + self.schedule.end_offset(subround)
    }

    fn round_end(&self) -> Instant {
        self.round_start() + self.round_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_monotone() {
        let schedule = SubroundSchedule::proportional(Duration::from_secs(4));
        for pair in SubroundId::ALL.windows(2) {
            assert!(schedule.end_offset(pair[0]) < schedule.end_offset(pair[1]));
        }
        assert!(schedule.end_offset(SubroundId::EndRound) < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_clock_advances_with_time() {
        let clock = RoundClock::new(1_700_000_000, Duration::from_secs(4), Duration::ZERO);
        assert_eq!(clock.round_index(), 0);
        assert_eq!(clock.current_subround(), SubroundId::StartRound);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(clock.round_index(), 0);
        assert_eq!(clock.current_subround(), SubroundId::CommitmentHash);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(clock.round_index(), 1);
        assert_eq!(clock.current_time(), 1_700_000_005);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadlines_are_within_round() {
        let clock = RoundClock::new(0, Duration::from_secs(4), Duration::ZERO);
        let block = clock.deadline(SubroundId::Block);
        let signature = clock.deadline(SubroundId::Signature);
        assert!(block < signature);
        assert!(signature < clock.round_end());
    }
}
