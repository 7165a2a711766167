//! Subround and message-kind enumerations.
//!
//! A consensus round is a fixed time slice divided into an ordered
//! sequence of subrounds. Each subround has its own deadline and
//! acceptance threshold, and subround transitions are monotonically
//! forward within a round.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a subround within a consensus round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubroundId {
    /// Reset of the per-round state and multi-signer rebind
    StartRound,
    /// Leader proposes the block body and header
    Block,
    /// Participants circulate commitment hashes
    CommitmentHash,
    /// Leader selects participants into a bitmap
    Bitmap,
    /// Selected participants reveal their commitments
    Commitment,
    /// Selected participants send partial signatures
    Signature,
    /// Aggregation, commit and broadcast of the agreed block
    EndRound,
}

impl SubroundId {
    /// Number of subrounds in a round.
    pub const COUNT: usize = 7;

    /// All subrounds, in order.
    pub const ALL: [SubroundId; Self::COUNT] = [
        SubroundId::StartRound,
        SubroundId::Block,
        SubroundId::CommitmentHash,
        SubroundId::Bitmap,
        SubroundId::Commitment,
        SubroundId::Signature,
        SubroundId::EndRound,
    ];

    /// The subrounds with send/receive activity, in order. StartRound and
    /// EndRound are driven directly by the controller.
    pub const ACTIVE: [SubroundId; 5] = [
        SubroundId::Block,
        SubroundId::CommitmentHash,
        SubroundId::Bitmap,
        SubroundId::Commitment,
        SubroundId::Signature,
    ];

    /// Position in the round, 0-based.
    pub fn index(self) -> usize {
        self as usize
    }

    /// The preceding active subround, if any. Block has none: StartRound
    /// always completes.
    pub fn prev_active(self) -> Option<SubroundId> {
        match self {
            SubroundId::CommitmentHash => Some(SubroundId::Block),
            SubroundId::Bitmap => Some(SubroundId::CommitmentHash),
            SubroundId::Commitment => Some(SubroundId::Bitmap),
            SubroundId::Signature => Some(SubroundId::Commitment),
            _ => None,
        }
    }

    /// Display name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            SubroundId::StartRound => "<START_ROUND>",
            SubroundId::Block => "<BLOCK>",
            SubroundId::CommitmentHash => "<COMMITMENT_HASH>",
            SubroundId::Bitmap => "<BITMAP>",
            SubroundId::Commitment => "<COMMITMENT>",
            SubroundId::Signature => "<SIGNATURE>",
            SubroundId::EndRound => "<END_ROUND>",
        }
    }
}

impl fmt::Display for SubroundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Completion status of a subround.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubroundStatus {
    /// The subround has not collected enough evidence yet
    #[default]
    NotFinished,
    /// The subround met its acceptance threshold; terminal
    Finished,
    /// The deadline passed without finishing; partial progress retained
    Extended,
}

impl fmt::Display for SubroundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubroundStatus::NotFinished => write!(f, "not finished"),
            SubroundStatus::Finished => write!(f, "finished"),
            SubroundStatus::Extended => write!(f, "extended"),
        }
    }
}

/// Kind of payload carried by a consensus record.
///
/// The map onto [`SubroundId`] is non-injective: the Block subround
/// consumes both `BlockBody` and `BlockHeader`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    /// A marshalled transaction block body
    BlockBody = 0,
    /// A marshalled block header
    BlockHeader = 1,
    /// A commitment hash
    CommitmentHash = 2,
    /// The leader's participant bitmap
    Bitmap = 3,
    /// A revealed commitment
    Commitment = 4,
    /// A partial signature
    Signature = 5,
    /// Anything else; dropped by the dispatcher
    Unknown = 6,
}

impl MessageKind {
    /// The kinds routed into ingress queues (everything but `Unknown`).
    pub const ROUTED: [MessageKind; 6] = [
        MessageKind::BlockBody,
        MessageKind::BlockHeader,
        MessageKind::CommitmentHash,
        MessageKind::Bitmap,
        MessageKind::Commitment,
        MessageKind::Signature,
    ];

    /// Wire byte of this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decodes a wire byte; anything unrecognized is `Unknown`.
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0 => MessageKind::BlockBody,
            1 => MessageKind::BlockHeader,
            2 => MessageKind::CommitmentHash,
            3 => MessageKind::Bitmap,
            4 => MessageKind::Commitment,
            5 => MessageKind::Signature,
            _ => MessageKind::Unknown,
        }
    }

    /// The subround this kind of message belongs to.
    pub fn subround(self) -> Option<SubroundId> {
        match self {
            MessageKind::BlockBody | MessageKind::BlockHeader => Some(SubroundId::Block),
            MessageKind::CommitmentHash => Some(SubroundId::CommitmentHash),
            MessageKind::Bitmap => Some(SubroundId::Bitmap),
            MessageKind::Commitment => Some(SubroundId::Commitment),
            MessageKind::Signature => Some(SubroundId::Signature),
            MessageKind::Unknown => None,
        }
    }

    /// Display name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::BlockBody => "<BLOCK_BODY>",
            MessageKind::BlockHeader => "<BLOCK_HEADER>",
            MessageKind::CommitmentHash => "<COMMITMENT_HASH>",
            MessageKind::Bitmap => "<BITMAP>",
            MessageKind::Commitment => "<COMMITMENT>",
            MessageKind::Signature => "<SIGNATURE>",
            MessageKind::Unknown => "<UNKNOWN>",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subround_order_is_monotone() {
        for pair in SubroundId::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(SubroundId::StartRound.index(), 0);
        assert_eq!(SubroundId::EndRound.index(), SubroundId::COUNT - 1);
    }

    #[test]
    fn test_prev_active_chain() {
        assert_eq!(SubroundId::Block.prev_active(), None);
        assert_eq!(
            SubroundId::Signature.prev_active(),
            Some(SubroundId::Commitment)
        );
        // Walking back from Signature visits every active subround.
        let mut seen = vec![SubroundId::Signature];
        while let Some(prev) = seen.last().unwrap().prev_active() {
            seen.push(prev);
        }
        seen.reverse();
        assert_eq!(seen, SubroundId::ACTIVE.to_vec());
    }

    #[test]
    fn test_message_kind_wire_round_trip() {
        for kind in MessageKind::ROUTED {
            assert_eq!(MessageKind::from_u8(kind.as_u8()), kind);
        }
        assert_eq!(MessageKind::from_u8(0xff), MessageKind::Unknown);
    }

    #[test]
    fn test_kind_to_subround_map_is_non_injective() {
        assert_eq!(
            MessageKind::BlockBody.subround(),
            MessageKind::BlockHeader.subround()
        );
        assert_eq!(MessageKind::Unknown.subround(), None);
        assert_eq!(
            MessageKind::Bitmap.subround(),
            Some(SubroundId::Bitmap)
        );
    }
}
