use crate::abiencode::types::Bytes32;
use tracing::{debug, warn};

/// Lifecycle of a channel as seen by the adjudicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    #[default]
    Open,
    Challenge,
    Finalized,
}

impl ChannelMode {
    pub fn derive(finalizes_at: u64, now: u64) -> Self {
        match finalizes_at {
            0 => ChannelMode::Open,
            t if t > now => ChannelMode::Challenge,
            _ => ChannelMode::Finalized,
        }
    }
}

const UINT48_MASK: u64 = (1 << 48) - 1;

/// What the adjudicator stores per channel, packed into one `bytes32` slot:
/// `turnNumRecord (uint48) | finalizesAt (uint48) | fingerprint (uint160)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStatus {
    pub turn_num_record: u64,
    pub finalizes_at: u64,
    pub fingerprint: [u8; 20],
}

fn read_uint48(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf[2..].copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

impl ChannelStatus {
    pub fn unpack(slot: Bytes32) -> Self {
        let mut fingerprint = [0u8; 20];
        fingerprint.copy_from_slice(&slot.0[12..]);
        Self {
            turn_num_record: read_uint48(&slot.0[..6]),
            finalizes_at: read_uint48(&slot.0[6..12]),
            fingerprint,
        }
    }

    pub fn pack(&self) -> Bytes32 {
        let mut slot = [0u8; 32];
        slot[..6].copy_from_slice(&(self.turn_num_record & UINT48_MASK).to_be_bytes()[2..]);
        slot[6..12].copy_from_slice(&(self.finalizes_at & UINT48_MASK).to_be_bytes()[2..]);
        slot[12..].copy_from_slice(&self.fingerprint);
        Bytes32(slot)
    }

    pub fn mode_at(&self, now: u64) -> ChannelMode {
        ChannelMode::derive(self.finalizes_at, now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    Unchanged,
    /// A challenge was registered, or replaced by a newer one.
    ChallengeRegistered,
    ChallengeCleared,
    Finalized,
    /// The channel left `Finalized`. The adjudicator never does this, but it
    /// is the authority, so the new mode is taken anyway.
    Reopened,
}

/// Last status read from the adjudicator and the mode derived from it. Only
/// adjudicator reads move it.
#[derive(Debug, Clone, Default)]
pub struct ModeTracker {
    status: ChannelStatus,
    mode: ChannelMode,
}

impl ModeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub fn status(&self) -> &ChannelStatus {
        &self.status
    }

    pub fn observe(&mut self, status: ChannelStatus, now: u64) -> ModeTransition {
        use ChannelMode::*;

        let mode = status.mode_at(now);
        let transition = match (self.mode, mode) {
            (Challenge, Challenge) if status.finalizes_at != self.status.finalizes_at => {
                ModeTransition::ChallengeRegistered
            }
            (a, b) if a == b => ModeTransition::Unchanged,
            (Finalized, _) => ModeTransition::Reopened,
            (_, Challenge) => ModeTransition::ChallengeRegistered,
            (_, Finalized) => ModeTransition::Finalized,
            (Challenge, Open) => ModeTransition::ChallengeCleared,
            (Open, Open) => ModeTransition::Unchanged,
        };

        match transition {
            ModeTransition::Unchanged => {}
            ModeTransition::Reopened => warn!(
                from = ?self.mode,
                to = ?mode,
                "adjudicator reports a finalized channel as no longer finalized"
            ),
            t => debug!(from = ?self.mode, to = ?mode, transition = ?t, "mode changed"),
        }

        self.status = status;
        self.mode = mode;
        transition
    }

    /// When to look at the status again, while a challenge is running.
    pub fn recheck_at(&self) -> Option<u64> {
        (self.mode == ChannelMode::Challenge).then_some(self.status.finalizes_at)
    }
}
