use super::{LedgerIdx, PartIdx};
use crate::abiencode::types::Signature;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("participant {participant} may not sign here: {reason}")]
    EligibilityViolation {
        participant: PartIdx,
        reason: Ineligible,
    },
    #[error("index {index} is out of bounds for {len} states")]
    IndexOutOfBounds { index: LedgerIdx, len: usize },
    #[error("dropping states before {index} would drop the state signed by participant {participant}")]
    WouldDropSignature { participant: PartIdx, index: LedgerIdx },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    #[error("the channel has {num_participants} participants")]
    OutOfRange { num_participants: usize },
    #[error("already signed turn {recorded}, cannot go back to {attempted}")]
    Backwards { recorded: u64, attempted: u64 },
}

/// The latest signature of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureRecord {
    pub turn_num: u64,
    pub signature: Signature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The record was new or newer and replaced what was there.
    Applied,
    /// Exactly this record was already present.
    Duplicate,
    /// A newer record was already present, nothing changed.
    Stale,
}

/// Latest signature per participant, keyed by turn number so that pruning
/// the state sequence does not invalidate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureLedger {
    records: Vec<Option<SignatureRecord>>,
}

impl SignatureLedger {
    pub fn new(num_participants: usize) -> Self {
        Self {
            records: vec![None; num_participants],
        }
    }

    pub fn num_participants(&self) -> usize {
        self.records.len()
    }

    fn slot(&mut self, participant: PartIdx) -> Result<&mut Option<SignatureRecord>, LedgerError> {
        let num_participants = self.records.len();
        self.records
            .get_mut(participant)
            .ok_or(LedgerError::EligibilityViolation {
                participant,
                reason: Ineligible::OutOfRange { num_participants },
            })
    }

    /// Replace the participant's signature, refusing to go back to an
    /// earlier turn. Re-signing the same turn replaces the signature.
    pub fn record(
        &mut self,
        participant: PartIdx,
        turn_num: u64,
        signature: Signature,
    ) -> Result<(), LedgerError> {
        let slot = self.slot(participant)?;
        if let Some(old) = slot {
            if turn_num < old.turn_num {
                return Err(LedgerError::EligibilityViolation {
                    participant,
                    reason: Ineligible::Backwards {
                        recorded: old.turn_num,
                        attempted: turn_num,
                    },
                });
            }
        }
        *slot = Some(SignatureRecord {
            turn_num,
            signature,
        });
        Ok(())
    }

    /// Last-writer-wins by turn number. Applying the same set of records in
    /// any order, any number of times, gives the same ledger.
    pub fn merge(
        &mut self,
        participant: PartIdx,
        turn_num: u64,
        signature: Signature,
    ) -> Result<MergeOutcome, LedgerError> {
        let slot = self.slot(participant)?;
        let new = SignatureRecord {
            turn_num,
            signature,
        };
        let outcome = match slot {
            None => MergeOutcome::Applied,
            Some(old) if *old == new => MergeOutcome::Duplicate,
            // Two different signatures on the same turn only come from a
            // non-deterministic signer. Keeping the larger one makes the
            // result independent of delivery order.
            Some(old) if (old.turn_num, old.signature.0) < (turn_num, signature.0) => {
                MergeOutcome::Applied
            }
            Some(_) => MergeOutcome::Stale,
        };
        if outcome == MergeOutcome::Applied {
            *slot = Some(new);
        }
        Ok(outcome)
    }

    pub fn get(&self, participant: PartIdx) -> Option<&SignatureRecord> {
        self.records.get(participant)?.as_ref()
    }

    /// The participant's signature if their latest one is on `turn_num`.
    pub fn signature_on(&self, participant: PartIdx, turn_num: u64) -> Option<Signature> {
        self.get(participant)
            .filter(|r| r.turn_num == turn_num)
            .map(|r| r.signature)
    }

    pub fn signed_turns(&self) -> impl Iterator<Item = Option<u64>> + '_ {
        self.records.iter().map(|r| r.map(|r| r.turn_num))
    }

    /// Whether every participant signed something.
    pub fn is_complete(&self) -> bool {
        self.records.iter().all(Option::is_some)
    }

    /// Whether every participant signed `turn_num` or a later turn.
    pub fn covers(&self, turn_num: u64) -> bool {
        self.records
            .iter()
            .all(|r| matches!(r, Some(r) if r.turn_num >= turn_num))
    }

    /// Oldest turn still referenced, `None` until everybody signed.
    pub fn earliest_turn(&self) -> Option<u64> {
        self.signed_turns()
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }
}

/// `whoSignedWhat`: for each participant the ledger index of the state they
/// last signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningAssignment(Vec<Option<LedgerIdx>>);

impl SigningAssignment {
    pub fn new(indices: Vec<Option<LedgerIdx>>) -> Self {
        Self(indices)
    }

    /// Assignment in which every participant signed something.
    pub fn complete(indices: Vec<LedgerIdx>) -> Self {
        Self(indices.into_iter().map(Some).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, participant: PartIdx) -> Option<LedgerIdx> {
        self.0.get(participant).copied().flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<LedgerIdx>> + '_ {
        self.0.iter().copied()
    }

    pub fn unsigned(&self) -> Vec<PartIdx> {
        self.iter()
            .enumerate()
            .filter_map(|(i, idx)| idx.is_none().then_some(i))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }

    /// The indices if every participant signed.
    pub fn indices(&self) -> Option<Vec<LedgerIdx>> {
        self.0.iter().copied().collect()
    }
}
