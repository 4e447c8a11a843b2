use super::{FixedPart, LedgerIdx, PartIdx, SigningAssignment, State, StateSequence, VariablePart};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("participants {missing:?} have not signed any state")]
    IncompleteSignatures { missing: Vec<PartIdx> },
    #[error("there are no states to build evidence from")]
    EmptyLedger,
    #[error("assignment covers {got} participants, the channel has {expected}")]
    ParticipantCountMismatch { expected: usize, got: usize },
    #[error("participant {participant} signed index {index}, but there are only {len} states")]
    IndexOutOfBounds {
        participant: PartIdx,
        index: LedgerIdx,
        len: usize,
    },
    #[error("nobody signed the last state")]
    TerminalUnsigned,
    #[error("the last state is not final")]
    TerminalNotFinal,
    #[error("participant {participant} signed turn {signed_turn}, but has to sign turn {required_turn} or later")]
    PrematureSignature {
        participant: PartIdx,
        signed_turn: u64,
        required_turn: u64,
    },
}

/// The shortest suffix of the ledger that still contains every
/// participant's latest signature, with the assignment rebased onto it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence<'a> {
    earliest: LedgerIdx,
    window: &'a [State],
    shifted: Vec<LedgerIdx>,
}

/// Reduce `sequence` to the states the adjudicator needs to see, given who
/// signed which state.
pub fn compile<'a>(
    sequence: &'a StateSequence,
    assignment: &SigningAssignment,
) -> Result<Evidence<'a>, EvidenceError> {
    let states = sequence.as_slice();
    let first = states.first().ok_or(EvidenceError::EmptyLedger)?;

    let expected = first.channel.num_participants();
    if assignment.len() != expected {
        return Err(EvidenceError::ParticipantCountMismatch {
            expected,
            got: assignment.len(),
        });
    }
    let indices = assignment
        .indices()
        .ok_or_else(|| EvidenceError::IncompleteSignatures {
            missing: assignment.unsigned(),
        })?;

    for (participant, &index) in indices.iter().enumerate() {
        if index >= states.len() {
            return Err(EvidenceError::IndexOutOfBounds {
                participant,
                index,
                len: states.len(),
            });
        }
    }
    if !indices.contains(&(states.len() - 1)) {
        return Err(EvidenceError::TerminalUnsigned);
    }

    // There is at least one participant.
    let earliest = indices.iter().copied().min().unwrap_or_default();
    let window = &states[earliest..];
    debug_assert!(window
        .windows(2)
        .all(|w| w[0].turn_num + 1 == w[1].turn_num));

    Ok(Evidence {
        earliest,
        window,
        shifted: indices.iter().map(|i| i - earliest).collect(),
    })
}

impl<'a> Evidence<'a> {
    /// Index into the full ledger where the window starts.
    pub fn earliest_index(&self) -> LedgerIdx {
        self.earliest
    }

    pub fn window(&self) -> &'a [State] {
        self.window
    }

    /// Per participant, the index into [Self::window] of the state they
    /// signed.
    pub fn shifted_assignment(&self) -> &[LedgerIdx] {
        &self.shifted
    }

    /// The assignment in full-ledger indices again.
    pub fn expand(&self) -> SigningAssignment {
        SigningAssignment::complete(self.shifted.iter().map(|i| i + self.earliest).collect())
    }

    pub fn terminal(&self) -> &'a State {
        &self.window[self.window.len() - 1]
    }

    pub fn largest_turn_num(&self) -> u64 {
        self.terminal().turn_num
    }

    pub fn is_final_count(&self) -> usize {
        self.window.iter().filter(|s| s.is_final).count()
    }

    pub fn fixed_part(&self) -> FixedPart {
        self.terminal().fixed_part()
    }

    pub fn variable_parts(&self) -> Vec<VariablePart> {
        self.window.iter().map(State::variable_part).collect()
    }

    /// Each participant may only have signed their own turn or a later one.
    /// Counting back from the largest turn, participant `i` last moved
    /// `offset` turns ago and must have signed at least that state.
    pub fn check_turn_ownership(&self) -> Result<(), EvidenceError> {
        let n = self.terminal().channel.num_participants() as u64;
        let largest = self.largest_turn_num();
        let num_states = self.window.len() as u64;

        for (participant, &signed) in self.shifted.iter().enumerate() {
            let offset = (n + largest % n - participant as u64) % n;
            if signed as u64 + offset + 1 < num_states {
                return Err(EvidenceError::PrematureSignature {
                    participant,
                    signed_turn: self.window[signed].turn_num,
                    required_turn: largest - offset,
                });
            }
        }
        Ok(())
    }
}
