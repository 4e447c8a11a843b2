use super::{LedgerIdx, State, TransitionRule};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("turn {got} does not directly follow turn {last}")]
    NonMonotonicTurn { last: u64, got: u64 },
    #[error("the last state is final, nothing may follow it")]
    AlreadyFinal,
    #[error("state belongs to a different channel")]
    ChannelMismatch,
    #[error("transition to turn {turn_num} was rejected")]
    InvalidTransition { turn_num: u64 },
    #[error("index {index} is out of bounds for {len} states")]
    IndexOutOfBounds { index: LedgerIdx, len: usize },
}

/// Candidate states of one channel, ordered by turn number without gaps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateSequence {
    states: Vec<State>,
}

/// Structural checks every successor has to pass, independent of the
/// application.
fn check_successor(last: &State, candidate: &State) -> Result<(), SequenceError> {
    if !last.same_channel(candidate) {
        return Err(SequenceError::ChannelMismatch);
    }
    if last.is_final {
        return Err(SequenceError::AlreadyFinal);
    }
    if last.turn_num.checked_add(1) != Some(candidate.turn_num) {
        return Err(SequenceError::NonMonotonicTurn {
            last: last.turn_num,
            got: candidate.turn_num,
        });
    }
    Ok(())
}

/// Check that `candidate` may follow `previous`, first structurally, then
/// against `rule`.
pub fn check_transition<R>(previous: &State, candidate: &State, rule: &R) -> Result<(), SequenceError>
where
    R: TransitionRule + ?Sized,
{
    check_successor(previous, candidate)?;
    if !rule.allows(previous, candidate) {
        return Err(SequenceError::InvalidTransition {
            turn_num: candidate.turn_num,
        });
    }
    Ok(())
}

impl StateSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence starting at `first`, which may have any turn number.
    pub fn starting_with(first: State) -> Self {
        Self {
            states: vec![first],
        }
    }

    /// Append without consulting an application rule. The first state of an
    /// empty sequence is always accepted.
    pub fn append(&mut self, state: State) -> Result<LedgerIdx, SequenceError> {
        if let Some(last) = self.states.last() {
            check_successor(last, &state)?;
        }
        self.states.push(state);
        Ok(self.states.len() - 1)
    }

    /// Append `candidate` if `rule` allows it to follow the current last
    /// state. On any error the sequence is unchanged.
    pub fn apply_transition<R>(&mut self, candidate: State, rule: &R) -> Result<LedgerIdx, SequenceError>
    where
        R: TransitionRule + ?Sized,
    {
        if let Some(last) = self.states.last() {
            check_transition(last, &candidate, rule)?;
        }
        self.states.push(candidate);
        Ok(self.states.len() - 1)
    }

    /// Drop all states before `index`. The last state is always kept.
    pub fn truncate_before(&mut self, index: LedgerIdx) -> Result<usize, SequenceError> {
        if index >= self.states.len() && index != 0 {
            return Err(SequenceError::IndexOutOfBounds {
                index,
                len: self.states.len(),
            });
        }
        self.states.drain(..index);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, index: LedgerIdx) -> Option<&State> {
        self.states.get(index)
    }

    pub fn first(&self) -> Option<&State> {
        self.states.first()
    }

    pub fn last(&self) -> Option<&State> {
        self.states.last()
    }

    pub fn first_turn(&self) -> Option<u64> {
        self.first().map(|s| s.turn_num)
    }

    pub fn last_turn(&self) -> Option<u64> {
        self.last().map(|s| s.turn_num)
    }

    pub fn index_of_turn(&self, turn_num: u64) -> Option<LedgerIdx> {
        let first = self.first_turn()?;
        let index = turn_num.checked_sub(first)? as usize;
        (index < self.states.len()).then_some(index)
    }

    pub fn as_slice(&self) -> &[State] {
        &self.states
    }

    pub fn iter(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }
}
