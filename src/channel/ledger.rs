use super::{
    evidence::{compile, Evidence, EvidenceError},
    AllocationItem, AssetOutcome, ChannelIdentity, LedgerError, LedgerIdx, MergeOutcome, PartIdx,
    SequenceError, SignatureLedger, SigningAssignment, State, StateSequence, TransitionRule,
};
use crate::abiencode::types::{Address, Bytes32, Hash, Signature, U256};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("the ledger holds no states")]
    NoStates,
    #[error("asset {0:?} is not part of the outcome")]
    AssetNotFound(Address),
    #[error("destination {0:?} is not part of the outcome")]
    DestinationNotFound(Bytes32),
    #[error("cannot move {requested} with only {available} allocated")]
    InsufficientBalance { available: U256, requested: U256 },
    #[error("allocation would overflow")]
    AmountOverflow,
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Everything that can happen to a ledger. Applying an action never changes
/// the ledger it is applied to, see [ChannelLedger::apply].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerAction {
    /// Append a copy of the last state with the next turn number.
    CopyLastState,
    /// Append a final copy of the last state.
    Finalize,
    /// Append a state crediting `amount` of `asset` to `destination`.
    Deposit {
        asset: Address,
        destination: Bytes32,
        amount: U256,
    },
    /// Append a state moving `amount` of `asset` between destinations.
    Transfer {
        asset: Address,
        from: Bytes32,
        to: Bytes32,
        amount: U256,
    },
    SignLastState {
        participant: PartIdx,
        signature: Signature,
    },
    AddSignature {
        participant: PartIdx,
        ledger_index: LedgerIdx,
        signature: Signature,
    },
    /// Drop the states nobody's latest signature refers to anymore.
    PruneSettled,
}

/// A state together with the signatures collected on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedState<'a> {
    pub state: &'a State,
    pub signatures: Vec<Option<Signature>>,
}

impl<'a> SignedState<'a> {
    pub fn is_fully_signed(&self) -> bool {
        self.signatures.iter().all(Option::is_some)
    }
}

/// The states of one channel and who signed what. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLedger {
    sequence: StateSequence,
    signatures: SignatureLedger,
}

fn find_outcome(state: &mut State, asset: Address) -> Result<&mut AssetOutcome, ActionError> {
    state
        .outcome
        .iter_mut()
        .find(|o| o.asset == asset)
        .ok_or(ActionError::AssetNotFound(asset))
}

fn find_item(outcome: &AssetOutcome, destination: Bytes32) -> Result<usize, ActionError> {
    outcome
        .position_of(destination)
        .ok_or(ActionError::DestinationNotFound(destination))
}

impl ChannelLedger {
    /// Turn 0 of a new channel: nothing allocated yet, one entry per
    /// destination in `asset`.
    pub fn genesis(
        identity: ChannelIdentity,
        destinations: &[Bytes32],
        asset: Address,
        challenge_duration: u64,
    ) -> Self {
        Self::from_state(State {
            channel: identity,
            outcome: vec![AssetOutcome {
                asset,
                allocation_items: destinations
                    .iter()
                    .map(|&destination| AllocationItem {
                        destination,
                        amount: U256::zero(),
                    })
                    .collect(),
            }],
            app_data: vec![0; 32],
            is_final: false,
            challenge_duration,
            turn_num: 0,
        })
    }

    pub fn from_state(first: State) -> Self {
        let signatures = SignatureLedger::new(first.channel.num_participants());
        Self {
            sequence: StateSequence::starting_with(first),
            signatures,
        }
    }

    pub fn from_sequence(sequence: StateSequence) -> Result<Self, ActionError> {
        let n = sequence
            .first()
            .ok_or(ActionError::NoStates)?
            .channel
            .num_participants();
        Ok(Self {
            sequence,
            signatures: SignatureLedger::new(n),
        })
    }

    pub fn sequence(&self) -> &StateSequence {
        &self.sequence
    }

    pub fn signatures(&self) -> &SignatureLedger {
        &self.signatures
    }

    pub fn num_states(&self) -> usize {
        self.sequence.len()
    }

    pub fn terminal(&self) -> &State {
        let states = self.sequence.as_slice();
        &states[states.len() - 1]
    }

    pub fn terminal_index(&self) -> LedgerIdx {
        self.sequence.len() - 1
    }

    pub fn identity(&self) -> &ChannelIdentity {
        &self.terminal().channel
    }

    pub fn channel_id(&self) -> Hash {
        self.identity().channel_id()
    }

    fn first_turn(&self) -> u64 {
        self.sequence.as_slice()[0].turn_num
    }

    fn turn_of(&self, index: LedgerIdx) -> Result<u64, LedgerError> {
        self.sequence
            .get(index)
            .map(|s| s.turn_num)
            .ok_or(LedgerError::IndexOutOfBounds {
                index,
                len: self.sequence.len(),
            })
    }

    /// Record `participant`'s signature on the state at `ledger_index`,
    /// replacing their previous one.
    pub fn record_signature(
        &mut self,
        participant: PartIdx,
        ledger_index: LedgerIdx,
        signature: Signature,
    ) -> Result<(), LedgerError> {
        let turn_num = self.turn_of(ledger_index)?;
        self.signatures.record(participant, turn_num, signature)
    }

    /// Merge a signature that was already checked against the state it
    /// signs. The signed turn may lie beyond the last known state, signatures
    /// on pruned turns are stale.
    pub fn merge_signature(
        &mut self,
        participant: PartIdx,
        turn_num: u64,
        signature: Signature,
    ) -> Result<MergeOutcome, LedgerError> {
        if turn_num < self.first_turn() && participant < self.signatures.num_participants() {
            return Ok(MergeOutcome::Stale);
        }
        self.signatures.merge(participant, turn_num, signature)
    }

    /// Every participant's latest signature is on the state at
    /// `ledger_index` or a later known state.
    pub fn is_fully_signed(&self, ledger_index: LedgerIdx) -> bool {
        let (Ok(from), last) = (self.turn_of(ledger_index), self.terminal().turn_num) else {
            return false;
        };
        self.signatures
            .signed_turns()
            .all(|t| matches!(t, Some(t) if from <= t && t <= last))
    }

    pub fn signing_assignment(&self) -> SigningAssignment {
        let first = self.first_turn();
        SigningAssignment::new(
            self.signatures
                .signed_turns()
                .map(|t| t.map(|t| (t - first) as LedgerIdx))
                .collect(),
        )
    }

    pub fn signed_state(&self, index: LedgerIdx) -> Option<SignedState<'_>> {
        let state = self.sequence.get(index)?;
        let signatures = (0..self.signatures.num_participants())
            .map(|p| self.signatures.signature_on(p, state.turn_num))
            .collect();
        Some(SignedState { state, signatures })
    }

    /// Evidence for a challenge or checkpoint, see [compile].
    pub fn compile_evidence(&self) -> Result<Evidence<'_>, EvidenceError> {
        compile(&self.sequence, &self.signing_assignment())
    }

    /// Every participant's latest signature, in participant order.
    pub fn latest_signatures(&self) -> Result<Vec<Signature>, EvidenceError> {
        let sigs: Option<Vec<_>> = (0..self.signatures.num_participants())
            .map(|p| self.signatures.get(p).map(|r| r.signature))
            .collect();
        sigs.ok_or_else(|| EvidenceError::IncompleteSignatures {
            missing: self.signing_assignment().unsigned(),
        })
    }

    /// Drop the states before `index`, unless someone's latest signature is
    /// on one of them.
    pub fn prune_before(&mut self, index: LedgerIdx) -> Result<usize, LedgerError> {
        let turn_num = self.turn_of(index)?;
        if let Some(participant) = self
            .signatures
            .signed_turns()
            .position(|t| matches!(t, Some(t) if t < turn_num))
        {
            return Err(LedgerError::WouldDropSignature { participant, index });
        }
        self.sequence
            .truncate_before(index)
            .map_err(|_| LedgerError::IndexOutOfBounds {
                index,
                len: self.sequence.len(),
            })
    }

    /// Prune up to the oldest state still signed by someone. Does nothing
    /// until everybody signed.
    pub fn prune_settled(&mut self) -> usize {
        let Some(earliest) = self.signatures.earliest_turn() else {
            return 0;
        };
        let index = ((earliest - self.first_turn()) as LedgerIdx).min(self.terminal_index());
        self.prune_before(index).unwrap_or(0)
    }

    /// The state `action` would append, `None` for actions that only touch
    /// signatures or history.
    pub fn successor(&self, action: &LedgerAction) -> Result<Option<State>, ActionError> {
        let mut next = self.terminal().make_next_state();
        match *action {
            LedgerAction::CopyLastState => {}
            LedgerAction::Finalize => next.is_final = true,
            LedgerAction::Deposit {
                asset,
                destination,
                amount,
            } => {
                let outcome = find_outcome(&mut next, asset)?;
                let index = find_item(outcome, destination)?;
                let item = &mut outcome.allocation_items[index];
                item.amount = item
                    .amount
                    .checked_add(amount)
                    .ok_or(ActionError::AmountOverflow)?;
            }
            LedgerAction::Transfer {
                asset,
                from,
                to,
                amount,
            } => {
                let outcome = find_outcome(&mut next, asset)?;
                let from = find_item(outcome, from)?;
                let to = find_item(outcome, to)?;

                let available = outcome.allocation_items[from].amount;
                if available < amount {
                    return Err(ActionError::InsufficientBalance {
                        available,
                        requested: amount,
                    });
                }
                outcome.allocation_items[from].amount = available - amount;
                let item = &mut outcome.allocation_items[to];
                item.amount = item
                    .amount
                    .checked_add(amount)
                    .ok_or(ActionError::AmountOverflow)?;
            }
            LedgerAction::SignLastState { .. }
            | LedgerAction::AddSignature { .. }
            | LedgerAction::PruneSettled => return Ok(None),
        }
        Ok(Some(next))
    }

    /// Apply `action` to a copy of this ledger. New states have to pass
    /// `rule`.
    pub fn apply<R>(&self, action: LedgerAction, rule: &R) -> Result<ChannelLedger, ActionError>
    where
        R: TransitionRule + ?Sized,
    {
        let mut next = self.clone();
        match action {
            LedgerAction::SignLastState {
                participant,
                signature,
            } => next.record_signature(participant, next.terminal_index(), signature)?,
            LedgerAction::AddSignature {
                participant,
                ledger_index,
                signature,
            } => next.record_signature(participant, ledger_index, signature)?,
            LedgerAction::PruneSettled => {
                next.prune_settled();
            }
            LedgerAction::CopyLastState
            | LedgerAction::Finalize
            | LedgerAction::Deposit { .. }
            | LedgerAction::Transfer { .. } => {
                if let Some(candidate) = self.successor(&action)? {
                    next.sequence.apply_transition(candidate, rule)?;
                }
            }
        }
        Ok(next)
    }
}
