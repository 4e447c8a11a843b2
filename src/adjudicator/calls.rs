use crate::{
    abiencode::{
        self, as_bytes,
        types::{Address, Hash, Signature, U256},
    },
    channel::{ChannelLedger, Evidence, EvidenceError, FixedPart, State, VariablePart},
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error(transparent)]
    Evidence(#[from] EvidenceError),
    #[error("turn {offered} does not follow the challenged turn {challenged}")]
    NotSuccessor { challenged: u64, offered: u64 },
    #[error("the successor belongs to a different channel")]
    ChannelMismatch,
    #[error("{got} signatures for {expected} participants")]
    SignatureCountMismatch { expected: usize, got: usize },
    #[error("a window of {0} states cannot be indexed with uint8")]
    WindowTooLong(usize),
    #[error("turn {0} is not in the ledger")]
    UnknownTurn(u64),
}

/// Everything `challenge` and `checkpoint` share: a window of states and the
/// signatures supporting its last state.
struct Support {
    fixed_part: FixedPart,
    largest_turn_num: u64,
    variable_parts: Vec<VariablePart>,
    is_final_count: u8,
    signatures: Vec<Signature>,
    who_signed_what: Vec<u8>,
}

impl Support {
    fn new(evidence: &Evidence<'_>, signatures: Vec<Signature>) -> Result<Self, BuildError> {
        evidence.check_turn_ownership()?;

        let expected = evidence.shifted_assignment().len();
        if signatures.len() != expected {
            return Err(BuildError::SignatureCountMismatch {
                expected,
                got: signatures.len(),
            });
        }

        let too_long = || BuildError::WindowTooLong(evidence.window().len());
        let who_signed_what = evidence
            .shifted_assignment()
            .iter()
            .map(|&i| u8::try_from(i).map_err(|_| too_long()))
            .collect::<Result<Vec<_>, _>>()?;
        let is_final_count = u8::try_from(evidence.is_final_count()).map_err(|_| too_long())?;

        Ok(Self {
            fixed_part: evidence.fixed_part(),
            largest_turn_num: evidence.largest_turn_num(),
            variable_parts: evidence.variable_parts(),
            is_final_count,
            signatures,
            who_signed_what,
        })
    }
}

/// Arguments of `challenge(fixedPart, largestTurnNum, variableParts,
/// isFinalCount, sigs, whoSignedWhat, challengerSig)`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ChallengeCall {
    pub fixed_part: FixedPart,
    pub largest_turn_num: u64,
    pub variable_parts: Vec<VariablePart>,
    pub is_final_count: u8,
    pub signatures: Vec<Signature>,
    pub who_signed_what: Vec<u8>,
    pub challenge_signature: Signature,
}

impl ChallengeCall {
    /// `signatures` are the participants' latest signatures in participant
    /// order, `challenge_signature` is over
    /// [challenge_hash](State::challenge_hash) of the last state.
    pub fn build(
        evidence: &Evidence<'_>,
        signatures: Vec<Signature>,
        challenge_signature: Signature,
    ) -> Result<Self, BuildError> {
        let s = Support::new(evidence, signatures)?;
        Ok(Self {
            fixed_part: s.fixed_part,
            largest_turn_num: s.largest_turn_num,
            variable_parts: s.variable_parts,
            is_final_count: s.is_final_count,
            signatures: s.signatures,
            who_signed_what: s.who_signed_what,
            challenge_signature,
        })
    }

    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_fnargs_bytes(self)
    }
}

/// Arguments of `checkpoint`, the same as [ChallengeCall] without the
/// challenger's signature.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CheckpointCall {
    pub fixed_part: FixedPart,
    pub largest_turn_num: u64,
    pub variable_parts: Vec<VariablePart>,
    pub is_final_count: u8,
    pub signatures: Vec<Signature>,
    pub who_signed_what: Vec<u8>,
}

impl CheckpointCall {
    pub fn build(evidence: &Evidence<'_>, signatures: Vec<Signature>) -> Result<Self, BuildError> {
        let s = Support::new(evidence, signatures)?;
        Ok(Self {
            fixed_part: s.fixed_part,
            largest_turn_num: s.largest_turn_num,
            variable_parts: s.variable_parts,
            is_final_count: s.is_final_count,
            signatures: s.signatures,
            who_signed_what: s.who_signed_what,
        })
    }

    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_fnargs_bytes(self)
    }
}

/// Arguments of `respond(isFinalAB, fixedPart, variablePartAB, sig)`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct RespondCall {
    pub is_final_ab: [bool; 2],
    pub fixed_part: FixedPart,
    pub variable_part_ab: [VariablePart; 2],
    pub signature: Signature,
}

impl RespondCall {
    /// `signature` is the mover's signature on `successor`.
    pub fn build(
        challenged: &State,
        successor: &State,
        signature: Signature,
    ) -> Result<Self, BuildError> {
        if !challenged.same_channel(successor) {
            return Err(BuildError::ChannelMismatch);
        }
        if challenged.turn_num.checked_add(1) != Some(successor.turn_num) {
            return Err(BuildError::NotSuccessor {
                challenged: challenged.turn_num,
                offered: successor.turn_num,
            });
        }

        Ok(Self {
            is_final_ab: [challenged.is_final, successor.is_final],
            fixed_part: successor.fixed_part(),
            variable_part_ab: [challenged.variable_part(), successor.variable_part()],
            signature,
        })
    }

    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_fnargs_bytes(self)
    }
}

/// Arguments of `conclude(largestTurnNum, fixedPart, appPartHash,
/// outcomeHash, numStates, whoSignedWhat, sigs)`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ConcludeCall {
    pub largest_turn_num: u64,
    pub fixed_part: FixedPart,
    pub app_part_hash: Hash,
    pub outcome_hash: Hash,
    pub num_states: u8,
    pub who_signed_what: Vec<u8>,
    pub signatures: Vec<Signature>,
}

impl ConcludeCall {
    /// Conclude with the last state, which has to be final and signed by
    /// everybody.
    pub fn build(ledger: &ChannelLedger) -> Result<Self, BuildError> {
        let signed = ledger
            .signed_state(ledger.terminal_index())
            .ok_or(EvidenceError::EmptyLedger)?;
        let missing: Vec<_> = signed
            .signatures
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_none().then_some(i))
            .collect();
        if !missing.is_empty() {
            return Err(EvidenceError::IncompleteSignatures { missing }.into());
        }
        let state = signed.state;
        if !state.is_final {
            return Err(EvidenceError::TerminalNotFinal.into());
        }

        Ok(Self {
            largest_turn_num: state.turn_num,
            fixed_part: state.fixed_part(),
            app_part_hash: state.app_part_hash(),
            outcome_hash: state.outcome_hash(),
            num_states: 1,
            who_signed_what: vec![0; signed.signatures.len()],
            signatures: signed.signatures.into_iter().flatten().collect(),
        })
    }

    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_fnargs_bytes(self)
    }
}

/// Arguments of `deposit(asset, channelId, expectedHeld, amount)`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DepositCall {
    pub asset: Address,
    pub channel_id: Hash,
    pub expected_held: U256,
    pub amount: U256,
}

impl DepositCall {
    pub fn new(asset: Address, channel_id: Hash, expected_held: U256, amount: U256) -> Self {
        Self {
            asset,
            channel_id,
            expected_held,
            amount,
        }
    }

    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_fnargs_bytes(self)
    }
}

/// Arguments of `transferAllAssets(channelId, outcomeBytes, stateHash)`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TransferAllAssetsCall {
    pub channel_id: Hash,
    #[serde(with = "as_bytes")]
    pub outcome_bytes: Vec<u8>,
    pub state_hash: Hash,
}

impl TransferAllAssetsCall {
    /// Pay out according to the state the adjudicator recorded at `turn_num`.
    /// A concluded channel is recorded without a state hash.
    pub fn build(ledger: &ChannelLedger, turn_num: u64) -> Result<Self, BuildError> {
        let index = ledger
            .sequence()
            .index_of_turn(turn_num)
            .ok_or(BuildError::UnknownTurn(turn_num))?;
        let signed = ledger
            .signed_state(index)
            .ok_or(BuildError::UnknownTurn(turn_num))?;
        let state = signed.state;

        let state_hash = if state.is_final && signed.is_fully_signed() {
            Hash::zero()
        } else {
            state.state_hash()
        };

        Ok(Self {
            channel_id: state.channel_id(),
            outcome_bytes: state.encode_outcome(),
            state_hash,
        })
    }

    pub fn encode(&self) -> abiencode::Result<Vec<u8>> {
        abiencode::to_fnargs_bytes(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abiencode::types::Bytes32,
        channel::{
            fixtures::{identity, participant},
            AnyTransition, LedgerAction, SigningAssignment,
        },
    };

    fn sig(b: u8) -> Signature {
        Signature([b; 65])
    }

    fn ledger(n: usize, extra: usize) -> ChannelLedger {
        let destinations: Vec<Bytes32> = (0..n).map(|i| participant(i).into()).collect();
        let mut l = ChannelLedger::genesis(identity(n), &destinations, Address::zero(), 30);
        for _ in 0..extra {
            l = l.apply(LedgerAction::CopyLastState, &AnyTransition).unwrap();
        }
        l
    }

    fn finalized(n: usize) -> ChannelLedger {
        ledger(n, 1)
            .apply(LedgerAction::Finalize, &AnyTransition)
            .unwrap()
    }

    fn slot(bytes: &[u8], i: usize) -> &[u8] {
        &bytes[i * 32..(i + 1) * 32]
    }

    #[test]
    fn conclude_needs_every_signature() {
        let mut l = finalized(3);
        l.record_signature(0, 2, sig(0)).unwrap();
        l.record_signature(2, 2, sig(2)).unwrap();

        assert_eq!(
            ConcludeCall::build(&l),
            Err(BuildError::Evidence(EvidenceError::IncompleteSignatures {
                missing: vec![1]
            }))
        );
    }

    #[test]
    fn conclude_needs_a_final_state() {
        let mut l = ledger(2, 1);
        l.record_signature(0, 1, sig(0)).unwrap();
        l.record_signature(1, 1, sig(1)).unwrap();

        assert_eq!(
            ConcludeCall::build(&l),
            Err(BuildError::Evidence(EvidenceError::TerminalNotFinal))
        );
    }

    #[test]
    fn conclude_submits_one_state() {
        let mut l = finalized(3);
        for p in 0..3 {
            l.record_signature(p, 2, sig(p as u8)).unwrap();
        }

        let call = ConcludeCall::build(&l).unwrap();

        assert_eq!(call.num_states, 1);
        assert_eq!(call.who_signed_what, vec![0, 0, 0]);
        assert_eq!(call.signatures, vec![sig(0), sig(1), sig(2)]);
        assert_eq!(call.largest_turn_num, 2);
        assert_eq!(call.outcome_hash, l.terminal().outcome_hash());
        assert_eq!(call.app_part_hash, l.terminal().app_part_hash());

        let encoded = call.encode().unwrap();
        assert_eq!(encoded.len() % 32, 0);
        assert_eq!(slot(&encoded, 0)[31], 2);
    }

    #[test]
    fn challenge_uses_the_compiled_window() {
        let mut l = ledger(3, 5);
        l.record_signature(0, 3, sig(0)).unwrap();
        l.record_signature(1, 4, sig(1)).unwrap();
        l.record_signature(2, 5, sig(2)).unwrap();
        let ev = l.compile_evidence().unwrap();

        let call = ChallengeCall::build(&ev, l.latest_signatures().unwrap(), sig(9)).unwrap();

        assert_eq!(call.largest_turn_num, 5);
        assert_eq!(call.variable_parts.len(), 3);
        assert_eq!(call.who_signed_what, vec![0, 1, 2]);
        assert_eq!(call.is_final_count, 0);
        assert_eq!(call.fixed_part, l.terminal().fixed_part());
        assert_eq!(call.challenge_signature, sig(9));
        assert_eq!(ev.expand(), SigningAssignment::complete(vec![3, 4, 5]));
        assert!(call.encode().is_ok());
    }

    #[test]
    fn checkpoint_enforces_turn_ownership() {
        let mut l = ledger(3, 2);
        l.record_signature(0, 2, sig(0)).unwrap();
        l.record_signature(1, 0, sig(1)).unwrap();
        l.record_signature(2, 1, sig(2)).unwrap();
        let ev = l.compile_evidence().unwrap();

        assert_eq!(
            CheckpointCall::build(&ev, l.latest_signatures().unwrap()),
            Err(BuildError::Evidence(EvidenceError::PrematureSignature {
                participant: 1,
                signed_turn: 0,
                required_turn: 1
            }))
        );
    }

    #[test]
    fn checkpoint_needs_one_signature_per_participant() {
        let mut l = ledger(2, 1);
        l.record_signature(0, 1, sig(0)).unwrap();
        l.record_signature(1, 1, sig(1)).unwrap();
        let ev = l.compile_evidence().unwrap();

        assert_eq!(
            CheckpointCall::build(&ev, vec![sig(0)]),
            Err(BuildError::SignatureCountMismatch {
                expected: 2,
                got: 1
            })
        );
        let call = CheckpointCall::build(&ev, vec![sig(0), sig(1)]).unwrap();
        assert_eq!(call.who_signed_what, vec![0, 0]);
    }

    #[test]
    fn respond_needs_the_direct_successor() {
        let l = ledger(2, 3);
        let states = l.sequence().as_slice();

        assert_eq!(
            RespondCall::build(&states[1], &states[3], sig(1)),
            Err(BuildError::NotSuccessor {
                challenged: 1,
                offered: 3
            })
        );
        assert_eq!(
            RespondCall::build(&states[2], &states[1], sig(1)),
            Err(BuildError::NotSuccessor {
                challenged: 2,
                offered: 1
            })
        );

        let call = RespondCall::build(&states[2], &states[3], sig(1)).unwrap();
        assert_eq!(call.is_final_ab, [false, false]);
        assert_eq!(call.variable_part_ab[1], states[3].variable_part());
        assert!(call.encode().is_ok());
    }

    #[test]
    fn respond_rejects_other_channels() {
        let a = ledger(2, 0);
        let b = ledger(3, 1);
        assert_eq!(
            RespondCall::build(a.terminal(), b.terminal(), sig(1)),
            Err(BuildError::ChannelMismatch)
        );
    }

    #[test]
    fn deposit_encoding() {
        let call = DepositCall::new(
            Address::zero(),
            Hash([0x11; 32]),
            U256::from(5),
            U256::from(7),
        );
        let encoded = call.encode().unwrap();
        assert_eq!(encoded.len(), 4 * 32);
        assert_eq!(slot(&encoded, 0), &[0u8; 32]);
        assert_eq!(slot(&encoded, 1), &[0x11; 32]);
        assert_eq!(slot(&encoded, 2)[31], 5);
        assert_eq!(slot(&encoded, 3)[31], 7);
    }

    #[test]
    fn transfer_after_conclude_uses_zero_state_hash() {
        let mut l = finalized(2);
        l.record_signature(0, 2, sig(0)).unwrap();
        l.record_signature(1, 2, sig(1)).unwrap();

        let call = TransferAllAssetsCall::build(&l, 2).unwrap();

        assert_eq!(call.state_hash, Hash::zero());
        assert_eq!(call.channel_id, l.channel_id());
        assert_eq!(call.outcome_bytes, l.terminal().encode_outcome());
    }

    #[test]
    fn transfer_after_challenge_uses_state_hash() {
        let mut l = ledger(2, 2);
        l.record_signature(0, 2, sig(0)).unwrap();

        let call = TransferAllAssetsCall::build(&l, 2).unwrap();
        assert_eq!(call.state_hash, l.terminal().state_hash());

        assert_eq!(
            TransferAllAssetsCall::build(&l, 9),
            Err(BuildError::UnknownTurn(9))
        );
    }
}
