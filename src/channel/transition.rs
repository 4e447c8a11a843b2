use super::State;
use crate::abiencode::{
    as_bytes,
    types::{Address, Hash},
};
use serde::Serialize;

/// Decides whether `candidate` may follow `previous`.
///
/// The adjudicator owns the authoritative answer for an application
/// (`validTransition`); rules here are evaluated locally before a state is
/// accepted into the ledger.
pub trait TransitionRule {
    fn allows(&self, previous: &State, candidate: &State) -> bool;
}

impl<F> TransitionRule for F
where
    F: Fn(&State, &State) -> bool,
{
    fn allows(&self, previous: &State, candidate: &State) -> bool {
        self(previous, candidate)
    }
}

/// Accepts every transition, for applications without rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyTransition;

impl TransitionRule for AnyTransition {
    fn allows(&self, _: &State, _: &State) -> bool {
        true
    }
}

/// Funds may move between destinations but the assets and their totals stay
/// the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservesTotals;

impl TransitionRule for ConservesTotals {
    fn allows(&self, previous: &State, candidate: &State) -> bool {
        if previous.outcome.len() != candidate.outcome.len() {
            return false;
        }
        previous
            .outcome
            .iter()
            .zip(&candidate.outcome)
            .all(|(a, b)| a.asset == b.asset && a.total().is_some() && a.total() == b.total())
    }
}

/// Answer obtained elsewhere, usually from the adjudicator's
/// `validTransition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict(pub bool);

impl TransitionRule for Verdict {
    fn allows(&self, _: &State, _: &State) -> bool {
        self.0
    }
}

/// The part of a state the application sees in `validTransition`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TransitionPart {
    pub outcome_hash: Hash,
    #[serde(with = "as_bytes")]
    pub app_data: Vec<u8>,
}

/// Arguments of the adjudicator's read-only `validTransition(nParticipants,
/// isFinalAB, ab, turnNumB, appDefinition)`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct TransitionQuery {
    pub num_participants: u64,
    pub is_final_ab: [bool; 2],
    pub ab: [TransitionPart; 2],
    pub turn_num_b: u64,
    pub app_definition: Address,
}

impl TransitionQuery {
    pub fn new(previous: &State, candidate: &State) -> Self {
        let part = |s: &State| TransitionPart {
            outcome_hash: s.outcome_hash(),
            app_data: s.app_data.clone(),
        };
        Self {
            num_participants: candidate.channel.num_participants() as u64,
            is_final_ab: [previous.is_final, candidate.is_final],
            ab: [part(previous), part(candidate)],
            turn_num_b: candidate.turn_num,
            app_definition: candidate.channel.app_definition(),
        }
    }
}
