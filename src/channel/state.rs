use super::{encode_value, hash_args, ChannelIdentity, FixedPart, PartIdx};
use crate::abiencode::{
    as_bytes, keccak256,
    types::{Address, Bytes32, Hash, U256},
};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AllocationItem {
    pub destination: Bytes32,
    pub amount: U256,
}

/// How the holdings of one asset are split.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct AssetOutcome {
    pub asset: Address,
    pub allocation_items: Vec<AllocationItem>,
}

impl AssetOutcome {
    pub fn total(&self) -> Option<U256> {
        self.allocation_items
            .iter()
            .try_fold(U256::zero(), |acc, item| acc.checked_add(item.amount))
    }

    pub fn position_of(&self, destination: Bytes32) -> Option<usize> {
        self.allocation_items
            .iter()
            .position(|item| item.destination == destination)
    }
}

pub type Outcome = Vec<AssetOutcome>;

/// The per-state fields in the layout the adjudicator takes them.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VariablePart {
    #[serde(with = "as_bytes")]
    pub outcome: Vec<u8>,
    #[serde(with = "as_bytes")]
    pub app_data: Vec<u8>,
}

#[derive(Serialize)]
struct AppPart<'a> {
    challenge_duration: u64,
    app_definition: Address,
    #[serde(with = "as_bytes")]
    app_data: &'a [u8],
}

#[derive(Serialize)]
struct StatePreimage {
    turn_num: u64,
    is_final: bool,
    channel_id: Hash,
    app_part_hash: Hash,
    outcome_hash: Hash,
}

#[derive(Serialize)]
struct ChallengePreimage {
    state_hash: Hash,
    tag: &'static str,
}

/// One candidate state of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub channel: ChannelIdentity,
    pub outcome: Outcome,
    pub app_data: Vec<u8>,
    pub is_final: bool,
    pub challenge_duration: u64,
    pub turn_num: u64,
}

impl State {
    pub fn channel_id(&self) -> Hash {
        self.channel.channel_id()
    }

    /// Participant whose turn it is to sign this state first.
    pub fn mover(&self) -> PartIdx {
        (self.turn_num % self.channel.num_participants() as u64) as PartIdx
    }

    /// Copy of this state with the turn number incremented, the starting
    /// point for every update.
    pub fn make_next_state(&self) -> State {
        let mut s = self.clone();
        s.turn_num += 1;
        s
    }

    pub fn encode_outcome(&self) -> Vec<u8> {
        encode_value(&self.outcome)
    }

    pub fn outcome_hash(&self) -> Hash {
        keccak256(&self.encode_outcome())
    }

    pub fn app_part_hash(&self) -> Hash {
        hash_args(&AppPart {
            challenge_duration: self.challenge_duration,
            app_definition: self.channel.app_definition(),
            app_data: &self.app_data,
        })
    }

    /// The hash participants sign.
    pub fn state_hash(&self) -> Hash {
        hash_args(&StatePreimage {
            turn_num: self.turn_num,
            is_final: self.is_final,
            channel_id: self.channel_id(),
            app_part_hash: self.app_part_hash(),
            outcome_hash: self.outcome_hash(),
        })
    }

    /// The hash the challenger signs to register this state as a challenge.
    pub fn challenge_hash(&self) -> Hash {
        hash_args(&ChallengePreimage {
            state_hash: self.state_hash(),
            tag: "forceMove",
        })
    }

    pub fn fixed_part(&self) -> FixedPart {
        self.channel.fixed_part(self.challenge_duration)
    }

    pub fn variable_part(&self) -> VariablePart {
        VariablePart {
            outcome: self.encode_outcome(),
            app_data: self.app_data.clone(),
        }
    }

    pub fn asset_outcome(&self, asset: Address) -> Option<&AssetOutcome> {
        self.outcome.iter().find(|o| o.asset == asset)
    }

    /// Sum of all allocations of `asset`, `None` if the asset is not part of
    /// the outcome or the sum overflows.
    pub fn total(&self, asset: Address) -> Option<U256> {
        self.asset_outcome(asset)?.total()
    }

    /// Whether both states describe the same channel with the same rules, so
    /// one may follow the other.
    pub fn same_channel(&self, other: &State) -> bool {
        self.channel == other.channel && self.challenge_duration == other.challenge_duration
    }
}
