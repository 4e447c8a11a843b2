//! Deterministic channels and states for tests.

use super::{AllocationItem, AssetOutcome, ChannelIdentity, State};
use crate::abiencode::types::{Address, Bytes32, U256};

pub(crate) fn participant(i: usize) -> Address {
    let mut a = Address::zero();
    a.0[0] = 0xaa;
    a.0[19] = i as u8 + 1;
    a
}

pub(crate) fn identity(n: usize) -> ChannelIdentity {
    ChannelIdentity::new(
        U256::from(1337),
        U256::from(42),
        (0..n).map(participant).collect(),
        Address([0xcc; 20]),
    )
    .unwrap()
}

/// Turn `turn_num` of `identity` with an empty native-asset allocation for
/// every participant.
pub(crate) fn state(identity: &ChannelIdentity, turn_num: u64) -> State {
    State {
        channel: identity.clone(),
        outcome: vec![AssetOutcome {
            asset: Address::zero(),
            allocation_items: identity
                .participants()
                .iter()
                .map(|&p| AllocationItem {
                    destination: Bytes32::from(p),
                    amount: U256::zero(),
                })
                .collect(),
        }],
        app_data: vec![0; 32],
        is_final: false,
        challenge_duration: 30,
        turn_num,
    }
}

/// States `first..first + len` of `identity`.
pub(crate) fn states(identity: &ChannelIdentity, first: u64, len: u64) -> Vec<State> {
    (first..first + len).map(|t| state(identity, t)).collect()
}
