//! Off-chain view of one channel: its identity, the candidate states, who
//! signed what, and the dispute evidence derived from them.

mod evidence;
mod identity;
mod ledger;
mod mode;
mod sequence;
mod signatures;
mod state;
mod transition;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::abiencode::{self, types::Hash};
use serde::Serialize;

pub use evidence::*;
pub use identity::*;
pub use ledger::*;
pub use mode::*;
pub use sequence::*;
pub use signatures::*;
pub use state::*;
pub use transition::*;

/// ID (Index) of a participant in the channel's participant list.
pub type PartIdx = usize;

/// Position of a state in the local sequence. Unlike a turn number it shifts
/// when older states are pruned.
pub type LedgerIdx = usize;

// Everything hashed or encoded below is built from addresses, integers, bytes
// and arrays of those, which the encoder always supports.
const REPRESENTABLE: &str = "channel types are always abi-representable";

/// `keccak256(abi.encode(a, b, ...))` over the fields of `value`.
pub(crate) fn hash_args<T: Serialize>(value: &T) -> Hash {
    abiencode::to_fnargs_hash(value).expect(REPRESENTABLE)
}

/// `abi.encode(value)`.
pub(crate) fn encode_value<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    abiencode::to_bytes(value).expect(REPRESENTABLE)
}
