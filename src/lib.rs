//! Off-chain side of disputes for Nitro-style state channels.
//!
//! A participant keeps the candidate states of a channel and the signatures
//! collected on them in a [ChannelLedger]. From it the crate compiles the
//! smallest set of states the adjudicator needs to see for `challenge`,
//! `checkpoint`, `respond` and `conclude`, and tracks the channel's mode from
//! the adjudicator's status. [ChannelSession] drives all of this against an
//! [Adjudicator](adjudicator::Adjudicator).

pub mod abiencode {
    mod error;
    mod hashing;
    mod ser;

    pub mod as_bytes;
    pub mod types;

    pub use error::{Error, Result};
    pub use hashing::{keccak256, to_fnargs_hash, to_hash, Keccak256Writer};
    pub use ser::{to_bytes, to_fnargs_bytes, to_fnargs_writer, to_writer, Serializer, Writer};

    #[cfg(test)]
    mod tests;
}

pub mod adjudicator;
pub mod channel;
pub mod config;
pub mod messages;
mod session;
pub mod sig;
pub mod wire;

pub use abiencode::types::{Address, Bytes32, Hash, Signature, U256};
pub use channel::{ChannelLedger, ChannelMode, LedgerAction};
pub use config::SessionConfig;
pub use session::{ChannelSession, Clock, SessionError, ShareOutcome, SystemClock};
