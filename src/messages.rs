//! Messages exchanged between the participants of a channel.

mod signature_share;

pub use signature_share::SignatureShare;

use crate::abiencode::types::Hash;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("field has the wrong number of bytes")]
    ByteLengthMismatch,
    #[error("required field is missing")]
    ExpectedSome,
}

/// Messages sent between participants of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantMessage {
    /// A participant signed a state and hands the signature to the others.
    SignatureShare(SignatureShare),
    /// A share could not be merged, sent back so the sender can find out.
    ShareRejected {
        id: Hash,
        turn_num: u64,
        reason: String,
    },
}
