mod encoding;
pub mod proto;

use core::fmt::Debug;

pub use encoding::{decode_participant_message, ProtoBufEncodingLayer, WireError};

use crate::messages::ParticipantMessage;

/// Raw byte transport to the other participants.
pub trait BytesBus: Debug {
    fn send_to_participants(&self, msg: &[u8]);
}

/// Typed transport to the other participants.
pub trait MessageBus: Debug {
    fn send_to_participants(&self, msg: ParticipantMessage) -> Result<(), WireError>;
}
