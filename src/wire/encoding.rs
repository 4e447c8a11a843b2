use prost::{bytes::BufMut, DecodeError, EncodeError, Message};
use thiserror::Error;

use super::{
    proto::{envelope, Envelope, ShareRejectedMsg},
    BytesBus, MessageBus,
};
use crate::{
    abiencode::types::Hash,
    messages::{ConversionError, ParticipantMessage},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    #[error("message of {0} bytes does not fit the u16 length prefix")]
    MessageTooLarge(usize),
    #[error("length prefix says {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Encodes messages as a big-endian u16 length followed by the protobuf
/// encoded [Envelope].
#[derive(Debug)]
pub struct ProtoBufEncodingLayer<B: BytesBus> {
    pub bus: B,
}

impl<B: BytesBus> ProtoBufEncodingLayer<B> {
    fn encode<T: Message>(msg: T) -> Result<Vec<u8>, WireError> {
        // A fixed u16 length, not the LEB128 varint `encode_length_delimited`
        // would write.
        let len = msg.encoded_len();
        let prefix = u16::try_from(len).map_err(|_| WireError::MessageTooLarge(len))?;

        let mut buf = Vec::with_capacity(2 + len);
        buf.put_slice(&prefix.to_be_bytes());
        msg.encode(&mut buf)?;
        Ok(buf)
    }
}

impl<B: BytesBus> MessageBus for ProtoBufEncodingLayer<B> {
    fn send_to_participants(&self, msg: ParticipantMessage) -> Result<(), WireError> {
        let wiremsg = match msg {
            ParticipantMessage::SignatureShare(share) => {
                envelope::Msg::SignatureShare(share.into())
            }
            ParticipantMessage::ShareRejected {
                id,
                turn_num,
                reason,
            } => envelope::Msg::ShareRejected(ShareRejectedMsg {
                channel_id: id.0.to_vec(),
                turn_num,
                reason,
            }),
        };
        let envelope = Envelope { msg: Some(wiremsg) };

        let buf = Self::encode(envelope)?;
        self.bus.send_to_participants(&buf);
        Ok(())
    }
}

/// Inverse of what [ProtoBufEncodingLayer] sends.
pub fn decode_participant_message(buf: &[u8]) -> Result<ParticipantMessage, WireError> {
    if buf.len() < 2 {
        return Err(WireError::LengthMismatch {
            expected: 2,
            got: buf.len(),
        });
    }
    let expected = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    let body = &buf[2..];
    if body.len() != expected {
        return Err(WireError::LengthMismatch {
            expected,
            got: body.len(),
        });
    }

    let envelope = Envelope::decode(body)?;
    match envelope.msg.ok_or(ConversionError::ExpectedSome)? {
        envelope::Msg::SignatureShare(msg) => Ok(ParticipantMessage::SignatureShare(msg.try_into()?)),
        envelope::Msg::ShareRejected(msg) => Ok(ParticipantMessage::ShareRejected {
            id: Hash(
                msg.channel_id
                    .try_into()
                    .or(Err(ConversionError::ByteLengthMismatch))?,
            ),
            turn_num: msg.turn_num,
            reason: msg.reason,
        }),
    }
}
