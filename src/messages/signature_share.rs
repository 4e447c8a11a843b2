use super::ConversionError;
use crate::{
    abiencode::types::{Hash, Signature},
    channel::PartIdx,
    wire::proto,
};

/// `participant`'s signature on turn `turn_num` of channel `channel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureShare {
    pub channel: Hash,
    pub turn_num: u64,
    pub participant: PartIdx,
    pub sig: Signature,
}

impl TryFrom<proto::SignatureShareMsg> for SignatureShare {
    type Error = ConversionError;

    fn try_from(value: proto::SignatureShareMsg) -> Result<Self, Self::Error> {
        Ok(Self {
            channel: Hash(
                value
                    .channel_id
                    .try_into()
                    .or(Err(ConversionError::ByteLengthMismatch))?,
            ),
            turn_num: value.turn_num,
            participant: value.participant as PartIdx,
            sig: Signature(
                value
                    .sig
                    .try_into()
                    .or(Err(ConversionError::ByteLengthMismatch))?,
            ),
        })
    }
}

impl From<SignatureShare> for proto::SignatureShareMsg {
    fn from(value: SignatureShare) -> Self {
        Self {
            channel_id: value.channel.0.to_vec(),
            turn_num: value.turn_num,
            participant: value.participant as u32,
            sig: value.sig.0.to_vec(),
        }
    }
}
