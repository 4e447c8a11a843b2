use super::{hash_args, PartIdx};
use crate::abiencode::types::{Address, Hash, U256};
use serde::Serialize;
use thiserror::Error;

/// `whoSignedWhat` is a `uint8[]` on-chain.
pub const MAX_PARTICIPANTS: usize = u8::MAX as usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("a channel needs at least one participant")]
    NoParticipants,
    #[error("participant {0:?} was already added")]
    DuplicateParticipant(Address),
    #[error("{0} participants exceed the maximum of {max}", max = MAX_PARTICIPANTS)]
    TooManyParticipants(usize),
}

/// The fixed parameters of a channel. Its hash is the channel id, the key
/// the adjudicator stores holdings and status under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelIdentity {
    chain_id: U256,
    nonce: U256,
    participants: Vec<Address>,
    app_definition: Address,
}

#[derive(Serialize)]
struct ChannelIdPreimage<'a> {
    chain_id: U256,
    participants: &'a [Address],
    nonce: U256,
    app_definition: Address,
}

/// The part of every state that never changes, in the layout the
/// adjudicator takes it.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct FixedPart {
    pub chain_id: U256,
    pub participants: Vec<Address>,
    pub channel_nonce: U256,
    pub app_definition: Address,
    pub challenge_duration: u64,
}

impl ChannelIdentity {
    pub fn new(
        chain_id: U256,
        nonce: U256,
        participants: Vec<Address>,
        app_definition: Address,
    ) -> Result<Self, IdentityError> {
        if participants.is_empty() {
            return Err(IdentityError::NoParticipants);
        }
        if participants.len() > MAX_PARTICIPANTS {
            return Err(IdentityError::TooManyParticipants(participants.len()));
        }
        for (i, p) in participants.iter().enumerate() {
            if participants[..i].contains(p) {
                return Err(IdentityError::DuplicateParticipant(*p));
            }
        }

        Ok(Self {
            chain_id,
            nonce,
            participants,
            app_definition,
        })
    }

    /// Same channel parameters with one more participant appended.
    pub fn with_participant(&self, participant: Address) -> Result<Self, IdentityError> {
        let mut participants = self.participants.clone();
        participants.push(participant);
        Self::new(self.chain_id, self.nonce, participants, self.app_definition)
    }

    pub fn chain_id(&self) -> U256 {
        self.chain_id
    }

    pub fn nonce(&self) -> U256 {
        self.nonce
    }

    pub fn participants(&self) -> &[Address] {
        &self.participants
    }

    pub fn num_participants(&self) -> usize {
        self.participants.len()
    }

    pub fn app_definition(&self) -> Address {
        self.app_definition
    }

    pub fn index_of(&self, participant: Address) -> Option<PartIdx> {
        self.participants.iter().position(|&p| p == participant)
    }

    /// `keccak256(abi.encode(chainId, participants, nonce, appDefinition))`.
    pub fn channel_id(&self) -> Hash {
        hash_args(&ChannelIdPreimage {
            chain_id: self.chain_id,
            participants: &self.participants,
            nonce: self.nonce,
            app_definition: self.app_definition,
        })
    }

    pub fn fixed_part(&self, challenge_duration: u64) -> FixedPart {
        FixedPart {
            chain_id: self.chain_id,
            participants: self.participants.clone(),
            channel_nonce: self.nonce,
            app_definition: self.app_definition,
            challenge_duration,
        }
    }
}
