//! Boundary to the on-chain adjudicator. Implementations submit the calls
//! built in [calls] and wait for their receipts. This crate never talks to a
//! chain itself.

mod calls;

pub use calls::*;

use crate::{
    abiencode::types::{Address, Hash, U256},
    channel::{ChannelStatus, TransitionQuery},
};
use async_trait::async_trait;
use thiserror::Error;

/// Outcome of a mined transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub block_timestamp: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("transaction reverted: {0}")]
    Reverted(String),
    #[error("timed out waiting for the receipt")]
    Timeout,
    #[error("transport failure: {0}")]
    Transport(String),
}

/// The adjudicator contract of one chain. Every mutating call resolves once
/// its transaction is mined.
#[async_trait]
pub trait Adjudicator: Send + Sync {
    async fn deposit(&self, call: DepositCall) -> Result<Receipt, ChainError>;

    async fn conclude(&self, call: ConcludeCall) -> Result<Receipt, ChainError>;

    async fn challenge(&self, call: ChallengeCall) -> Result<Receipt, ChainError>;

    async fn respond(&self, call: RespondCall) -> Result<Receipt, ChainError>;

    async fn checkpoint(&self, call: CheckpointCall) -> Result<Receipt, ChainError>;

    async fn transfer_all_assets(&self, call: TransferAllAssetsCall) -> Result<Receipt, ChainError>;

    async fn status(&self, channel_id: Hash) -> Result<ChannelStatus, ChainError>;

    async fn holdings(&self, asset: Address, channel_id: Hash) -> Result<U256, ChainError>;

    /// Read-only `validTransition` of the channel's application.
    async fn valid_transition(&self, query: TransitionQuery) -> Result<bool, ChainError>;
}
