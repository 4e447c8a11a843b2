use crate::abiencode::types::Address;
use serde::Deserialize;
use std::time::Duration;

/// Settings of a [ChannelSession](crate::ChannelSession). Missing fields
/// take their defaults, so any serde format with a subset of the fields can
/// be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Seconds a challenge stays open, used for new channels.
    pub challenge_duration: u64,
    /// Upper bound in seconds between status reads while waiting for a
    /// challenge to finalize.
    pub poll_interval_secs: u64,
    /// Asset new channels are funded in, `address(0)` for ETH.
    pub native_asset: Address,
    /// Shares on states we have not seen yet that are held for checking.
    pub max_pending_shares: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            challenge_duration: 30,
            poll_interval_secs: 5,
            native_asset: Address::zero(),
            max_pending_shares: 64,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
