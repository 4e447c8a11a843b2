//! Signer using the k256 Rust crate (implementation of ecdsa in Rust).

use crate::abiencode::types::{Address, Hash, Signature};
use k256::{
    ecdsa::{
        recoverable,
        signature::{hazmat::PrehashSigner, Signature as k256Signature},
        SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};

use super::{address_from_uncompressed, hash_to_eth_signed_msg_hash};

pub use k256::ecdsa::Error;

pub struct Signer {
    key: SigningKey,
    addr: Address,
}

// Never print the key.
impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<VerifyingKey> for Address {
    fn from(key: VerifyingKey) -> Self {
        address_from_uncompressed(key.to_encoded_point(false).as_bytes())
    }
}

impl Signer {
    /// Draw a fresh key from `rng`.
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        loop {
            // Out-of-range scalars are astronomically rare, just draw again.
            let bytes: [u8; 32] = rng.gen();
            if let Ok(signer) = Self::from_secret_bytes(&bytes) {
                return signer;
            }
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        let key = SigningKey::from_bytes(bytes)?;
        let addr = key.verifying_key().into();
        Ok(Self { key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        let hash = hash_to_eth_signed_msg_hash(msg);

        let sig: recoverable::Signature = self.key.sign_prehash(&hash.0)?;

        // This Signature type already has the layout we need (r, s, v), but
        // the EVM expects v to be offset by 27.
        let mut sig_bytes = [0u8; 65];
        sig_bytes.copy_from_slice(sig.as_bytes());
        debug_assert!(sig_bytes[32] & 0x80 == 0);
        sig_bytes[64] += 27;

        Ok(Signature(sig_bytes))
    }
}

/// Recover the signer of an already prefixed hash.
pub(super) fn recover(prefixed: Hash, eth_sig: Signature) -> Result<Address, Error> {
    // Undo adding the 27, to go back to the format expected below
    let mut sig_bytes: [u8; 65] = eth_sig.0;
    sig_bytes[64] = sig_bytes[64].checked_sub(27).ok_or_else(Error::new)?;

    let sig = recoverable::Signature::from_bytes(&sig_bytes)?;
    let verifying_key = sig.recover_verifying_key_from_digest_bytes(&prefixed.0.into())?;
    Ok(verifying_key.into())
}
