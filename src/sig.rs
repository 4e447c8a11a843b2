//! Handles the creation and verification of (Ethereum) Signatures over state
//! hashes.
//!
//! The backend is selected with the `k256` (default) or `secp256k1` feature.
//! If both are enabled `secp256k1` is used.

use crate::abiencode::types::{Address, Hash, Signature};
use sha3::{Digest, Keccak256};

#[cfg(feature = "k256")]
mod k256;
#[cfg(feature = "secp256k1")]
mod secp256k1;

#[cfg(all(feature = "k256", not(feature = "secp256k1")))]
use self::k256::recover;
#[cfg(all(feature = "k256", not(feature = "secp256k1")))]
pub use self::k256::{Error, Signer};
#[cfg(feature = "secp256k1")]
use self::secp256k1::recover;
#[cfg(feature = "secp256k1")]
pub use self::secp256k1::{Error, Signer};

#[cfg(not(any(feature = "k256", feature = "secp256k1")))]
compile_error!("either the `k256` or the `secp256k1` feature must be enabled");


/// Add the `\x19Ethereum Signed Message:\n32` prefix to hash.
///
/// This is the format expected by the Solidity contracts.
fn hash_to_eth_signed_msg_hash(hash: Hash) -> Hash {
    // Packed encoding => We can't use the serializer
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(hash.0);
    Hash(hasher.finalize().into())
}

/// Recover the address that produced `sig` over `hash`.
///
/// `hash` is the hash given to `Signer::sign_eth`, without the `Ethereum
/// Signed Message` prefix.
pub fn recover_signer(hash: Hash, sig: Signature) -> Result<Address, Error> {
    recover(hash_to_eth_signed_msg_hash(hash), sig)
}

/// Address belonging to an uncompressed SEC1 public key (`0x04 || x || y`).
fn address_from_uncompressed(pk_bytes: &[u8]) -> Address {
    // Throw away the first byte, which is not part of the public key. It is
    // added by the uncompressed encoding.
    let hash: [u8; 32] = Keccak256::digest(&pk_bytes[1..]).into();

    let mut addr = Address([0; 20]);
    addr.0.copy_from_slice(&hash[32 - 20..]);
    addr
}
