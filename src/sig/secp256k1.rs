//! Signer using the bindings to libsecp256k1.

use crate::abiencode::types::{Address, Hash, Signature};
use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    All, Message, PublicKey, Secp256k1, SecretKey,
};

use super::{address_from_uncompressed, hash_to_eth_signed_msg_hash};

pub use secp256k1::Error;

pub struct Signer {
    secp: Secp256k1<All>,
    key: SecretKey,
    addr: Address,
}

// Never print the key.
impl core::fmt::Debug for Signer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signer").field("addr", &self.addr).finish()
    }
}

impl From<PublicKey> for Address {
    fn from(pk: PublicKey) -> Self {
        address_from_uncompressed(&pk.serialize_uncompressed())
    }
}

impl Signer {
    /// Draw a fresh key from `rng`.
    pub fn new<R: rand::Rng + rand::CryptoRng>(rng: &mut R) -> Self {
        loop {
            let bytes: [u8; 32] = rng.gen();
            if let Ok(signer) = Self::from_secret_bytes(&bytes) {
                return signer;
            }
        }
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self, Error> {
        let secp = Secp256k1::new();
        let key = SecretKey::from_slice(bytes)?;
        let addr = PublicKey::from_secret_key(&secp, &key).into();
        Ok(Self { secp, key, addr })
    }

    pub fn address(&self) -> Address {
        self.addr
    }

    /// Sign a hash using an Ethereum 65-byte recoverable signature.
    pub fn sign_eth(&self, msg: Hash) -> Result<Signature, Error> {
        let hash = hash_to_eth_signed_msg_hash(msg);

        // Recoverable, so the contract can get the address back. This gives
        // us the additional information needed for v.
        let sig = self
            .secp
            .sign_ecdsa_recoverable(&Message::from(hash), &self.key);
        let (v, rs) = sig.serialize_compact();

        // [EIP-2](https://eips.ethereum.org/EIPS/eip-2) makes signatures with a
        // non-canonical s invalid. libsecp256k1 only produces canonical ones.
        debug_assert!(rs[32] & 0x80 == 0);

        // yParity is offset by 27 in Ethereum. No EIP-155 chain id is mixed in,
        // OpenZeppelin's ECDSA does not accept that for messages.
        let v: u8 = 27 + v.to_i32() as u8;

        Ok(Signature::new(&rs, v))
    }
}

/// Recover the signer of an already prefixed hash.
pub(super) fn recover(prefixed: Hash, eth_sig: Signature) -> Result<Address, Error> {
    let secp = Secp256k1::verification_only();

    let rs = &eth_sig.0[..64];
    let v = eth_sig.0[64]
        .checked_sub(27)
        .ok_or(Error::InvalidRecoveryId)?;

    let recid = RecoveryId::from_i32(v.into())?;
    let sig = RecoverableSignature::from_compact(rs, recid)?;
    let pk = secp.recover_ecdsa(&Message::from(prefixed), &sig)?;

    Ok(pk.into())
}
