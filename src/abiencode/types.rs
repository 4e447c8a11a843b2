use core::fmt::Debug;

use rand::{distributions::Standard, prelude::Distribution};
use serde::{de, ser::SerializeStruct, Deserialize, Deserializer, Serialize};
use uint::{construct_uint, hex::FromHex};

#[cfg(feature = "secp256k1")]
use secp256k1::ThirtyTwoByteHash;

macro_rules! impl_hex_debug {
    ($T:ident) => {
        impl Debug for $T {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("0x")?;
                for b in self.0 {
                    f.write_fmt(format_args!("{:02x}", b))?;
                }
                Ok(())
            }
        }
    };
}

macro_rules! bytesN {
    ( $T:ident, $N:literal ) => {
        #[derive(PartialEq, Eq, Hash, Copy, Clone)]
        pub struct $T(pub [u8; $N]);

        impl Serialize for $T {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_bytes(&self.0)
            }
        }

        impl Distribution<$T> for Standard {
            fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> $T {
                $T(rng.gen())
            }
        }

        impl Default for $T {
            fn default() -> Self {
                Self([0; $N])
            }
        }

        impl_hex_debug!($T);
    };
}

bytesN!(Bytes32, 32);
bytesN!(Hash, 32);

impl Hash {
    /// `bytes32(0)`, used by the adjudicator as "no state hash needed".
    pub const fn zero() -> Self {
        Hash([0; 32])
    }
}

#[cfg(feature = "secp256k1")]
impl ThirtyTwoByteHash for Hash {
    fn into_32(self) -> [u8; 32] {
        self.0
    }
}

/// 65-byte recoverable signature in `r || s || v` order, with `v` in the
/// Ethereum range (27 or 28).
#[derive(PartialEq, Eq, Copy, Clone)]
pub struct Signature(pub [u8; 65]);
impl_hex_debug!(Signature);

impl Default for Signature {
    fn default() -> Self {
        Self([0; 65])
    }
}

impl Signature {
    pub fn new(rs: &[u8; 64], v: u8) -> Self {
        let mut sig: Signature = Signature([0; 65]);
        sig.0[..64].copy_from_slice(rs);
        sig.0[64] = v;
        sig
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }

    pub fn r(&self) -> Bytes32 {
        let mut r = Bytes32::default();
        r.0.copy_from_slice(&self.0[..32]);
        r
    }

    pub fn s(&self) -> Bytes32 {
        let mut s = Bytes32::default();
        s.0.copy_from_slice(&self.0[32..64]);
        s
    }
}

// The adjudicator takes signatures as `struct Signature { uint8 v; bytes32 r;
// bytes32 s; }`, not as the packed 65 bytes.
impl Serialize for Signature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("Signature", 3)?;
        s.serialize_field("v", &self.v())?;
        s.serialize_field("r", &self.r())?;
        s.serialize_field("s", &self.s())?;
        s.end()
    }
}

// We could use primitive_types:U256 or ethereum_types::U256 here, too. Both
// serialize to a hex string with serde, which is not what the abi encoder
// needs, so we construct our own type and serialize it as a 32 byte slot.
construct_uint! {
    pub struct U256(4);
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut bytes = [0u8; 32];
        self.to_big_endian(&mut bytes);
        serializer.serialize_bytes(&bytes)
    }
}

impl Distribution<U256> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> U256 {
        let buf: [u8; 32] = rng.gen();
        U256::from_big_endian(&buf)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);
impl_hex_debug!(Address);

impl Address {
    /// `address(0)`, which the adjudicator uses to denote the native asset.
    pub const fn zero() -> Self {
        Address([0; 20])
    }

    /// Parse a `0x`-prefixed (or bare) 40 character hex string.
    pub fn from_hex_str(s: &str) -> Option<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        <[u8; 20]>::from_hex(s).ok().map(Address)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        // Abi encoding has addresses right aligned (like uints) instead of
        // left aligned like bytes/bytesN.
        let mut bytes = [0u8; 32];
        bytes[32 - 20..].copy_from_slice(self.0.as_slice());
        serializer.serialize_bytes(&bytes)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_hex_str(&s)
            .ok_or_else(|| de::Error::custom(format!("invalid address: {}", s)))
    }
}

/// Outcome destinations are addresses zero-padded on the left to 32 bytes.
impl From<Address> for Bytes32 {
    fn from(addr: Address) -> Self {
        let mut bytes = [0u8; 32];
        bytes[32 - 20..].copy_from_slice(&addr.0);
        Bytes32(bytes)
    }
}

impl Distribution<Address> for Standard {
    fn sample<R: rand::Rng + ?Sized>(&self, rng: &mut R) -> Address {
        Address(rng.gen())
    }
}
