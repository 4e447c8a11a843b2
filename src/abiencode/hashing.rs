use super::{ser::to_writer_internal, types::Hash, Error, Writer};

use serde::Serialize;
use sha3::{Digest, Keccak256};

/// [Writer] feeding every slot into a Keccak256 hasher, so values can be
/// hashed without materializing their encoding.
pub struct Keccak256Writer {
    hasher: Keccak256,
}

impl Default for Keccak256Writer {
    fn default() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }
}

impl Writer for Keccak256Writer {
    fn write(&mut self, slot: &[u8]) {
        self.hasher.update(slot);
    }
}

impl Keccak256Writer {
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

/// `keccak256(abi.encode(value))`.
pub fn to_hash<T>(value: &T) -> Result<Hash, Error>
where
    T: Serialize,
{
    let mut writer = Keccak256Writer::default();
    to_writer_internal(value, &mut writer, true)?;
    Ok(writer.finalize())
}

/// `keccak256(abi.encode(a, b, ...))` where the fields of `value` are the
/// individual arguments.
pub fn to_fnargs_hash<T>(value: &T) -> Result<Hash, Error>
where
    T: Serialize,
{
    let mut writer = Keccak256Writer::default();
    to_writer_internal(value, &mut writer, false)?;
    Ok(writer.finalize())
}

/// Hash raw bytes, for data that is already encoded.
pub fn keccak256(data: &[u8]) -> Hash {
    Hash(Keccak256::digest(data).into())
}
