//! Serialize any `&[u8]` as solidity `bytes` (dynamic length bytes).
//!
//! Without this, it would be serialized to a `uint8[]` of fixed or dynamic
//! length.
//!
//! # Example usage
//! ```
//! use serde::Serialize;
//! use nitro_dispute::abiencode::as_bytes;
//!
//! #[derive(Serialize, Debug)]
//! pub struct AppData {
//!     #[serde(with = "as_bytes")]
//!     pub data: Vec<u8>,
//! }
//! ```

use super::ser::DynamicMarker;
use serde::{ser::SerializeTuple, Serialize, Serializer};

/// Lets us hand the data to `serialize_bytes`, which cannot be chosen when
/// calling `serialize_element`.
struct Bytes<'a>(&'a [u8]);

impl<'a> Serialize for Bytes<'a> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(self.0)
    }
}

pub fn serialize<S>(v: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut s = serializer.serialize_tuple(3)?;
    s.serialize_element(&DynamicMarker)?; // Mark tuple as dynamic (needed for correct encoding)
    s.serialize_element(&v.len())?; // Length in bytes, not slots
    s.serialize_element(&Bytes(v))?;
    s.end()
}
