//! Error type and Return values used by the Serialization.

use serde::ser;
use thiserror::Error;

/// Represents all possible errors that can happen during Serialization.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The value contains a type that is not directly representable in
    /// Solidity types, for example floating point numbers, enums and maps.
    /// Enums should be mapped to integers by a custom `Serialize`
    /// implementation instead.
    #[error("type is not representable in abi encoding: {0}")]
    TypeNotRepresentable(&'static str),
    /// Although the type is representable in Solidity (currently only `char`),
    /// the Serializer does not implement it.
    #[error("type is not yet implemented: {0}")]
    TypeNotYetSupported(&'static str),
    /// A sequence did not report its length up front, which is needed to
    /// write the length slot before the elements.
    #[error("sequence length must be known before serialization")]
    UnknownSequenceLength,
    /// Raised by `Serialize` implementations through [ser::Error::custom].
    #[error("{0}")]
    Custom(String),
}

impl ser::Error for Error {
    fn custom<T>(msg: T) -> Self
    where
        T: core::fmt::Display,
    {
        Error::Custom(msg.to_string())
    }
}

/// Alias for `Result` using the [Error] returned by the Serializer.
pub type Result<T> = core::result::Result<T, Error>;
