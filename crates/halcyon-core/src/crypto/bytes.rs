//! Fixed-width byte newtypes shared by hashes, keys and signatures.
//!
//! Human-readable formats (genesis and config files, the HTTP transport)
//! carry them as hex strings; binary formats carry the raw bytes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_big_array::BigArray;

pub(crate) mod raw32 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        Serialize::serialize(bytes, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        <[u8; 32] as Deserialize>::deserialize(deserializer)
    }
}

pub(crate) mod raw64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], serializer: S) -> Result<S::Ok, S::Error> {
        BigArray::serialize(bytes, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 64], D::Error> {
        <[u8; 64] as BigArray<'de, u8>>::deserialize(deserializer)
    }
}

/// Implements slice/hex conversion, formatting and serde for a
/// `struct $name(pub [u8; $len])`. `$invalid` is the `CoreError` returned
/// for input of the wrong length.
macro_rules! fixed_bytes {
    ($name:ident, $len:literal, $raw:ident, $invalid:ident) => {
        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_vec(&self) -> Vec<u8> {
                self.0.to_vec()
            }

            pub fn from_slice(slice: &[u8]) -> Option<Self> {
                <[u8; $len]>::try_from(slice).ok().map($name)
            }

            pub fn from_hex(s: &str) -> Result<Self, $crate::error::CoreError> {
                let bytes = hex::decode(s)?;
                Self::from_slice(&bytes).ok_or($crate::error::CoreError::$invalid)
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// First bytes in hex, for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..6])
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name([0u8; $len])
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.short())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&self.to_hex())
                } else {
                    $crate::crypto::bytes::$raw::serialize(&self.0, serializer)
                }
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                if deserializer.is_human_readable() {
                    let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                    Self::from_hex(&s).map_err(serde::de::Error::custom)
                } else {
                    $crate::crypto::bytes::$raw::deserialize(deserializer).map($name)
                }
            }
        }
    };
}

pub(crate) use fixed_bytes;
