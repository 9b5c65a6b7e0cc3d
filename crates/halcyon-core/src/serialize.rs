use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Serialize to deterministic bincode bytes
pub fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    bincode::serialize(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from bincode bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CoreError> {
    bincode::deserialize(bytes).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Serialize to pretty JSON string
pub fn to_json_pretty<T: Serialize>(value: &T) -> Result<String, CoreError> {
    serde_json::to_string_pretty(value).map_err(|e| CoreError::Serialization(e.to_string()))
}

/// Deserialize from JSON string
pub fn from_json<'a, T: Deserialize<'a>>(json: &'a str) -> Result<T, CoreError> {
    serde_json::from_str(json).map_err(|e| CoreError::Deserialization(e.to_string()))
}

/// Fixed-layout byte encoder used for everything that gets hashed or signed.
///
/// Integers are big-endian, variable-length fields are prefixed with their
/// `u32` length. The layout never depends on serde, so sign bytes and hashes
/// stay stable even if a type gains serde attributes.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buf: Vec<u8>,
}

impl CanonicalEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, v: u8) -> Self {
        self.buf.push(v);
        self
    }

    pub fn u32(mut self, v: u32) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn u64(mut self, v: u64) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn i64(mut self, v: i64) -> Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    /// Raw bytes of a fixed-size field (hashes, keys, signatures).
    pub fn fixed(mut self, v: &[u8]) -> Self {
        self.buf.extend_from_slice(v);
        self
    }

    /// Length-prefixed bytes.
    pub fn bytes(mut self, v: &[u8]) -> Self {
        self.buf.extend_from_slice(&(v.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(v);
        self
    }

    pub fn str(self, v: &str) -> Self {
        self.bytes(v.as_bytes())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        height: u64,
        chain_id: String,
    }

    #[test]
    fn test_bincode_roundtrip() {
        let original = Record {
            height: 42,
            chain_id: "halcyon-test".to_string(),
        };

        let bytes = to_bytes(&original).unwrap();
        let recovered: Record = from_bytes(&bytes).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_json_roundtrip() {
        let original = Record {
            height: 7,
            chain_id: "c".to_string(),
        };

        let json = to_json_pretty(&original).unwrap();
        let recovered: Record = from_json(&json).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_canonical_layout() {
        let bytes = CanonicalEncoder::new().u8(1).u32(2).str("ab").finish();
        assert_eq!(bytes, vec![1, 0, 0, 0, 2, 0, 0, 0, 2, b'a', b'b']);
    }

    #[test]
    fn test_canonical_length_prefix_disambiguates() {
        let a = CanonicalEncoder::new().str("ab").str("c").finish();
        let b = CanonicalEncoder::new().str("a").str("bc").finish();
        assert_ne!(a, b);
    }
}
