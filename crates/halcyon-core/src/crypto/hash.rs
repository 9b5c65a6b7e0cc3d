use crate::crypto::bytes::fixed_bytes;

/// A 32-byte Blake3 digest. The all-zero value stands for "no hash", e.g.
/// the nil block id or an empty evidence list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

fixed_bytes!(Hash, 32, raw32, InvalidHashLength);

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Hash::ZERO
    }
}

pub fn hash_blake3(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

/// Hash several byte slices as one stream without concatenating them first.
pub fn hash_parts(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    Hash(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_parts_matches_concatenation() {
        assert_eq!(hash_parts(&[&b"ab"[..], &b"cd"[..]]), hash_blake3(b"abcd"));
        assert_ne!(hash_parts(&[&b"ab"[..], &b"cd"[..]]), hash_parts(&[&b"abc"[..]]));
    }

    #[test]
    fn test_zero_hash() {
        assert!(Hash::ZERO.is_zero());
        assert!(Hash::default().is_zero());
        assert!(!hash_blake3(b"").is_zero());
    }

    #[test]
    fn test_hash_from_hex_rejects_wrong_length() {
        assert!(Hash::from_hex("abcd").is_err());
        let hash = hash_blake3(b"block");
        assert_eq!(Hash::from_hex(&hash.to_hex()).unwrap(), hash);
    }

    #[test]
    fn test_hash_serializes_as_hex_in_json() {
        let hash = hash_blake3(b"block");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);

        let bin = bincode::serialize(&hash).unwrap();
        assert_eq!(bin.len(), 32);
        assert_eq!(bincode::deserialize::<Hash>(&bin).unwrap(), hash);
    }
}
