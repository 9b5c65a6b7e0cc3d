use ed25519_dalek::{Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;

use crate::crypto::bytes::fixed_bytes;
use crate::crypto::signature::Sig;
use crate::error::CoreError;

/// Key type name reported to the application and checked against
/// `ValidatorParams::pub_key_types`.
pub const KEY_TYPE_ED25519: &str = "ed25519";

/// Ed25519 public key. Validators are addressed by their key, so this is
/// also the validator address in votes, commits and evidence.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; 32]);

fixed_bytes!(PublicKey, 32, raw32, InvalidPublicKey);

impl PublicKey {
    pub fn key_type(&self) -> &'static str {
        KEY_TYPE_ED25519
    }

    pub fn verify(&self, message: &[u8], sig: &Sig) -> Result<(), CoreError> {
        let key = VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        key.verify(message, &ed25519_dalek::Signature::from_bytes(&sig.0))
            .map_err(|_| CoreError::InvalidSignature)
    }
}

/// Ed25519 signing key. Deliberately not `Serialize`: it leaves the process
/// only as hex through `to_hex`.
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    pub fn generate() -> Self {
        SecretKey(SigningKey::generate(&mut OsRng))
    }

    /// From a 32-byte seed
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        SecretKey(SigningKey::from_bytes(bytes))
    }

    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s)?;
        let seed = <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| CoreError::InvalidSecretKey)?;
        Ok(Self::from_bytes(&seed))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Sig {
        Sig(self.0.sign(message).to_bytes())
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}

/// A validator's signing identity.
#[derive(Clone)]
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::generate())
    }

    /// Deterministic keys, used for test validator sets.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self::from_secret(SecretKey::from_bytes(bytes))
    }

    pub fn from_secret(secret: SecretKey) -> Self {
        let public = secret.public_key();
        KeyPair { secret, public }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_from_seed_are_deterministic() {
        let a = KeyPair::from_secret_bytes(&[42u8; 32]);
        let b = KeyPair::from_secret_bytes(&[42u8; 32]);
        assert_eq!(a.public, b.public);
        assert_ne!(a.public, KeyPair::from_secret_bytes(&[43u8; 32]).public);
    }

    #[test]
    fn test_secret_hex_roundtrip() {
        let kp = KeyPair::from_secret_bytes(&[9u8; 32]);
        let recovered = SecretKey::from_hex(&kp.secret.to_hex()).unwrap();
        assert_eq!(recovered.public_key(), kp.public);
        assert!(matches!(SecretKey::from_hex("0011"), Err(CoreError::InvalidSecretKey)));
        assert!(matches!(SecretKey::from_hex("xyz"), Err(CoreError::HexDecode(_))));
    }

    #[test]
    fn test_public_key_in_json_is_hex() {
        let kp = KeyPair::from_secret_bytes(&[5u8; 32]);
        let json = serde_json::to_string(&kp.public).unwrap();
        assert_eq!(json, format!("\"{}\"", kp.public.to_hex()));
        assert!(serde_json::from_str::<PublicKey>("\"00ff\"").is_err());
        assert_eq!(kp.public.key_type(), KEY_TYPE_ED25519);
    }

    #[test]
    fn test_debug_hides_secret() {
        let kp = KeyPair::from_secret_bytes(&[7u8; 32]);
        let shown = format!("{:?}", kp);
        assert!(!shown.contains(&kp.secret.to_hex()));
        assert_eq!(format!("{:?}", kp.secret), "SecretKey([REDACTED])");
    }
}
