use crate::crypto::bytes::fixed_bytes;
use crate::crypto::keys::{PublicKey, SecretKey};
use crate::error::CoreError;

/// Ed25519 signature. Votes and proposals are built unsigned with the
/// all-zero value and signed afterwards.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Sig(pub [u8; 64]);

fixed_bytes!(Sig, 64, raw64, InvalidSignature);

impl Sig {
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 64]
    }
}

pub fn sign(secret_key: &SecretKey, message: &[u8]) -> Sig {
    secret_key.sign(message)
}

pub fn verify(public_key: &PublicKey, message: &[u8], signature: &Sig) -> Result<(), CoreError> {
    if signature.is_empty() {
        return Err(CoreError::InvalidSignature);
    }
    public_key.verify(message, signature)
}
