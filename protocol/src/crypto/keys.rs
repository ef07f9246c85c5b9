//! # Validator Keys
//!
//! Ed25519 keypairs for validators and the self-describing signatures they
//! produce.
//!
//! Ed25519 has no public-key recovery, so a consensus [`Signature`] carries
//! the signer's 32-byte public key next to the 64 signature bytes. The
//! signer's [`Address`] is derived from that key, which gives vote handling
//! the "who signed this" answer that recovery would otherwise provide.
//!
//! ## Security considerations
//!
//! - Key bytes are never logged. `Debug` prints the address only.
//! - `ValidatorKeypair` does not implement `Serialize`. Exporting a secret
//!   key is an explicit call to [`ValidatorKeypair::secret_key_bytes`].

use std::fmt;

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, ADDRESS_LENGTH};

/// Errors that can occur during key operations.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or not a valid scalar")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// Derives the account address of an Ed25519 public key: the last 20
/// bytes of its BLAKE3 digest.
pub fn address_from_public_key(public_key: &[u8; 32]) -> Address {
    let digest = blake3::hash(public_key);
    let mut bytes = [0u8; ADDRESS_LENGTH];
    bytes.copy_from_slice(&digest.as_bytes()[32 - ADDRESS_LENGTH..]);
    Address(bytes)
}

// ---------------------------------------------------------------------------
// ValidatorKeypair
// ---------------------------------------------------------------------------

/// A validator's signing identity.
pub struct ValidatorKeypair {
    signing_key: SigningKey,
}

impl ValidatorKeypair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Builds a keypair deterministically from a 32-byte seed.
    ///
    /// The devnet derives every validator from `[index; 32]`-style seeds so
    /// restarts keep the same addresses. Never do that with real keys.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Parses a hex-encoded 32-byte secret key.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Raw public key bytes.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The account address controlled by this keypair.
    pub fn address(&self) -> Address {
        address_from_public_key(&self.public_key_bytes())
    }

    /// Signs `message`, embedding the public key in the result.
    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature {
            public_key: self.public_key_bytes(),
            bytes: sig.to_bytes().to_vec(),
        }
    }

    /// Exports the raw secret key. Handle with care.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Clone for ValidatorKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for ValidatorKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorKeypair(address={})", self.address())
    }
}

// ---------------------------------------------------------------------------
// Signature
// ---------------------------------------------------------------------------

/// An Ed25519 signature together with the public key that produced it.
///
/// Stored as `Vec<u8>` for serde compatibility; a signature whose byte
/// length is not 64 simply fails verification.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// Signer's Ed25519 public key.
    pub public_key: [u8; 32],
    /// The 64 signature bytes.
    pub bytes: Vec<u8>,
}

impl Signature {
    /// Address of the key that claims to have produced this signature.
    ///
    /// The claim is only meaningful after [`verify`](Self::verify) succeeds.
    pub fn signer(&self) -> Address {
        address_from_public_key(&self.public_key)
    }

    /// Checks the signature over `message` against the embedded key.
    pub fn verify(&self, message: &[u8]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.public_key) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(self.bytes.as_slice()) else {
            return false;
        };
        verifying_key
            .verify(message, &DalekSignature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(signer={})", self.signer())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = ValidatorKeypair::generate();
        let sig = kp.sign(b"block 42");
        assert!(sig.verify(b"block 42"));
        assert!(!sig.verify(b"block 43"));
        assert_eq!(sig.signer(), kp.address());
    }

    #[test]
    fn tampered_signature_fails() {
        let kp = ValidatorKeypair::generate();
        let mut sig = kp.sign(b"payload");
        sig.bytes[0] ^= 0xFF;
        assert!(!sig.verify(b"payload"));

        sig.bytes.truncate(10);
        assert!(!sig.verify(b"payload"));
    }

    #[test]
    fn seeded_keys_are_stable() {
        let a = ValidatorKeypair::from_seed(&[7u8; 32]);
        let b = ValidatorKeypair::from_seed(&[7u8; 32]);
        assert_eq!(a.address(), b.address());

        let hex_key = hex::encode(a.secret_key_bytes());
        let c = ValidatorKeypair::from_hex(&hex_key).expect("valid key");
        assert_eq!(c.address(), a.address());
    }

    #[test]
    fn from_hex_rejects_garbage() {
        assert!(ValidatorKeypair::from_hex("zz").is_err());
        assert!(ValidatorKeypair::from_hex("abcd").is_err());
    }
}
