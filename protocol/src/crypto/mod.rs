//! # Cryptographic Primitives
//!
//! Thin wrappers over audited implementations:
//!
//! - **Ed25519** (`ed25519-dalek`) for validator signatures.
//! - **BLAKE3** for every hash the consensus core computes.
//!
//! Nothing in here is clever, and it should stay that way.

pub mod hash;
pub mod keys;

pub use hash::{blake3_concat, blake3_hash, hash_encoded, merkle_root, signing_message};
pub use keys::{address_from_public_key, KeyError, Signature, ValidatorKeypair};
