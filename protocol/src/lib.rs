// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strata Protocol: Consensus Core
//!
//! Block-proposal consensus for a DPOS chain: who may propose the next
//! block, how validators check a proposal, and when enough stake has
//! endorsed it.
//!
//! ## Architecture
//!
//! - **types**: Hashes, addresses, consensus turns, headers and blocks.
//! - **crypto**: Ed25519 validator keys and BLAKE3 hashing.
//! - **consensus**: Turn timing, leader rotation, resend loops, vote
//!   ledgers and the per-height verification state machine.
//! - **devnet**: In-memory chain, pool, quorum engine and transport for
//!   running several validators in one process.
//! - **config**: Protocol constants and verifier tunables.
//!
//! The core never executes transactions or touches the network itself.
//! Everything outside the consensus decision sits behind the traits in
//! [`consensus::traits`].

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod devnet;
pub mod types;
