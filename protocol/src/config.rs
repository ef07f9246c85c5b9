//! # Protocol Configuration & Constants
//!
//! Every tunable of the consensus core lives here. Values that must agree
//! across validators (leader timings, broadcast interval) are read from
//! chain state at each parent block; the defaults below only seed the
//! devnet genesis. Values that are purely local (resend cadence, fetch
//! timeout, buffer bounds) are collected in [`VerifierConfig`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Version string leaders stamp into headers. The DPOS engine rejects
/// headers built under any other version.
pub const PROTOCOL_VERSION: &str = "1.0.0";

// ---------------------------------------------------------------------------
// Leader Timing (seconds, seeded into genesis state)
// ---------------------------------------------------------------------------

/// Extra time the turn-0 leader gets on top of the POS window, covering
/// the time it takes to mine the parent block.
pub const DEFAULT_PARENT_MINING_TIME: i64 = 20;

/// Length of the primary POS window.
pub const DEFAULT_POS_OUT_TIME: i64 = 20;

/// Length of each reelection window.
pub const DEFAULT_REELECT_OUT_TIME: i64 = 40;

/// How often the leader service re-evaluates the turn timer.
pub const DEFAULT_REELECT_HANDLE_INTERVAL: i64 = 3;

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Hard deadline for fetching a proposal's transactions.
pub const TXS_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Votes are re-sent this often until the phase that produced them ends.
pub const VOTE_RESEND_INTERVAL: Duration = Duration::from_secs(3);
pub const VOTE_RESEND_MAX_ATTEMPTS: u32 = 10;

/// Leaders re-send their consensus request on the same cadence as votes.
pub const REQUEST_RESEND_INTERVAL: Duration = Duration::from_secs(3);
pub const REQUEST_RESEND_MAX_ATTEMPTS: u32 = 10;

/// Mining requests are retried more aggressively: a lost one stalls the
/// chain.
pub const MINING_RESEND_INTERVAL: Duration = Duration::from_secs(2);
pub const MINING_RESEND_MAX_ATTEMPTS: u32 = 30;

pub const POSED_RESEND_INTERVAL: Duration = Duration::from_secs(5);
pub const POSED_RESEND_MAX_ATTEMPTS: u32 = 10;

/// Early votes kept per endorsed hash.
pub const UNVERIFIED_VOTES_PER_HASH: usize = 64;

/// Distinct hashes the early-vote pool tracks before evicting the oldest.
pub const UNVERIFIED_VOTE_HASHES: usize = 32;

/// Remote proposals one height keeps, across all leaders and turns.
pub const MAX_PROPOSALS_PER_HEIGHT: usize = 64;

/// Polling delay while a transaction source keeps answering for another
/// fetch sequence.
pub const STALE_FETCH_RETRY: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Devnet
// ---------------------------------------------------------------------------

/// Gas limit stamped into devnet headers.
pub const DEVNET_GAS_LIMIT: u64 = 10_000_000;

/// Flat gas charge per devnet transfer.
pub const DEVNET_TRANSFER_GAS: u64 = 21_000;

/// Upper bound on transactions a devnet leader packs into one block.
pub const DEVNET_MAX_BLOCK_TXS: usize = 500;

/// Seconds a devnet leader waits after its parent block before proposing.
pub const DEVNET_BLOCK_INTERVAL: i64 = 1;

// ---------------------------------------------------------------------------
// VerifierConfig
// ---------------------------------------------------------------------------

/// Resend cadence for one kind of outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResendPolicy {
    /// Delay between attempts, in milliseconds.
    pub interval_ms: u64,
    /// Total attempts, the immediate first send included.
    pub max_attempts: u32,
}

impl ResendPolicy {
    fn from_parts(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            max_attempts,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Local tunables of a verification process.
///
/// None of these affect what the network agrees on, so nodes may run with
/// different values. Shorter resend intervals trade bandwidth for latency;
/// a shorter fetch timeout makes slow peers abstain sooner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Deadline for the transaction fetch, in milliseconds.
    pub txs_fetch_timeout_ms: u64,
    pub vote_resend: ResendPolicy,
    pub request_resend: ResendPolicy,
    pub mining_resend: ResendPolicy,
    pub posed_resend: ResendPolicy,
    pub unverified_votes_per_hash: usize,
    pub unverified_vote_hashes: usize,
    pub max_proposals_per_height: usize,
}

impl VerifierConfig {
    pub fn txs_fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.txs_fetch_timeout_ms)
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            txs_fetch_timeout_ms: TXS_FETCH_TIMEOUT.as_millis() as u64,
            vote_resend: ResendPolicy::from_parts(VOTE_RESEND_INTERVAL, VOTE_RESEND_MAX_ATTEMPTS),
            request_resend: ResendPolicy::from_parts(
                REQUEST_RESEND_INTERVAL,
                REQUEST_RESEND_MAX_ATTEMPTS,
            ),
            mining_resend: ResendPolicy::from_parts(
                MINING_RESEND_INTERVAL,
                MINING_RESEND_MAX_ATTEMPTS,
            ),
            posed_resend: ResendPolicy::from_parts(
                POSED_RESEND_INTERVAL,
                POSED_RESEND_MAX_ATTEMPTS,
            ),
            unverified_votes_per_hash: UNVERIFIED_VOTES_PER_HASH,
            unverified_vote_hashes: UNVERIFIED_VOTE_HASHES,
            max_proposals_per_height: MAX_PROPOSALS_PER_HEIGHT,
        }
    }
}
