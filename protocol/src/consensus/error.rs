//! Error types of the consensus core and its collaborator seams.
//!
//! None of these escape the public surface of a
//! [`VerificationProcess`](super::process::VerificationProcess): they are
//! either absorbed with a log line or folded into a
//! [`LocalVerifyResult`](super::proposal::LocalVerifyResult).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Address, Hash, TxCode};

/// Failures that stop a height's leader schedule from being evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    /// A required value is absent from the parent state snapshot.
    #[error("missing consensus config in state: {0}")]
    MissingConfig(&'static str),

    /// A leader timing value is zero or negative.
    #[error("invalid leader time config: {field} = {value}")]
    InvalidTimeConfig { field: &'static str, value: i64 },

    /// The schedule cannot name a leader (empty validator set).
    #[error("leader lookup failed: {0}")]
    LeaderLookup(String),
}

/// A timestamp that does not belong to the turn it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("time {time} outside turn window ({begin}, {end})")]
pub struct TimeOutOfWindow {
    pub time: i64,
    pub begin: i64,
    pub end: i64,
}

/// Errors reported by the chain/state backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("no state for block {0}")]
    UnknownState(Hash),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("execution failed: {0}")]
    Execution(String),
}

/// Errors from the transaction source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transaction {0} not available")]
    Missing(TxCode),

    #[error("transaction fetch timed out")]
    Timeout,

    #[error("fetch result tagged {got}, expected {expected}")]
    StaleSequence { expected: u64, got: u64 },

    #[error("transaction source failure: {0}")]
    Source(String),
}

/// The signing service could not produce a signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signing failed: {0}")]
pub struct SignError(pub String);

/// Errors from the DPOS engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DposError {
    #[error("unsupported header version {0:?}")]
    Version(String),

    #[error("insufficient stake: {have} of {total}")]
    InsufficientStake { have: u64, total: u64 },

    #[error("signature from unknown validator {0}")]
    UnknownSigner(Address),
}

/// Errors from the topology/election validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("net topology mismatch: {0}")]
    Topology(String),

    #[error("invalid vrf: {0}")]
    Vrf(String),

    #[error("election result mismatch: {0}")]
    Election(String),
}
