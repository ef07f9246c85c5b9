//! # Proposals
//!
//! A proposal is one candidate block for a height, together with
//! everything the verification process learns about it: the fetched
//! transactions, the re-executed state, the local verdict and the votes.
//!
//! The local verdict is a closed three-way classification:
//!
//! | Verdict          | Self-vote | Observes quorum | Operator alert |
//! |------------------|-----------|-----------------|----------------|
//! | `Success`        | yes       | yes             | no             |
//! | `Recoverable`    | no        | yes             | no             |
//! | `StateFailure`   | no        | yes             | yes            |

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::TimeOutOfWindow;
use super::messages::{ConsensusRequest, LocalProposal};
use super::votes::VoteLedger;
use crate::config::MAX_PROPOSALS_PER_HEIGHT;
use crate::types::{
    Address, BlockHeader, ConsensusTurn, Hash, HeaderField, Receipt, Transaction, TxCode,
};

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Why a proposal was not endorsed, without implying local divergence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoverableReason {
    InvalidHeader(String),
    TopologyMismatch(String),
    VersionMismatch(String),
    InvalidVrf(String),
    FetchTimeout,
    FetchFailed(String),
    StateUnavailable(String),
}

/// Irreconcilable divergence. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateFailureReason {
    TimestampOutOfWindow(TimeOutOfWindow),
    Execution(String),
    ElectionMismatch(String),
    HashMismatch {
        expected: Hash,
        computed: Hash,
        fields: Vec<HeaderField>,
    },
}

impl fmt::Display for StateFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimestampOutOfWindow(e) => write!(f, "{e}"),
            Self::Execution(e) => write!(f, "execution failed: {e}"),
            Self::ElectionMismatch(e) => write!(f, "election result mismatch: {e}"),
            Self::HashMismatch {
                expected,
                computed,
                fields,
            } => {
                let names: Vec<String> = fields.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "hash mismatch: expected {}, computed {}, fields [{}]",
                    expected.short(),
                    computed.short(),
                    names.join(", ")
                )
            }
        }
    }
}

/// Outcome of local verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalVerifyResult {
    Success,
    Recoverable(RecoverableReason),
    StateFailure(StateFailureReason),
}

impl LocalVerifyResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

// ---------------------------------------------------------------------------
// Proposal
// ---------------------------------------------------------------------------

/// One candidate block and its verification state. `S` is the backend's
/// state type.
#[derive(Debug, Clone)]
pub struct Proposal<S> {
    pub header: BlockHeader,
    pub tx_codes: Vec<TxCode>,
    pub consensus_turn: ConsensusTurn,
    pub origin: Address,
    /// Header hash excluding signatures and nonce.
    pub hash: Hash,
    pub votes: VoteLedger,
    pub txs: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
    /// Post-state from local re-execution.
    pub state: Option<S>,
    /// `None` while verification is in flight.
    pub local_verify_result: Option<LocalVerifyResult>,
    pub pos_finished: bool,
    /// Built by this node. Skips local re-verification.
    pub is_local: bool,
}

impl<S> Proposal<S> {
    pub fn from_request(request: ConsensusRequest) -> Self {
        let hash = request.hash();
        Self {
            header: request.header,
            tx_codes: request.tx_codes,
            consensus_turn: request.consensus_turn,
            origin: request.from,
            hash,
            votes: VoteLedger::new(),
            txs: Vec::new(),
            receipts: Vec::new(),
            state: None,
            local_verify_result: None,
            pos_finished: false,
            is_local: false,
        }
    }

    pub fn from_local(local: LocalProposal) -> Self {
        let mut proposal = Self::from_request(local.request);
        proposal.txs = local.txs;
        proposal.receipts = local.receipts;
        proposal.is_local = true;
        proposal
    }

    /// Cache key: the leader and the turn it proposed under.
    pub fn key(&self) -> ProposalKey {
        (self.header.leader, self.consensus_turn)
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }
}

/// `(leader, consensus turn)`.
pub type ProposalKey = (Address, ConsensusTurn);

// ---------------------------------------------------------------------------
// ProposalCache
// ---------------------------------------------------------------------------

/// What happened when a proposal was offered to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheInsert {
    Inserted,
    /// A local proposal replaced a remote one under the same key.
    Replaced,
    /// Same hash already cached; the existing entry is kept.
    Duplicate,
    /// A local proposal holds the key and a remote one cannot displace it.
    Rejected,
    /// Another remote proposal already holds the key. The first one wins.
    Conflict,
    /// The height already holds its maximum of remote proposals.
    Full,
}

/// Proposals of one height, keyed by `(leader, consensus turn)`.
///
/// Holds at most `capacity` remote proposals. Local proposals are always
/// admitted.
#[derive(Debug, Clone)]
pub struct ProposalCache<S> {
    entries: HashMap<ProposalKey, Proposal<S>>,
    capacity: usize,
}

impl<S> Default for ProposalCache<S> {
    fn default() -> Self {
        Self::new(MAX_PROPOSALS_PER_HEIGHT)
    }
}

impl<S> ProposalCache<S> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Offers a proposal. A local proposal overrides a remote one; a remote
    /// proposal never displaces anything already cached.
    pub fn insert(&mut self, proposal: Proposal<S>) -> CacheInsert {
        let key = proposal.key();
        match self.entries.get(&key) {
            None if !proposal.is_local && self.remote_len() >= self.capacity => CacheInsert::Full,
            None => {
                self.entries.insert(key, proposal);
                CacheInsert::Inserted
            }
            Some(existing) if existing.hash == proposal.hash && existing.is_local == proposal.is_local => {
                CacheInsert::Duplicate
            }
            Some(existing) if existing.is_local => CacheInsert::Rejected,
            Some(_) if !proposal.is_local => CacheInsert::Conflict,
            Some(_) => {
                self.entries.insert(key, proposal);
                CacheInsert::Replaced
            }
        }
    }

    fn remote_len(&self) -> usize {
        self.entries.values().filter(|p| !p.is_local).count()
    }

    pub fn get(&self, key: &ProposalKey) -> Option<&Proposal<S>> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &ProposalKey) -> Option<&mut Proposal<S>> {
        self.entries.get_mut(key)
    }

    pub fn remove(&mut self, key: &ProposalKey) -> Option<Proposal<S>> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> Vec<ProposalKey> {
        self.entries.keys().copied().collect()
    }

    pub fn key_of(&self, hash: &Hash) -> Option<ProposalKey> {
        self.entries
            .iter()
            .find(|(_, p)| p.hash == *hash)
            .map(|(k, _)| *k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
