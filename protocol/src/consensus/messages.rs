//! Messages exchanged between consensus peers, and events the core
//! publishes to the rest of the node.

use serde::{Deserialize, Serialize};

use super::proposal::StateFailureReason;
use super::schedule::LeaderChangeNotice;
use crate::crypto::keys::Signature;
use crate::types::{Address, BlockHeader, ConsensusTurn, Hash, Receipt, Transaction, TxCode};

// ---------------------------------------------------------------------------
// Peer messages
// ---------------------------------------------------------------------------

/// A leader's proposal as it travels over the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusRequest {
    pub header: BlockHeader,
    pub tx_codes: Vec<TxCode>,
    pub consensus_turn: ConsensusTurn,
    /// Peer that sent the request. Must be the header's leader.
    pub from: Address,
}

impl ConsensusRequest {
    pub fn hash(&self) -> Hash {
        self.header.hash_no_sign_nonce()
    }
}

/// The local leader's own proposal, handed over together with the
/// execution results it already has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalProposal {
    pub request: ConsensusRequest,
    pub txs: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
}

/// A validator's endorsement of a proposal hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteMessage {
    pub height: u64,
    pub sign_hash: Hash,
    pub signature: Signature,
    /// Claimed signer. Checked against the signature before counting.
    pub from: Address,
}

/// A peer's already-accumulated signature set for a header, used to
/// fast-forward a node that missed the vote round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryMessage {
    /// Header carrying the trusted signatures in `signatures`.
    pub header: BlockHeader,
    pub from: Address,
}

impl RecoveryMessage {
    pub fn hash(&self) -> Hash {
        self.header.hash_no_sign_nonce()
    }
}

/// Finalized header handed to miners for sealing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiningRequest {
    /// Header with the quorum signatures attached.
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

/// Finalized proposal forwarded to the broadcast node, signed by the
/// forwarding validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosedRequest {
    pub header: BlockHeader,
    pub tx_codes: Vec<TxCode>,
    pub consensus_turn: ConsensusTurn,
    pub origin: Address,
    pub signature: Signature,
}

/// Everything a node sends to its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Request(ConsensusRequest),
    Vote(VoteMessage),
    Recovery(RecoveryMessage),
    Mining(MiningRequest),
    Posed(PosedRequest),
}

impl ConsensusMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Vote(_) => "vote",
            Self::Recovery(_) => "recovery",
            Self::Mining(_) => "mining",
            Self::Posed(_) => "posed",
        }
    }
}

// ---------------------------------------------------------------------------
// Published events
// ---------------------------------------------------------------------------

/// Local POS for a height is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPosFinishedNotify {
    pub height: u64,
    pub header: BlockHeader,
    pub consensus_turn: ConsensusTurn,
    pub tx_codes: Vec<TxCode>,
    /// `true` when this node verified the block itself before quorum.
    pub verified: bool,
}

/// Irreconcilable divergence between local execution and a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFailureAlert {
    pub height: u64,
    pub hash: Hash,
    pub leader: Address,
    pub reason: StateFailureReason,
}

/// Events the consensus core publishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusEvent {
    LeaderChanged(LeaderChangeNotice),
    PosFinished(BlockPosFinishedNotify),
    StateFailure(StateFailureAlert),
    /// A finalized block was committed to the local chain.
    BlockCommitted { height: u64, hash: Hash, txs: usize },
}
