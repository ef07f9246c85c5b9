//! # Collaborator Seams
//!
//! The consensus core decides *whose* block is legitimate and *when* it is
//! final. Everything else (execution, storage, the quorum formula,
//! transport) sits behind these traits.
//!
//! ```text
//!                      ┌─────────────────────┐
//!  ChainBackend      ◄─┤                     ├─► PeerMessenger
//!  DposEngine        ◄─┤ VerificationProcess ├─► EventSink
//!  TransactionSource ◄─┤                     ├─► SigningService
//!  TopologyValidator ◄─┤                     │
//!                      └─────────────────────┘
//! ```
//!
//! Only [`TransactionSource`] is async: it is the one collaborator the core
//! waits on, and it does so outside its lock.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::{BackendError, DposError, FetchError, SignError, TopologyError};
use super::messages::{ConsensusEvent, ConsensusMessage};
use super::role::RoleMask;
use super::schedule::ConsensusStateReader;
use super::votes::Vote;
use crate::crypto::keys::Signature;
use crate::types::{Address, Block, BlockHeader, Hash, Receipt, Transaction, TxCode};

/// Chain reader and execution engine.
///
/// `State` is a private, owned copy of the post-state of some block.
/// Re-execution mutates it on a blocking worker, so it must be cheap
/// enough to clone once per verification.
pub trait ChainBackend: Send + Sync + 'static {
    type State: ConsensusStateReader + Clone + Send + Sync + 'static;

    /// Post-state of the block with the given hash.
    fn state_at(&self, block_hash: &Hash) -> Result<Self::State, BackendError>;

    /// Structural header checks against the local chain.
    fn verify_header(&self, header: &BlockHeader) -> Result<(), BackendError>;

    /// Applies per-height liveness bookkeeping.
    fn process_uptime(
        &self,
        state: &mut Self::State,
        header: &BlockHeader,
    ) -> Result<(), BackendError>;

    /// Executes `txs` in order, accumulating `header.gas_used`.
    fn apply_transactions(
        &self,
        header: &mut BlockHeader,
        state: &mut Self::State,
        txs: &[Transaction],
    ) -> Result<Vec<Receipt>, BackendError>;

    /// Fills the header's commitment fields from the state and results.
    fn finalize(
        &self,
        header: &BlockHeader,
        state: &mut Self::State,
        txs: &[Transaction],
        receipts: &[Receipt],
    ) -> Result<Block, BackendError>;

    /// Folds derived consensus ("matrix") state of `block` into `state`.
    fn process_auxiliary_state(
        &self,
        block: &Block,
        state: &mut Self::State,
    ) -> Result<(), BackendError>;
}

/// DPOS engine: version policy and the weighted quorum rule.
pub trait DposEngine: Send + Sync {
    fn verify_version(&self, header: &BlockHeader) -> Result<(), DposError>;

    /// Returns the accepted signatures when `votes` reach quorum for the
    /// height whose parent is `parent_hash`.
    fn verify_weighted_signatures(
        &self,
        votes: &[Vote],
        parent_hash: &Hash,
    ) -> Result<Vec<Signature>, DposError>;
}

/// A fetched transaction set, tagged with the caller's sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedTxs {
    pub seq: u64,
    pub txs: Vec<Transaction>,
}

/// Supplies the transactions a proposal references.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    async fn fetch_by_reference(
        &self,
        codes: &[TxCode],
        seq: u64,
        leader: Address,
    ) -> Result<FetchedTxs, FetchError>;
}

/// Topology, VRF and election checks over state type `S`.
pub trait TopologyValidator<S>: Send + Sync {
    fn verify_net_topology(&self, header: &BlockHeader, votes: &[Vote])
        -> Result<(), TopologyError>;

    fn verify_vrf(&self, header: &BlockHeader) -> Result<(), TopologyError>;

    fn verify_election_result(&self, header: &BlockHeader, state: &S)
        -> Result<(), TopologyError>;
}

/// Signs and checks consensus signatures. The parent hash is mixed into
/// every signed message so a vote cannot be replayed on another fork.
pub trait SigningService: Send + Sync {
    /// Account this service signs for.
    fn address(&self) -> Address;

    fn sign_with_context(&self, hash: &Hash, parent_hash: &Hash) -> Result<Signature, SignError>;

    /// Returns the signer's address and whether the signature is valid.
    fn verify_signature(
        &self,
        hash: &Hash,
        signature: &Signature,
        parent_hash: &Hash,
    ) -> (Address, bool);
}

/// Outbound peer transport.
pub trait PeerMessenger: Send + Sync {
    fn send_to_role(&self, message: ConsensusMessage, roles: RoleMask);
}

/// Receiver of published consensus events.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ConsensusEvent);
}

impl EventSink for mpsc::UnboundedSender<ConsensusEvent> {
    fn publish(&self, event: ConsensusEvent) {
        // A closed receiver means the node is shutting down.
        let _ = self.send(event);
    }
}

/// Every collaborator a verification process needs.
pub struct Collaborators<B: ChainBackend> {
    pub chain: Arc<B>,
    pub dpos: Arc<dyn DposEngine>,
    pub txs: Arc<dyn TransactionSource>,
    pub topology: Arc<dyn TopologyValidator<B::State>>,
    pub signer: Arc<dyn SigningService>,
    pub messenger: Arc<dyn PeerMessenger>,
    pub events: Arc<dyn EventSink>,
}

impl<B: ChainBackend> Clone for Collaborators<B> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            dpos: Arc::clone(&self.dpos),
            txs: Arc::clone(&self.txs),
            topology: Arc::clone(&self.topology),
            signer: Arc::clone(&self.signer),
            messenger: Arc::clone(&self.messenger),
            events: Arc::clone(&self.events),
        }
    }
}
