//! # In-Memory Chain
//!
//! A single node's replica of the devnet chain: the committed blocks and
//! the post-state of each of them.
//!
//! ## Block Pipeline
//!
//! Proposing, re-executing and committing all run the same five stages,
//! so a leader and its verifiers derive byte-identical headers:
//!
//! ```text
//! parent state ─► uptime ─► transfers ─► finalize ─► matrix ─► finalize
//! ```
//!
//! The state root commits to the "matrix" digest, which itself depends on
//! the first finalize's transaction root, hence the second finalize.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{DEVNET_GAS_LIMIT, DEVNET_TRANSFER_GAS, PROTOCOL_VERSION};
use crate::consensus::error::BackendError;
use crate::consensus::schedule::{
    BroadcastInterval, ConsensusStateReader, SpecialAccounts, ValidatorInfo,
};
use crate::consensus::timer::LeaderTimeConfig;
use crate::consensus::traits::ChainBackend;
use crate::crypto::hash::{blake3_concat, hash_encoded};
use crate::types::{
    compute_bloom, compute_receipt_root, compute_tx_root, Address, Block, BlockHeader, Hash,
    Receipt, Transaction,
};

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// Balance and next expected nonce of one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u64,
    pub nonce: u64,
}

/// Why a transfer left the state untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("nonce mismatch: expected {expected}, got {got}")]
    NonceMismatch { expected: u64, got: u64 },
}

/// Post-state of one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryState {
    pub accounts: BTreeMap<Address, Account>,
    /// Blocks led per validator.
    pub uptime: BTreeMap<Address, u64>,
    /// Running digest of derived consensus ("matrix") state.
    pub matrix_digest: Hash,
    pub topology: Vec<ValidatorInfo>,
    pub special_accounts: SpecialAccounts,
    pub time_config: LeaderTimeConfig,
    pub broadcast_interval: BroadcastInterval,
}

impl MemoryState {
    /// BLAKE3 commitment over accounts, uptime and the matrix digest.
    pub fn state_root(&self) -> Hash {
        hash_encoded(&(&self.accounts, &self.uptime, &self.matrix_digest))
    }

    pub fn account(&self, address: &Address) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.account(address).balance
    }

    /// Moves `tx.amount` from sender to receiver and bumps the sender's
    /// nonce. Leaves the state unchanged on error.
    pub fn apply_transfer(&mut self, tx: &Transaction) -> Result<(), TransferError> {
        let sender = self.account(&tx.from);
        if sender.nonce != tx.nonce {
            return Err(TransferError::NonceMismatch {
                expected: sender.nonce,
                got: tx.nonce,
            });
        }
        if sender.balance < tx.amount {
            return Err(TransferError::InsufficientBalance {
                have: sender.balance,
                need: tx.amount,
            });
        }
        let from = self.accounts.entry(tx.from).or_default();
        from.balance -= tx.amount;
        from.nonce += 1;
        let to = self.accounts.entry(tx.to).or_default();
        to.balance = to.balance.saturating_add(tx.amount);
        Ok(())
    }
}

impl ConsensusStateReader for MemoryState {
    fn topology_graph(&self) -> Option<Vec<ValidatorInfo>> {
        Some(self.topology.clone())
    }

    fn special_accounts(&self) -> Option<SpecialAccounts> {
        Some(self.special_accounts.clone())
    }

    fn leader_time_config(&self) -> Option<LeaderTimeConfig> {
        Some(self.time_config)
    }

    fn broadcast_interval(&self) -> Option<BroadcastInterval> {
        Some(self.broadcast_interval)
    }
}

// ---------------------------------------------------------------------------
// Genesis
// ---------------------------------------------------------------------------

/// Everything needed to build block 0.
#[derive(Debug, Clone)]
pub struct Genesis {
    pub time: i64,
    pub validators: Vec<ValidatorInfo>,
    pub broadcast: Address,
    pub time_config: LeaderTimeConfig,
    pub broadcast_interval: BroadcastInterval,
    pub balances: Vec<(Address, u64)>,
}

impl Genesis {
    fn state(&self) -> MemoryState {
        let accounts = self
            .balances
            .iter()
            .map(|(address, balance)| {
                (
                    *address,
                    Account {
                        balance: *balance,
                        nonce: 0,
                    },
                )
            })
            .collect();
        MemoryState {
            accounts,
            uptime: BTreeMap::new(),
            matrix_digest: Hash::ZERO,
            topology: self.validators.clone(),
            special_accounts: SpecialAccounts {
                broadcast: self.broadcast,
            },
            time_config: self.time_config,
            broadcast_interval: self.broadcast_interval,
        }
    }

    fn block(&self, state: &MemoryState) -> Block {
        let header = BlockHeader {
            height: 0,
            time: self.time,
            state_root: state.state_root(),
            gas_limit: DEVNET_GAS_LIMIT,
            version: PROTOCOL_VERSION.to_string(),
            net_topology: self.validators.iter().map(|v| v.address).collect(),
            ..BlockHeader::default()
        };
        Block {
            header,
            transactions: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryChain
// ---------------------------------------------------------------------------

struct ChainInner {
    blocks: Vec<Block>,
    head: Block,
    states: HashMap<Hash, MemoryState>,
}

/// Committed blocks and their post-states, behind one `RwLock`.
pub struct MemoryChain {
    inner: RwLock<ChainInner>,
}

impl MemoryChain {
    pub fn new(genesis: &Genesis) -> Self {
        let state = genesis.state();
        let block = genesis.block(&state);
        let mut states = HashMap::new();
        states.insert(block.hash(), state);
        Self {
            inner: RwLock::new(ChainInner {
                blocks: vec![block.clone()],
                head: block,
                states,
            }),
        }
    }

    pub fn head(&self) -> Block {
        self.inner.read().head.clone()
    }

    pub fn height(&self) -> u64 {
        self.inner.read().head.header.height
    }

    pub fn block_at(&self, height: u64) -> Option<Block> {
        let index = usize::try_from(height).ok()?;
        self.inner.read().blocks.get(index).cloned()
    }

    /// Post-state of the current head.
    pub fn head_state(&self) -> Result<MemoryState, BackendError> {
        let hash = self.head().hash();
        self.state_at(&hash)
    }

    /// Runs the block pipeline for `template` on top of its parent.
    ///
    /// Execution fields, signatures and the nonce of `template` are
    /// ignored and recomputed.
    pub fn build_block(
        &self,
        template: &BlockHeader,
        txs: &[Transaction],
    ) -> Result<(Block, Vec<Receipt>, MemoryState), BackendError> {
        let mut state = self.state_at(&template.parent_hash)?;
        let mut header = template.clone();
        header.gas_used = 0;
        header.signatures.clear();
        header.nonce = 0;

        self.process_uptime(&mut state, &header)?;
        let receipts = self.apply_transactions(&mut header, &mut state, txs)?;
        let block = self.finalize(&header, &mut state, txs, &receipts)?;
        self.process_auxiliary_state(&block, &mut state)?;
        let block = self.finalize(&block.header, &mut state, txs, &receipts)?;
        Ok((block, receipts, state))
    }

    /// Re-executes a finalized `header` and appends it as the new head.
    ///
    /// Returns `Ok(false)` when the height is already committed.
    pub fn commit(&self, header: &BlockHeader, txs: &[Transaction]) -> Result<bool, BackendError> {
        let head = self.head();
        if header.height <= head.header.height {
            debug!(height = header.height, "block already committed");
            return Ok(false);
        }
        if header.height != head.header.height + 1 || header.parent_hash != head.hash() {
            return Err(BackendError::UnknownState(header.parent_hash));
        }

        let (mut block, _, state) = self.build_block(header, txs)?;
        let expected = header.hash_no_sign_nonce();
        if block.hash() != expected {
            return Err(BackendError::Execution(format!(
                "local execution gives {}, finalized header is {}",
                block.hash().short(),
                expected.short()
            )));
        }
        block.header.signatures = header.signatures.clone();
        block.header.nonce = header.nonce;

        let hash = block.hash();
        let mut inner = self.inner.write();
        // Another task may have committed the same height meanwhile.
        if inner.head.header.height >= block.header.height {
            return Ok(false);
        }
        inner.states.insert(hash, state);
        inner.blocks.push(block.clone());
        inner.head = block;
        info!(
            height = header.height,
            hash = %hash.short(),
            txs = txs.len(),
            "block committed"
        );
        Ok(true)
    }
}

impl ChainBackend for MemoryChain {
    type State = MemoryState;

    fn state_at(&self, block_hash: &Hash) -> Result<MemoryState, BackendError> {
        self.inner
            .read()
            .states
            .get(block_hash)
            .cloned()
            .ok_or(BackendError::UnknownState(*block_hash))
    }

    fn verify_header(&self, header: &BlockHeader) -> Result<(), BackendError> {
        let inner = self.inner.read();
        let parent = inner
            .blocks
            .iter()
            .rev()
            .find(|b| b.hash() == header.parent_hash)
            .ok_or(BackendError::UnknownState(header.parent_hash))?;
        if header.height != parent.header.height + 1 {
            return Err(BackendError::InvalidHeader(format!(
                "height {} does not follow parent {}",
                header.height, parent.header.height
            )));
        }
        if header.time < parent.header.time {
            return Err(BackendError::InvalidHeader(format!(
                "time {} precedes parent time {}",
                header.time, parent.header.time
            )));
        }
        if header.gas_used > header.gas_limit {
            return Err(BackendError::InvalidHeader(format!(
                "gas used {} exceeds limit {}",
                header.gas_used, header.gas_limit
            )));
        }
        Ok(())
    }

    fn process_uptime(
        &self,
        state: &mut MemoryState,
        header: &BlockHeader,
    ) -> Result<(), BackendError> {
        *state.uptime.entry(header.leader).or_default() += 1;
        Ok(())
    }

    fn apply_transactions(
        &self,
        header: &mut BlockHeader,
        state: &mut MemoryState,
        txs: &[Transaction],
    ) -> Result<Vec<Receipt>, BackendError> {
        let mut receipts = Vec::with_capacity(txs.len());
        for tx in txs {
            let gas_used = header.gas_used.saturating_add(DEVNET_TRANSFER_GAS);
            if gas_used > header.gas_limit {
                return Err(BackendError::Execution(format!(
                    "block gas limit {} exceeded",
                    header.gas_limit
                )));
            }
            header.gas_used = gas_used;
            let success = match state.apply_transfer(tx) {
                Ok(()) => true,
                Err(e) => {
                    debug!(tx = %tx.code().short(), error = %e, "transfer failed");
                    false
                }
            };
            receipts.push(Receipt {
                tx_code: tx.code(),
                success,
                gas_used: DEVNET_TRANSFER_GAS,
            });
        }
        Ok(receipts)
    }

    fn finalize(
        &self,
        header: &BlockHeader,
        state: &mut MemoryState,
        txs: &[Transaction],
        receipts: &[Receipt],
    ) -> Result<Block, BackendError> {
        let mut header = header.clone();
        header.tx_root = compute_tx_root(txs);
        header.receipt_root = compute_receipt_root(receipts);
        header.bloom = compute_bloom(receipts);
        header.state_root = state.state_root();
        Ok(Block {
            header,
            transactions: txs.to_vec(),
        })
    }

    fn process_auxiliary_state(
        &self,
        block: &Block,
        state: &mut MemoryState,
    ) -> Result<(), BackendError> {
        state.matrix_digest = blake3_concat(&[
            state.matrix_digest.as_bytes(),
            block.header.tx_root.as_bytes(),
            &block.header.height.to_le_bytes(),
        ]);
        Ok(())
    }
}
