//! # Local Devnet
//!
//! In-memory implementations of every collaborator seam, and a harness
//! that runs several validators in one process over a [`LocalNetwork`].
//!
//! - [`chain`]: per-node chain replica and execution backend.
//! - [`clock`]: the shared Unix-seconds clock, driven by tokio time.
//! - [`txpool`]: shared transaction pool, also the transaction source.
//! - [`dpos`]: stake-weighted quorum and a permissive topology policy.
//! - [`network`]: role-routed message bus and keypair signing.
//! - [`node`]: the validator event loop.
//!
//! Validator keys are derived from fixed seeds, so every devnet with the
//! same size has the same validator set.

pub mod chain;
pub mod clock;
pub mod dpos;
pub mod network;
pub mod node;
pub mod txpool;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::consensus::role::Role;
use crate::consensus::schedule::{BroadcastInterval, ValidatorInfo};
use crate::consensus::timer::LeaderTimeConfig;
use crate::consensus::traits::EventSink;
use crate::crypto::keys::ValidatorKeypair;
use crate::types::Address;

pub use chain::{Account, Genesis, MemoryChain, MemoryState, TransferError};
pub use clock::DevnetClock;
pub use dpos::{PermissiveTopology, StakeDpos};
pub use network::{KeypairSigner, LocalNetwork, NetworkHandle};
pub use node::{DevnetError, DevnetNode, NodeOptions};
pub use txpool::MemoryTxPool;

/// Devnet shape and timing.
#[derive(Debug, Clone)]
pub struct DevnetConfig {
    pub validators: usize,
    pub stake: u64,
    pub time_config: LeaderTimeConfig,
    pub node: NodeOptions,
    /// Genesis balances.
    pub balances: Vec<(Address, u64)>,
    /// Defaults to the current time.
    pub genesis_time: Option<i64>,
}

impl Default for DevnetConfig {
    fn default() -> Self {
        Self {
            validators: 4,
            stake: 100,
            time_config: LeaderTimeConfig::default(),
            node: NodeOptions::default(),
            balances: Vec::new(),
            genesis_time: None,
        }
    }
}

/// Deterministic keypair of validator `index`.
pub fn validator_keypair(index: usize) -> ValidatorKeypair {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(&(index as u64 + 1).to_le_bytes());
    seed[8..16].copy_from_slice(b"strata-v");
    ValidatorKeypair::from_seed(&seed)
}

/// A set of in-process validators sharing a network and a transaction
/// pool. Each node keeps its own chain replica.
pub struct Devnet {
    keypairs: Vec<ValidatorKeypair>,
    chains: Vec<Arc<MemoryChain>>,
    pool: Arc<MemoryTxPool>,
    network: Arc<LocalNetwork>,
    clock: DevnetClock,
    options: NodeOptions,
    shutdown: watch::Sender<bool>,
    running: Vec<(usize, JoinHandle<Result<(), DevnetError>>)>,
}

impl Devnet {
    pub fn new(config: DevnetConfig) -> Self {
        Self::with_pool(config, Arc::new(MemoryTxPool::new()))
    }

    pub fn with_pool(config: DevnetConfig, pool: Arc<MemoryTxPool>) -> Self {
        let keypairs: Vec<ValidatorKeypair> =
            (0..config.validators).map(validator_keypair).collect();
        let clock = DevnetClock::new();
        let genesis = Genesis {
            time: config.genesis_time.unwrap_or_else(|| clock.now()),
            validators: keypairs
                .iter()
                .map(|kp| ValidatorInfo {
                    address: kp.address(),
                    stake: config.stake,
                    role: Role::Validator,
                })
                .collect(),
            broadcast: Address::ZERO,
            time_config: config.time_config,
            broadcast_interval: BroadcastInterval {
                interval: 0,
                last_broadcast_number: 0,
            },
            balances: config.balances,
        };
        let chains = keypairs
            .iter()
            .map(|_| Arc::new(MemoryChain::new(&genesis)))
            .collect();
        let (shutdown, _) = watch::channel(false);
        Self {
            keypairs,
            chains,
            pool,
            network: LocalNetwork::new(),
            clock,
            options: config.node,
            shutdown,
            running: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keypairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypairs.is_empty()
    }

    pub fn address(&self, index: usize) -> Option<Address> {
        self.keypairs.get(index).map(ValidatorKeypair::address)
    }

    pub fn chain(&self, index: usize) -> Option<&Arc<MemoryChain>> {
        self.chains.get(index)
    }

    pub fn pool(&self) -> &Arc<MemoryTxPool> {
        &self.pool
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    pub fn clock(&self) -> DevnetClock {
        self.clock
    }

    /// Starts validator `index`, optionally reporting its events to
    /// `observer`. Must be called from within a tokio runtime.
    pub fn spawn_node(&mut self, index: usize, observer: Option<Arc<dyn EventSink>>) -> bool {
        let (Some(keypair), Some(chain)) = (self.keypairs.get(index), self.chains.get(index))
        else {
            return false;
        };
        let mut node = DevnetNode::new(
            keypair.clone(),
            Arc::clone(chain),
            Arc::clone(&self.pool),
            Arc::clone(&self.network),
        )
        .with_options(self.options)
        .with_clock(self.clock);
        if let Some(observer) = observer {
            node = node.with_observer(observer);
        }
        let handle = tokio::spawn(node.run(self.shutdown.subscribe()));
        self.running.push((index, handle));
        true
    }

    /// Starts every validator not listed in `offline`. The first node
    /// started reports to `observer`.
    pub fn spawn_all(&mut self, offline: &[usize], mut observer: Option<Arc<dyn EventSink>>) {
        for index in 0..self.len() {
            if offline.contains(&index) {
                continue;
            }
            self.spawn_node(index, observer.take());
        }
        info!(
            validators = self.len(),
            running = self.running.len(),
            "devnet started"
        );
    }

    /// Heights of the running nodes' chains.
    pub fn running_heights(&self) -> Vec<u64> {
        self.running
            .iter()
            .filter_map(|(index, _)| self.chains.get(*index))
            .map(|chain| chain.height())
            .collect()
    }

    /// Polls until every running node has reached `height`.
    pub async fn wait_for_height(&self, height: u64, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let heights = self.running_heights();
            if !heights.is_empty() && heights.iter().all(|h| *h >= height) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Signals shutdown and waits for every node.
    pub async fn shutdown(mut self) {
        // Send fails only when no node subscribed.
        let _ = self.shutdown.send(true);
        for (index, handle) in self.running.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(index, error = %e, "devnet node failed"),
                Err(e) => warn!(index, error = %e, "devnet node panicked"),
            }
        }
    }
}
