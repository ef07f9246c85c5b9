//! # Devnet Node
//!
//! One validator wired end to end: a [`LeaderService`] for rotation, a
//! [`BlockVerifier`] for proposals and votes, a trivial proposer and a
//! commit path into its own [`MemoryChain`] replica.
//!
//! A leader proposes no earlier than [`DEVNET_BLOCK_INTERVAL`] seconds after
//! its parent block; until then it retries on every tick.
//!
//! ## Event Loop
//!
//! ```text
//!   peer messages ──► verifier inbox (requests, votes, recovery)
//!                 ├─► commit          (mining requests)
//!                 └─► recovery reply  (requests, votes for committed heights)
//!   local events  ──► commit          (POS finished)
//!   clock tick    ──► LeaderService::on_tick ─► auto-confirm reelection
//!                 └─► deferred proposal
//!   commit        ──► next height: StartRunning + leader notice (+ propose)
//! ```
//!
//! Reelections are confirmed as soon as they are observed. The devnet has
//! no separate reelection vote.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{
    VerifierConfig, DEVNET_BLOCK_INTERVAL, DEVNET_GAS_LIMIT, DEVNET_MAX_BLOCK_TXS,
    DEVNET_TRANSFER_GAS, PROTOCOL_VERSION,
};
use crate::consensus::error::BackendError;
use crate::consensus::leader_service::LeaderService;
use crate::consensus::manager::{BlockVerifier, VerifierInput};
use crate::consensus::messages::{
    ConsensusEvent, ConsensusMessage, ConsensusRequest, LocalProposal, RecoveryMessage,
};
use crate::consensus::resend::ResendController;
use crate::consensus::role::RoleMask;
use crate::consensus::schedule::LeaderChangeNotice;
use crate::consensus::traits::{ChainBackend, Collaborators, EventSink, PeerMessenger};
use crate::crypto::keys::ValidatorKeypair;
use crate::types::{Address, BlockHeader, ConsensusTurn, Transaction};

use super::chain::MemoryChain;
use super::clock::DevnetClock;
use super::dpos::{PermissiveTopology, StakeDpos};
use super::network::{KeypairSigner, LocalNetwork, NetworkHandle};
use super::txpool::MemoryTxPool;

/// Fatal node errors. Everything else is logged and absorbed.
#[derive(Debug, Error)]
pub enum DevnetError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("block verifier stopped")]
    VerifierClosed,
}

/// Per-node tunables.
#[derive(Debug, Clone, Copy)]
pub struct NodeOptions {
    pub verifier: VerifierConfig,
    pub max_block_txs: usize,
    pub inbox_capacity: usize,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            verifier: VerifierConfig::default(),
            max_block_txs: DEVNET_MAX_BLOCK_TXS,
            inbox_capacity: 1024,
        }
    }
}

/// Forwards events to the node loop and to an optional observer.
struct EventTap {
    local: mpsc::UnboundedSender<ConsensusEvent>,
    observer: Option<Arc<dyn EventSink>>,
}

impl EventSink for EventTap {
    fn publish(&self, event: ConsensusEvent) {
        if let Some(observer) = &self.observer {
            observer.publish(event.clone());
        }
        self.local.publish(event);
    }
}

// ---------------------------------------------------------------------------
// DevnetNode
// ---------------------------------------------------------------------------

pub struct DevnetNode {
    address: Address,
    signer: Arc<KeypairSigner>,
    chain: Arc<MemoryChain>,
    pool: Arc<MemoryTxPool>,
    network: Arc<LocalNetwork>,
    messages: mpsc::UnboundedReceiver<ConsensusMessage>,
    observer: Option<Arc<dyn EventSink>>,
    options: NodeOptions,
    clock: DevnetClock,
}

impl DevnetNode {
    /// Creates the node and joins the network as validator and miner.
    pub fn new(
        keypair: ValidatorKeypair,
        chain: Arc<MemoryChain>,
        pool: Arc<MemoryTxPool>,
        network: Arc<LocalNetwork>,
    ) -> Self {
        let address = keypair.address();
        let messages = network.join(address, RoleMask::VALIDATOR | RoleMask::MINER);
        Self {
            address,
            signer: Arc::new(KeypairSigner::new(keypair)),
            chain,
            pool,
            network,
            messages,
            observer: None,
            options: NodeOptions::default(),
            clock: DevnetClock::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn EventSink>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_options(mut self, options: NodeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_clock(mut self, clock: DevnetClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn chain(&self) -> &Arc<MemoryChain> {
        &self.chain
    }

    /// Runs the node until `shutdown` flips to `true`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DevnetError> {
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let sink: Arc<dyn EventSink> = Arc::new(EventTap {
            local: event_tx,
            observer: self.observer.clone(),
        });

        let genesis = self.chain.head_state()?;
        let messenger = Arc::new(self.network.messenger(self.address));
        let collab = Collaborators {
            chain: Arc::clone(&self.chain),
            dpos: Arc::new(StakeDpos::new(&genesis.topology)),
            txs: self.pool.clone(),
            topology: Arc::new(PermissiveTopology),
            signer: self.signer.clone(),
            messenger: messenger.clone(),
            events: Arc::clone(&sink),
        };
        let (verifier, inbox) = BlockVerifier::new(
            collab,
            self.options.verifier,
            self.options.inbox_capacity,
        );
        let verifier_task = tokio::spawn(verifier.run(shutdown.clone()));

        let resend = self.options.verifier.request_resend;
        let requests = ResendController::new(
            "request",
            resend.interval(),
            resend.max_attempts,
            Arc::new(move |req: &ConsensusRequest, _| {
                messenger.send_to_role(
                    ConsensusMessage::Request(req.clone()),
                    RoleMask::VALIDATOR | RoleMask::BROADCAST,
                )
            }),
        );

        let mut driver = Driver {
            me: self.address,
            clock: self.clock,
            network: self.network.messenger(self.address),
            chain: Arc::clone(&self.chain),
            pool: Arc::clone(&self.pool),
            leader: LeaderService::new(Arc::clone(&sink)),
            events: sink,
            inbox,
            requests,
            max_block_txs: self.options.max_block_txs,
            proposed: None,
        };

        let period = u64::try_from(genesis.time_config.reelect_handle_interval)
            .unwrap_or(1)
            .max(1);
        let mut ticker = tokio::time::interval(Duration::from_secs(period));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(address = %self.address, "devnet node starting");
        let result = driver.run(&mut self.messages, &mut events, &mut ticker, &mut shutdown).await;

        drop(driver);
        if let Err(e) = verifier_task.await {
            warn!(error = %e, "verifier task failed");
        }
        self.network.leave(&self.address);
        info!(address = %self.address, "devnet node stopped");
        result
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

struct Driver {
    me: Address,
    clock: DevnetClock,
    network: NetworkHandle,
    chain: Arc<MemoryChain>,
    pool: Arc<MemoryTxPool>,
    leader: LeaderService,
    events: Arc<dyn EventSink>,
    inbox: mpsc::Sender<VerifierInput>,
    requests: ResendController<ConsensusRequest>,
    max_block_txs: usize,
    /// Last `(height, turn)` this node proposed for.
    proposed: Option<(u64, ConsensusTurn)>,
}

impl Driver {
    async fn run(
        &mut self,
        messages: &mut mpsc::UnboundedReceiver<ConsensusMessage>,
        events: &mut mpsc::UnboundedReceiver<ConsensusEvent>,
        ticker: &mut tokio::time::Interval,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), DevnetError> {
        self.enter_height().await?;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                Some(message) = messages.recv() => self.on_message(message).await?,
                Some(event) = events.recv() => self.on_event(event).await?,
                _ = ticker.tick() => self.on_tick().await?,
            }
        }
    }

    async fn send(&self, input: VerifierInput) -> Result<(), DevnetError> {
        self.inbox
            .send(input)
            .await
            .map_err(|_| DevnetError::VerifierClosed)
    }

    /// Schedules the height after the current head.
    async fn enter_height(&mut self) -> Result<(), DevnetError> {
        self.requests.close();
        let head = self.chain.head();
        let state = self.chain.state_at(&head.hash())?;
        let notice = match self.leader.on_parent_block(&head.header, &state) {
            Ok(notice) => notice,
            Err(e) => {
                warn!(height = head.header.height + 1, error = %e, "cannot schedule height");
                return Ok(());
            }
        };
        let (role, validators) = self.leader.height_context(&self.me);
        self.send(VerifierInput::StartRunning {
            height: notice.number,
            role,
            validators,
        })
        .await?;
        self.on_notice(notice).await
    }

    async fn on_notice(&mut self, notice: LeaderChangeNotice) -> Result<(), DevnetError> {
        self.send(VerifierInput::LeaderChange(notice.clone())).await?;
        if notice.consensus_confirmed && notice.leader == self.me {
            self.propose(&notice).await?;
        }
        Ok(())
    }

    async fn on_message(&mut self, message: ConsensusMessage) -> Result<(), DevnetError> {
        match message {
            ConsensusMessage::Request(req) => {
                if self.answer_committed(req.header.height, req.from) {
                    return Ok(());
                }
                self.send(VerifierInput::Request(req)).await
            }
            ConsensusMessage::Vote(vote) => {
                if self.answer_committed(vote.height, vote.from) {
                    return Ok(());
                }
                self.send(VerifierInput::Vote(vote)).await
            }
            ConsensusMessage::Recovery(msg) => self.send(VerifierInput::Recovery(msg)).await,
            ConsensusMessage::Mining(req) => self.commit(&req.header, &req.txs).await,
            ConsensusMessage::Posed(req) => {
                debug!(height = req.header.height, origin = %req.origin, "posed request ignored");
                Ok(())
            }
        }
    }

    async fn on_event(&mut self, event: ConsensusEvent) -> Result<(), DevnetError> {
        let ConsensusEvent::PosFinished(notify) = event else {
            return Ok(());
        };
        self.requests.close();
        let Some(txs) = self.pool.get_many(&notify.tx_codes) else {
            warn!(height = notify.height, "finalized transactions unknown, waiting for mining request");
            return Ok(());
        };
        self.commit(&notify.header, &txs).await
    }

    /// Replies to a peer that is still working on `height` when this node
    /// has already committed it. Returns whether the height is committed.
    fn answer_committed(&self, height: u64, peer: Address) -> bool {
        if height > self.chain.height() {
            return false;
        }
        let Some(block) = self.chain.block_at(height) else {
            return true;
        };
        let sent = self.network.send_to(
            &peer,
            ConsensusMessage::Recovery(RecoveryMessage {
                header: block.header,
                from: self.me,
            }),
        );
        debug!(height, peer = %peer, sent, "recovery sent to lagging peer");
        true
    }

    async fn on_tick(&mut self) -> Result<(), DevnetError> {
        let now = self.clock.now();
        match self.leader.on_tick(now) {
            Ok(Some(notice)) => {
                self.send(VerifierInput::LeaderChange(notice.clone())).await?;
                match self.leader.on_reelection_confirmed(notice.reelect_turn) {
                    Ok(confirmed) => return self.on_notice(confirmed).await,
                    Err(e) => warn!(error = %e, "reelection confirmation failed"),
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "leader tick failed"),
        }
        match self.leader.current_notice() {
            Ok(notice) if notice.consensus_confirmed && notice.leader == self.me => {
                self.propose(&notice).await
            }
            _ => Ok(()),
        }
    }

    async fn commit(&mut self, header: &BlockHeader, txs: &[Transaction]) -> Result<(), DevnetError> {
        match self.chain.commit(header, txs) {
            Ok(true) => {
                let codes: Vec<_> = txs.iter().map(Transaction::code).collect();
                self.pool.mark_included(&codes, header.height);
                self.events.publish(ConsensusEvent::BlockCommitted {
                    height: header.height,
                    hash: header.hash_no_sign_nonce(),
                    txs: txs.len(),
                });
                self.enter_height().await
            }
            Ok(false) => Ok(()),
            Err(BackendError::UnknownState(parent)) => {
                debug!(height = header.height, parent = %parent.short(), "block ahead of local head, skipped");
                Ok(())
            }
            Err(e) => {
                warn!(height = header.height, error = %e, "commit failed");
                Ok(())
            }
        }
    }

    /// Builds and announces a block for the turn in `notice`.
    async fn propose(&mut self, notice: &LeaderChangeNotice) -> Result<(), DevnetError> {
        let slot = (notice.number, notice.consensus_turn);
        if self.proposed == Some(slot) {
            return Ok(());
        }
        let head = self.chain.head();
        if head.hash() != notice.parent_hash {
            debug!(height = notice.number, "head moved, not proposing");
            return Ok(());
        }
        let now = self.clock.now();
        if now < head.header.time.saturating_add(DEVNET_BLOCK_INTERVAL) {
            debug!(height = notice.number, "block interval not elapsed, proposal deferred");
            return Ok(());
        }

        let time = now
            .max(notice.turn_begin_time)
            .min(notice.turn_end_time - 1);
        let template = BlockHeader {
            height: notice.number,
            parent_hash: notice.parent_hash,
            time,
            leader: self.me,
            gas_limit: DEVNET_GAS_LIMIT,
            version: PROTOCOL_VERSION.to_string(),
            net_topology: head.header.net_topology.clone(),
            consensus_turn: notice.consensus_turn,
            ..BlockHeader::default()
        };
        let max_txs = usize::try_from(DEVNET_GAS_LIMIT / DEVNET_TRANSFER_GAS)
            .unwrap_or(usize::MAX)
            .min(self.max_block_txs);
        let txs = self.pool.pending(max_txs);
        let (block, receipts, _) = match self.chain.build_block(&template, &txs) {
            Ok(built) => built,
            Err(e) => {
                warn!(height = notice.number, error = %e, "proposal build failed");
                return Ok(());
            }
        };

        let request = ConsensusRequest {
            header: block.header.clone(),
            tx_codes: block.tx_codes(),
            consensus_turn: notice.consensus_turn,
            from: self.me,
        };
        info!(
            height = notice.number,
            consensus_turn = %notice.consensus_turn,
            hash = %block.hash().short(),
            txs = txs.len(),
            "proposing block"
        );
        self.proposed = Some(slot);
        self.send(VerifierInput::LocalRequest(LocalProposal {
            request: request.clone(),
            txs,
            receipts,
        }))
        .await?;
        self.requests.start(request);
        Ok(())
    }
}
