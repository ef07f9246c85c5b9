//! Shared fixtures for the integration tests: a three-validator chain, a
//! verification process for height 1 and recording collaborators.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use strata_protocol::config::{
    VerifierConfig, DEVNET_GAS_LIMIT, DEVNET_TRANSFER_GAS, PROTOCOL_VERSION,
};
use strata_protocol::consensus::{
    BlockPosFinishedNotify, BroadcastInterval, ChainBackend, Collaborators, ConsensusEvent,
    ConsensusMessage, ConsensusRequest, DposEngine, DposError, FetchError, FetchedTxs,
    LeaderChangeNotice, LeaderService, LeaderTimeConfig, PeerMessenger, Role, RoleMask, SignError,
    SigningService, TransactionSource, ValidatorInfo, VerificationProcess, Vote, VoteMessage,
};
use strata_protocol::crypto::keys::{Signature, ValidatorKeypair};
use strata_protocol::devnet::{
    validator_keypair, Genesis, KeypairSigner, MemoryChain, MemoryTxPool, PermissiveTopology,
};
use strata_protocol::types::{Address, BlockHeader, Hash, Receipt, Transaction};

pub const GENESIS_TIME: i64 = 1_000_000;

pub const TIME_CONFIG: LeaderTimeConfig = LeaderTimeConfig {
    parent_mining_time: 10,
    pos_out_time: 20,
    reelect_out_time: 40,
    reelect_handle_interval: 3,
};

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

/// Quorum is a plain vote count.
pub struct CountQuorum {
    pub need: usize,
    pub total: usize,
}

impl DposEngine for CountQuorum {
    fn verify_version(&self, header: &BlockHeader) -> Result<(), DposError> {
        if header.version != PROTOCOL_VERSION {
            return Err(DposError::Version(header.version.clone()));
        }
        Ok(())
    }

    fn verify_weighted_signatures(
        &self,
        votes: &[Vote],
        _parent_hash: &Hash,
    ) -> Result<Vec<Signature>, DposError> {
        let valid: Vec<Signature> = votes
            .iter()
            .filter(|v| v.is_valid)
            .map(|v| v.signature.clone())
            .collect();
        if valid.len() < self.need {
            return Err(DposError::InsufficientStake {
                have: valid.len() as u64,
                total: self.total as u64,
            });
        }
        Ok(valid)
    }
}

/// Keypair signer that counts signing calls.
pub struct CountingSigner {
    inner: KeypairSigner,
    address: Address,
    signs: AtomicUsize,
}

impl CountingSigner {
    pub fn new(keypair: ValidatorKeypair) -> Self {
        Self {
            address: keypair.address(),
            inner: KeypairSigner::new(keypair),
            signs: AtomicUsize::new(0),
        }
    }

    pub fn signs(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }
}

impl SigningService for CountingSigner {
    fn address(&self) -> Address {
        self.address
    }

    fn sign_with_context(&self, hash: &Hash, parent_hash: &Hash) -> Result<Signature, SignError> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        self.inner.sign_with_context(hash, parent_hash)
    }

    fn verify_signature(
        &self,
        hash: &Hash,
        signature: &Signature,
        parent_hash: &Hash,
    ) -> (Address, bool) {
        self.inner.verify_signature(hash, signature, parent_hash)
    }
}

/// Keeps every outbound message.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(ConsensusMessage, RoleMask)>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<(ConsensusMessage, RoleMask)> {
        self.sent.lock().clone()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent.lock().iter().filter(|(m, _)| m.kind() == kind).count()
    }
}

impl PeerMessenger for RecordingMessenger {
    fn send_to_role(&self, message: ConsensusMessage, roles: RoleMask) {
        self.sent.lock().push((message, roles));
    }
}

/// Answers from the pool but tags the result with a later sequence.
pub struct StaleSource {
    pub pool: Arc<MemoryTxPool>,
}

#[async_trait]
impl TransactionSource for StaleSource {
    async fn fetch_by_reference(
        &self,
        codes: &[Hash],
        seq: u64,
        leader: Address,
    ) -> Result<FetchedTxs, FetchError> {
        let fetched = self.pool.fetch_by_reference(codes, seq, leader).await?;
        Ok(FetchedTxs {
            seq: seq + 1,
            txs: fetched.txs,
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub enum Source {
    Pool,
    Delayed(Duration),
    Stale,
}

pub struct Setup {
    /// Index of the local validator.
    pub me: usize,
    pub quorum: usize,
    pub source: Source,
    pub config: VerifierConfig,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            me: 1,
            quorum: 2,
            source: Source::Pool,
            config: VerifierConfig::default(),
        }
    }
}

pub struct Harness {
    pub keys: Vec<ValidatorKeypair>,
    pub validators: Vec<ValidatorInfo>,
    pub chain: Arc<MemoryChain>,
    pub pool: Arc<MemoryTxPool>,
    pub signer: Arc<CountingSigner>,
    pub messenger: Arc<RecordingMessenger>,
    pub events: mpsc::UnboundedReceiver<ConsensusEvent>,
    pub collab: Collaborators<MemoryChain>,
    /// Confirmed notice for height 1, turn 0.
    pub notice: LeaderChangeNotice,
    pub process: VerificationProcess<MemoryChain>,
    pub funded: Address,
}

impl Harness {
    pub fn new(setup: Setup) -> Self {
        let keys: Vec<ValidatorKeypair> = (0..3).map(validator_keypair).collect();
        let validators: Vec<ValidatorInfo> = keys
            .iter()
            .map(|kp| ValidatorInfo {
                address: kp.address(),
                stake: 100,
                role: Role::Validator,
            })
            .collect();
        let funded = Address([0xF0; 20]);
        let genesis = Genesis {
            time: GENESIS_TIME,
            validators: validators.clone(),
            broadcast: Address([0xBB; 20]),
            time_config: TIME_CONFIG,
            broadcast_interval: BroadcastInterval {
                interval: 0,
                last_broadcast_number: 0,
            },
            balances: vec![(funded, 1_000_000)],
        };
        let chain = Arc::new(MemoryChain::new(&genesis));
        let pool = Arc::new(match setup.source {
            Source::Delayed(delay) => MemoryTxPool::with_fetch_delay(delay),
            _ => MemoryTxPool::new(),
        });
        let txs: Arc<dyn TransactionSource> = match setup.source {
            Source::Stale => Arc::new(StaleSource {
                pool: Arc::clone(&pool),
            }),
            _ => pool.clone(),
        };

        let signer = Arc::new(CountingSigner::new(keys[setup.me].clone()));
        let messenger = Arc::new(RecordingMessenger::default());
        let (event_tx, events) = mpsc::unbounded_channel::<ConsensusEvent>();
        let collab = Collaborators {
            chain: Arc::clone(&chain),
            dpos: Arc::new(CountQuorum {
                need: setup.quorum,
                total: keys.len(),
            }),
            txs,
            topology: Arc::new(PermissiveTopology),
            signer: signer.clone(),
            messenger: messenger.clone(),
            events: Arc::new(event_tx),
        };

        let (schedule_tx, _schedule_rx) = mpsc::unbounded_channel::<ConsensusEvent>();
        let mut leader = LeaderService::new(Arc::new(schedule_tx));
        let head = chain.head();
        let state = chain.state_at(&head.hash()).expect("genesis state");
        let notice = leader
            .on_parent_block(&head.header, &state)
            .expect("schedule height 1");

        let process = VerificationProcess::new(1, collab.clone(), setup.config);
        Self {
            keys,
            validators,
            chain,
            pool,
            signer,
            messenger,
            events,
            collab,
            notice,
            process,
            funded,
        }
    }

    pub fn address(&self, index: usize) -> Address {
        self.keys[index].address()
    }

    /// Starts the process as a validator and hands it the turn-0 notice.
    pub fn start(&self) {
        self.process
            .start_running(Role::Validator, self.validators.clone());
        self.process.set_leader_info(self.notice.clone());
    }

    /// Pools `count` transfers from the funded account.
    pub fn transfers(&self, count: u64) -> Vec<Transaction> {
        (0..count)
            .map(|nonce| {
                let tx = Transaction {
                    from: self.funded,
                    to: Address([0xEE; 20]),
                    amount: 10,
                    nonce,
                    gas: DEVNET_TRANSFER_GAS,
                };
                self.pool.submit(tx.clone());
                tx
            })
            .collect()
    }

    /// A correctly executed proposal from the turn-0 leader.
    pub fn proposal(&self, txs: &[Transaction]) -> ConsensusRequest {
        self.proposal_at(self.notice.turn_begin_time, txs).0
    }

    /// A proposal stamped with `time`, and its receipts.
    pub fn proposal_at(&self, time: i64, txs: &[Transaction]) -> (ConsensusRequest, Vec<Receipt>) {
        let head = self.chain.head();
        let template = BlockHeader {
            height: 1,
            parent_hash: head.hash(),
            time,
            leader: self.notice.leader,
            gas_limit: DEVNET_GAS_LIMIT,
            version: PROTOCOL_VERSION.to_string(),
            net_topology: head.header.net_topology.clone(),
            consensus_turn: self.notice.consensus_turn,
            ..BlockHeader::default()
        };
        let (block, receipts, _) = self
            .chain
            .build_block(&template, txs)
            .expect("build proposal");
        let request = ConsensusRequest {
            tx_codes: block.tx_codes(),
            header: block.header,
            consensus_turn: self.notice.consensus_turn,
            from: self.notice.leader,
        };
        (request, receipts)
    }

    /// Vote for `request` signed by validator `index`.
    pub fn vote_from(&self, index: usize, request: &ConsensusRequest) -> VoteMessage {
        let hash = request.hash();
        let signature = KeypairSigner::new(self.keys[index].clone())
            .sign_with_context(&hash, &request.header.parent_hash)
            .expect("sign");
        VoteMessage {
            height: 1,
            sign_hash: hash,
            signature,
            from: self.address(index),
        }
    }

    pub fn drain_events(&mut self) -> Vec<ConsensusEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Polls `condition` for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub fn pos_finished(events: &[ConsensusEvent]) -> Vec<&BlockPosFinishedNotify> {
    events
        .iter()
        .filter_map(|e| match e {
            ConsensusEvent::PosFinished(n) => Some(n),
            _ => None,
        })
        .collect()
}
