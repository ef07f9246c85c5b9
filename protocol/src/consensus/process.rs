//! # Verification Process
//!
//! The per-height state machine that turns a leader's proposal into a
//! quorum-signed header.
//!
//! ```text
//! Idle ──start_running──► Start
//! Start ──confirmed leader + cached proposal──► ReqVerify
//! ReqVerify ──pre-checks pass──► TxsVerify
//! ReqVerify ──pre-check fails──► DposVerify (Recoverable | StateFailure)
//! TxsVerify ──fetch + re-execution, hash matches──► DposVerify (Success)
//! TxsVerify ──timeout | fetch error | mismatch──► DposVerify (Recoverable | StateFailure)
//! DposVerify ──quorum──► End
//! any state except End ──leader / consensus turn change──► Start
//! ```
//!
//! ## Locking
//!
//! One `parking_lot::Mutex` guards all state. Every public operation takes
//! it once for its whole critical section and never awaits while holding
//! it. The transaction fetch and the re-execution run on their own tasks
//! and come back to the lock only to check the sequence fence and write
//! their outcome. A leader change bumps the sequence, so a late result
//! from an abandoned verification is dropped instead of cancelled.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::error::{FetchError, TimeOutOfWindow};
use super::messages::{
    BlockPosFinishedNotify, ConsensusEvent, ConsensusMessage, ConsensusRequest, LocalProposal,
    MiningRequest, PosedRequest, RecoveryMessage, StateFailureAlert, VoteMessage,
};
use super::proposal::{
    CacheInsert, LocalVerifyResult, Proposal, ProposalCache, ProposalKey, RecoverableReason,
    StateFailureReason,
};
use super::reexec::{reexecute, Reexecuted};
use super::resend::ResendController;
use super::role::{Role, RoleMask};
use super::schedule::{LeaderChangeNotice, ValidatorInfo};
use super::traits::{ChainBackend, Collaborators};
use super::votes::{UnverifiedVotePool, Vote, VoteLedger};
use crate::config::{VerifierConfig, STALE_FETCH_RETRY};
use crate::crypto::keys::Signature;
use crate::types::{Address, BlockHeader, Hash, Transaction, TxCode};

/// States of a verification process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Start,
    ReqVerify,
    TxsVerify,
    DposVerify,
    End,
}

struct Inner<S> {
    state: ProcessState,
    role: Role,
    validators: Vec<ValidatorInfo>,
    notice: Option<LeaderChangeNotice>,
    proposals: ProposalCache<S>,
    current: Option<ProposalKey>,
    pool: UnverifiedVotePool,
    /// Fencing token for asynchronous verification.
    seq: u64,
    closed: bool,
    vote_sender: ResendController<VoteMessage>,
    mining_sender: ResendController<MiningRequest>,
    posed_sender: ResendController<PosedRequest>,
}

impl<S> Inner<S> {
    fn stake_of(&self, account: &Address) -> Option<u64> {
        self.validators
            .iter()
            .find(|v| v.address == *account)
            .map(|v| v.stake)
    }

    fn current_proposal(&self) -> Option<&Proposal<S>> {
        self.current.as_ref().and_then(|k| self.proposals.get(k))
    }
}

type VerifyOutcome<S> = Result<(Reexecuted<S>, Vec<Transaction>), LocalVerifyResult>;

/// Verification state machine for one block height.
///
/// Cheap to clone: clones share the same state.
pub struct VerificationProcess<B: ChainBackend> {
    height: u64,
    inner: Arc<Mutex<Inner<B::State>>>,
    collab: Collaborators<B>,
    config: VerifierConfig,
}

impl<B: ChainBackend> Clone for VerificationProcess<B> {
    fn clone(&self) -> Self {
        Self {
            height: self.height,
            inner: Arc::clone(&self.inner),
            collab: self.collab.clone(),
            config: self.config,
        }
    }
}

impl<B: ChainBackend> VerificationProcess<B> {
    pub fn new(height: u64, collab: Collaborators<B>, config: VerifierConfig) -> Self {
        let messenger = Arc::clone(&collab.messenger);
        let vote_sender = ResendController::new(
            "vote",
            config.vote_resend.interval(),
            config.vote_resend.max_attempts,
            Arc::new(move |vote: &VoteMessage, _| {
                messenger.send_to_role(
                    ConsensusMessage::Vote(vote.clone()),
                    RoleMask::VALIDATOR | RoleMask::BROADCAST,
                )
            }),
        );
        let messenger = Arc::clone(&collab.messenger);
        let mining_sender = ResendController::new(
            "mining",
            config.mining_resend.interval(),
            config.mining_resend.max_attempts,
            Arc::new(move |req: &MiningRequest, _| {
                messenger.send_to_role(ConsensusMessage::Mining(req.clone()), RoleMask::MINER)
            }),
        );
        let messenger = Arc::clone(&collab.messenger);
        let posed_sender = ResendController::new(
            "posed",
            config.posed_resend.interval(),
            config.posed_resend.max_attempts,
            Arc::new(move |req: &PosedRequest, _| {
                messenger.send_to_role(ConsensusMessage::Posed(req.clone()), RoleMask::BROADCAST)
            }),
        );

        let inner = Inner {
            state: ProcessState::Idle,
            role: Role::Follower,
            validators: Vec::new(),
            notice: None,
            proposals: ProposalCache::new(config.max_proposals_per_height),
            current: None,
            pool: UnverifiedVotePool::new(
                config.unverified_votes_per_hash,
                config.unverified_vote_hashes,
            ),
            seq: 0,
            closed: false,
            vote_sender,
            mining_sender,
            posed_sender,
        };

        Self {
            height,
            inner: Arc::new(Mutex::new(inner)),
            collab,
            config,
        }
    }

    // -- observation -------------------------------------------------------

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    /// Hash of the proposal currently being processed.
    pub fn current_hash(&self) -> Option<Hash> {
        self.inner.lock().current_proposal().map(|p| p.hash)
    }

    pub fn verify_result(&self, hash: &Hash) -> Option<LocalVerifyResult> {
        let inner = self.inner.lock();
        let key = inner.proposals.key_of(hash)?;
        inner.proposals.get(&key)?.local_verify_result.clone()
    }

    /// Votes counted for the proposal with `hash`.
    pub fn votes(&self, hash: &Hash) -> Vec<Vote> {
        let inner = self.inner.lock();
        inner
            .proposals
            .key_of(hash)
            .and_then(|k| inner.proposals.get(&k))
            .map(|p| p.votes.votes().to_vec())
            .unwrap_or_default()
    }

    /// Votes parked while waiting for their proposal.
    pub fn unverified_votes(&self) -> usize {
        self.inner.lock().pool.len()
    }

    /// The quorum-signed header, once the height is finalized.
    pub fn finalized_header(&self) -> Option<BlockHeader> {
        let inner = self.inner.lock();
        match inner.state {
            ProcessState::End => inner.current_proposal().map(|p| p.header.clone()),
            _ => None,
        }
    }

    // -- lifecycle ---------------------------------------------------------

    /// Enters `Start` with the role and validator set of this height.
    /// Roles that do not verify leave the process idle.
    pub fn start_running(&self, role: Role, validators: Vec<ValidatorInfo>) {
        let mut inner = self.inner.lock();
        if inner.closed || inner.state != ProcessState::Idle {
            debug!(height = self.height, state = ?inner.state, "start_running ignored");
            return;
        }
        inner.role = role;
        inner.validators = validators;
        if !role.verifies() {
            debug!(height = self.height, %role, "role does not verify, staying idle");
            return;
        }
        inner.state = ProcessState::Start;
        info!(height = self.height, %role, validators = inner.validators.len(), "verification process started");

        for key in inner.proposals.keys() {
            self.replay_parked_votes(&mut inner, key);
        }
        self.advance(&mut inner);
    }

    /// Applies a leader notice. A different leader or consensus turn
    /// discards the running proposal.
    pub fn set_leader_info(&self, notice: LeaderChangeNotice) {
        if notice.number != self.height {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        if inner.state == ProcessState::End {
            debug!(height = self.height, "height finalized, leader notice ignored");
            return;
        }

        let changed = inner.notice.as_ref().map_or(true, |old| {
            old.leader != notice.leader
                || old.consensus_turn != notice.consensus_turn
                || old.consensus_confirmed != notice.consensus_confirmed
        });
        if changed && inner.current.is_some() {
            info!(
                height = self.height,
                leader = %notice.leader,
                consensus_turn = %notice.consensus_turn,
                "leader changed, discarding running proposal"
            );
            self.reset_current(&mut inner);
        }
        inner.notice = Some(notice);
        self.advance(&mut inner);
    }

    /// Shuts the process down. Late verification results are discarded.
    ///
    /// A finalized process keeps delivering its mining and posed requests
    /// until their resend budgets run out.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.seq += 1;
        inner.vote_sender.close();
        if inner.state == ProcessState::End {
            inner.mining_sender.detach();
            inner.posed_sender.detach();
        } else {
            inner.mining_sender.close();
            inner.posed_sender.close();
        }
        debug!(height = self.height, state = ?inner.state, "verification process closed");
    }

    // -- inbound -----------------------------------------------------------

    /// Admits a proposal received from a peer.
    pub fn add_req(&self, req: ConsensusRequest) {
        if req.header.height != self.height {
            return;
        }
        if req.from != req.header.leader {
            warn!(
                height = self.height,
                from = %req.from,
                leader = %req.header.leader,
                "proposal not sent by its leader, ignored"
            );
            return;
        }
        if req.consensus_turn != req.header.consensus_turn {
            warn!(height = self.height, "proposal turn disagrees with its header, ignored");
            return;
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        self.admit(&mut inner, Proposal::from_request(req));
    }

    /// Admits the local leader's own proposal. It is never re-verified.
    pub fn add_local_req(&self, local: LocalProposal) {
        if local.request.header.height != self.height {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        self.admit(&mut inner, Proposal::from_local(local));
    }

    /// Counts a vote, or parks it until its proposal arrives.
    pub fn add_vote(&self, vote: VoteMessage) {
        if vote.height != self.height {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let key = match inner.proposals.key_of(&vote.sign_hash) {
            Some(key) if !inner.validators.is_empty() => key,
            _ => {
                if inner.pool.add(vote) {
                    trace!(height = self.height, "vote parked until its proposal arrives");
                }
                return;
            }
        };
        if self.accept_vote(&mut inner, key, vote) && inner.current == Some(key) {
            self.dpos_once(&mut inner);
        }
    }

    /// Replaces the running proposal's votes with a peer's signature set.
    ///
    /// Rejected outright when the hash differs from the running proposal
    /// or when none of the signatures verify.
    pub fn process_recovery_msg(&self, msg: RecoveryMessage) {
        if msg.header.height != self.height {
            return;
        }
        let hash = msg.hash();
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let Some(key) = inner.current else {
            warn!(height = self.height, hash = %hash.short(), "recovery without a running proposal, rejected");
            return;
        };
        let (parent_hash, running_hash, finished) = match inner.proposals.get(&key) {
            Some(p) => (p.header.parent_hash, p.hash, p.pos_finished),
            None => return,
        };
        if running_hash != hash {
            warn!(
                height = self.height,
                expected = %running_hash.short(),
                got = %hash.short(),
                "recovery hash mismatch, rejected"
            );
            return;
        }
        if finished {
            debug!(height = self.height, "recovery after finality ignored");
            return;
        }

        let mut ledger = VoteLedger::new();
        for signature in &msg.header.signatures {
            let (signer, valid) =
                self.collab
                    .signer
                    .verify_signature(&hash, signature, &parent_hash);
            let Some(weight) = inner.stake_of(&signer).filter(|_| valid) else {
                debug!(height = self.height, signer = %signer, "recovery signature dropped");
                continue;
            };
            ledger.add_vote(Vote {
                sign_hash: hash,
                signature: signature.clone(),
                signer,
                is_valid: true,
                weight,
            });
        }
        if ledger.is_empty() {
            warn!(height = self.height, from = %msg.from, "recovery carried no usable signatures, rejected");
            return;
        }

        info!(
            height = self.height,
            from = %msg.from,
            votes = ledger.len(),
            "vote ledger replaced from recovery"
        );
        if let Some(p) = inner.proposals.get_mut(&key) {
            p.votes = ledger;
        }
        self.dpos_once(&mut inner);
    }

    /// Evaluates quorum for the running proposal. Does nothing outside
    /// `DposVerify` or once the proposal is finalized.
    pub fn process_dpos_once(&self) {
        let mut inner = self.inner.lock();
        self.dpos_once(&mut inner);
    }

    // -- state machine (lock held) -------------------------------------------

    fn admit(&self, inner: &mut Inner<B::State>, proposal: Proposal<B::State>) {
        if inner.state == ProcessState::End {
            debug!(height = self.height, "height finalized, proposal ignored");
            return;
        }
        let key = proposal.key();
        let hash = proposal.hash;

        if inner.current == Some(key) {
            let Some(running) = inner.proposals.get(&key) else {
                return;
            };
            if running.hash == hash && running.is_local == proposal.is_local {
                return;
            }
            if !(proposal.is_local && !running.is_local) {
                warn!(
                    height = self.height,
                    leader = %key.0,
                    hash = %hash.short(),
                    "conflicting proposal for the running turn ignored"
                );
                return;
            }
            self.reset_current(inner);
        }

        match inner.proposals.insert(proposal) {
            CacheInsert::Inserted | CacheInsert::Replaced => {}
            CacheInsert::Duplicate => return,
            CacheInsert::Rejected => {
                debug!(height = self.height, hash = %hash.short(), "remote proposal shadowed by local one");
                return;
            }
            CacheInsert::Conflict => {
                warn!(
                    height = self.height,
                    leader = %key.0,
                    hash = %hash.short(),
                    "second proposal for the same turn ignored"
                );
                return;
            }
            CacheInsert::Full => {
                warn!(height = self.height, hash = %hash.short(), "proposal cache full, proposal dropped");
                return;
            }
        }
        debug!(height = self.height, leader = %key.0, hash = %hash.short(), "proposal cached");

        self.replay_parked_votes(inner, key);
        self.advance(inner);
    }

    fn replay_parked_votes(&self, inner: &mut Inner<B::State>, key: ProposalKey) {
        if inner.validators.is_empty() {
            return;
        }
        let Some(hash) = inner.proposals.get(&key).map(|p| p.hash) else {
            return;
        };
        let parked = inner.pool.take(&hash);
        if parked.is_empty() {
            return;
        }
        let total = parked.len();
        let accepted = parked
            .into_iter()
            .filter(|vote| self.accept_vote(inner, key, vote.clone()))
            .count();
        debug!(height = self.height, hash = %hash.short(), total, accepted, "replayed parked votes");
    }

    /// Verifies a vote against the proposal under `key` and records it.
    fn accept_vote(&self, inner: &mut Inner<B::State>, key: ProposalKey, vote: VoteMessage) -> bool {
        let Some((hash, parent_hash)) = inner
            .proposals
            .get(&key)
            .map(|p| (p.hash, p.header.parent_hash))
        else {
            return false;
        };
        if vote.sign_hash != hash {
            return false;
        }
        let (signer, valid) =
            self.collab
                .signer
                .verify_signature(&vote.sign_hash, &vote.signature, &parent_hash);
        if !valid || signer != vote.from {
            debug!(height = self.height, from = %vote.from, "vote with bad signature ignored");
            return false;
        }
        let Some(weight) = inner.stake_of(&signer) else {
            debug!(height = self.height, signer = %signer, "vote from unknown signer ignored");
            return false;
        };
        let Some(proposal) = inner.proposals.get_mut(&key) else {
            return false;
        };
        proposal.votes.add_vote(Vote {
            sign_hash: hash,
            signature: vote.signature,
            signer,
            is_valid: true,
            weight,
        })
    }

    fn reset_current(&self, inner: &mut Inner<B::State>) {
        if let Some(key) = inner.current.take() {
            inner.proposals.remove(&key);
        }
        inner.seq += 1;
        inner.vote_sender.close();
        if inner.state != ProcessState::Idle {
            inner.state = ProcessState::Start;
        }
    }

    /// `Start` -> `ReqVerify` once the confirmed leader's proposal is cached.
    fn advance(&self, inner: &mut Inner<B::State>) {
        if inner.closed || inner.state != ProcessState::Start {
            return;
        }
        let Some(notice) = inner.notice.as_ref() else {
            return;
        };
        if !notice.consensus_confirmed {
            return;
        }
        let key = (notice.leader, notice.consensus_turn);
        if inner.proposals.get(&key).is_none() {
            trace!(height = self.height, leader = %key.0, "waiting for leader's proposal");
            return;
        }
        inner.current = Some(key);
        inner.state = ProcessState::ReqVerify;
        self.req_verify(inner, key);
    }

    fn req_verify(&self, inner: &mut Inner<B::State>, key: ProposalKey) {
        let Some(notice) = inner.notice.clone() else {
            return;
        };
        let Some(proposal) = inner.proposals.get(&key) else {
            return;
        };

        if proposal.is_local {
            debug!(height = self.height, "local proposal, skipping re-verification");
            self.on_verdict(inner, key, LocalVerifyResult::Success);
            return;
        }

        if let Err(verdict) = self.precheck(&notice, proposal) {
            self.on_verdict(inner, key, verdict);
            return;
        }

        let header = proposal.header.clone();
        let codes = proposal.tx_codes.clone();
        let hash = proposal.hash;
        inner.state = ProcessState::TxsVerify;
        inner.seq += 1;
        let seq = inner.seq;

        match Handle::try_current() {
            Ok(runtime) => {
                let this = self.clone();
                runtime.spawn(async move { this.verify_txs(seq, hash, header, codes).await });
            }
            Err(e) => {
                let reason = RecoverableReason::FetchFailed(format!("no async runtime: {e}"));
                self.on_verdict(inner, key, LocalVerifyResult::Recoverable(reason));
            }
        }
    }

    /// Timestamp, header, topology, version and VRF checks.
    fn precheck(
        &self,
        notice: &LeaderChangeNotice,
        proposal: &Proposal<B::State>,
    ) -> Result<(), LocalVerifyResult> {
        let header = &proposal.header;
        if header.time < notice.turn_begin_time || header.time >= notice.turn_end_time {
            return Err(LocalVerifyResult::StateFailure(
                StateFailureReason::TimestampOutOfWindow(TimeOutOfWindow {
                    time: header.time,
                    begin: notice.turn_begin_time,
                    end: notice.turn_end_time,
                }),
            ));
        }
        let recoverable = LocalVerifyResult::Recoverable;
        self.collab
            .chain
            .verify_header(header)
            .map_err(|e| recoverable(RecoverableReason::InvalidHeader(e.to_string())))?;
        self.collab
            .topology
            .verify_net_topology(header, proposal.votes.votes())
            .map_err(|e| recoverable(RecoverableReason::TopologyMismatch(e.to_string())))?;
        self.collab
            .dpos
            .verify_version(header)
            .map_err(|e| recoverable(RecoverableReason::VersionMismatch(e.to_string())))?;
        self.collab
            .topology
            .verify_vrf(header)
            .map_err(|e| recoverable(RecoverableReason::InvalidVrf(e.to_string())))?;
        Ok(())
    }

    /// Records the local verdict and moves to `DposVerify`.
    fn on_verdict(&self, inner: &mut Inner<B::State>, key: ProposalKey, verdict: LocalVerifyResult) {
        inner.state = ProcessState::DposVerify;
        let role = inner.role;
        let Some(proposal) = inner.proposals.get_mut(&key) else {
            return;
        };
        proposal.local_verify_result = Some(verdict.clone());
        let hash = proposal.hash;
        let leader = proposal.header.leader;

        match verdict {
            LocalVerifyResult::Success => {
                info!(height = self.height, hash = %hash.short(), "proposal verified");
                if role == Role::Broadcast {
                    self.finish(inner, key, Vec::new());
                    return;
                }
                self.self_vote(inner, key);
            }
            LocalVerifyResult::Recoverable(reason) => {
                warn!(
                    height = self.height,
                    hash = %hash.short(),
                    ?reason,
                    "proposal not endorsed, observing quorum only"
                );
            }
            LocalVerifyResult::StateFailure(reason) => {
                error!(
                    height = self.height,
                    hash = %hash.short(),
                    leader = %leader,
                    reason = %reason,
                    "STATE FAILURE: local execution diverges from proposal"
                );
                self.collab
                    .events
                    .publish(ConsensusEvent::StateFailure(StateFailureAlert {
                        height: self.height,
                        hash,
                        leader,
                        reason,
                    }));
            }
        }
        self.dpos_once(inner);
    }

    /// Signs the proposal, records the vote and starts re-sending it.
    fn self_vote(&self, inner: &mut Inner<B::State>, key: ProposalKey) {
        let me = self.collab.signer.address();
        let Some(weight) = inner.stake_of(&me) else {
            debug!(height = self.height, "not a validator at this height, not voting");
            return;
        };
        let Some(proposal) = inner.proposals.get_mut(&key) else {
            return;
        };
        if proposal.votes.has_vote_from(&me) {
            return;
        }
        let signature = match self
            .collab
            .signer
            .sign_with_context(&proposal.hash, &proposal.header.parent_hash)
        {
            Ok(signature) => signature,
            Err(e) => {
                warn!(height = self.height, error = %e, "self-vote signing failed");
                return;
            }
        };
        let sign_hash = proposal.hash;
        proposal.votes.add_vote(Vote {
            sign_hash,
            signature: signature.clone(),
            signer: me,
            is_valid: true,
            weight,
        });
        inner.vote_sender.start(VoteMessage {
            height: self.height,
            sign_hash,
            signature,
            from: me,
        });
    }

    fn dpos_once(&self, inner: &mut Inner<B::State>) {
        if inner.state != ProcessState::DposVerify || inner.role == Role::Broadcast {
            return;
        }
        let Some(key) = inner.current else {
            return;
        };
        let Some(proposal) = inner.proposals.get(&key) else {
            return;
        };
        if proposal.pos_finished || proposal.votes.is_empty() {
            return;
        }
        let count = proposal.votes.len();
        let result = self
            .collab
            .dpos
            .verify_weighted_signatures(proposal.votes.votes(), &proposal.header.parent_hash);
        match result {
            Ok(signatures) => self.finish(inner, key, signatures),
            Err(e) => trace!(height = self.height, votes = count, error = %e, "quorum not reached"),
        }
    }

    /// Attaches the accepted signatures and publishes the outcome.
    fn finish(&self, inner: &mut Inner<B::State>, key: ProposalKey, signatures: Vec<Signature>) {
        let role = inner.role;
        let Some(proposal) = inner.proposals.get_mut(&key) else {
            return;
        };
        proposal.pos_finished = true;
        proposal.header.signatures = signatures;
        let verdict = proposal.local_verify_result.clone();
        let header = proposal.header.clone();
        let tx_codes: Vec<TxCode> = proposal.tx_codes.clone();
        let consensus_turn = proposal.consensus_turn;
        let txs = proposal.txs.clone();
        let hash = proposal.hash;

        inner.state = ProcessState::End;
        inner.vote_sender.close();

        let notify = |verified| {
            ConsensusEvent::PosFinished(BlockPosFinishedNotify {
                height: self.height,
                header: header.clone(),
                consensus_turn,
                tx_codes: tx_codes.clone(),
                verified,
            })
        };

        match verdict {
            Some(LocalVerifyResult::Success) => {
                info!(
                    height = self.height,
                    hash = %hash.short(),
                    signatures = header.signatures.len(),
                    "POS finished"
                );
                self.collab.events.publish(notify(true));
                inner.mining_sender.start(MiningRequest {
                    header: header.clone(),
                    txs,
                });
                if role != Role::Broadcast {
                    match self
                        .collab
                        .signer
                        .sign_with_context(&hash, &header.parent_hash)
                    {
                        Ok(signature) => inner.posed_sender.start(PosedRequest {
                            header: header.clone(),
                            tx_codes: tx_codes.clone(),
                            consensus_turn,
                            origin: self.collab.signer.address(),
                            signature,
                        }),
                        Err(e) => warn!(height = self.height, error = %e, "posed request signing failed"),
                    }
                }
            }
            Some(LocalVerifyResult::Recoverable(_)) | None => {
                info!(height = self.height, hash = %hash.short(), "POS finished without local endorsement");
                self.collab.events.publish(notify(false));
            }
            Some(LocalVerifyResult::StateFailure(_)) => {
                error!(
                    height = self.height,
                    hash = %hash.short(),
                    "network reached quorum on a block that failed local re-execution"
                );
            }
        }
    }

    // -- asynchronous verification -------------------------------------------

    /// Whether `seq`/`hash` still identify the running verification.
    fn is_current(&self, seq: u64, hash: &Hash) -> bool {
        let inner = self.inner.lock();
        !inner.closed
            && inner.seq == seq
            && inner.state == ProcessState::TxsVerify
            && inner.current_proposal().is_some_and(|p| p.hash == *hash)
    }

    /// Fetches `codes` until an answer tagged `seq` arrives or the fetch
    /// deadline passes. Answers for another sequence are not ours and are
    /// skipped.
    /// Whether the verification tagged `seq` is still waiting for its
    /// transactions.
    fn is_fetching(&self, seq: u64) -> bool {
        let inner = self.inner.lock();
        !inner.closed && inner.seq == seq && inner.state == ProcessState::TxsVerify
    }

    async fn fetch_txs(
        &self,
        seq: u64,
        codes: &[TxCode],
        leader: Address,
    ) -> Result<Vec<Transaction>, FetchError> {
        let deadline = Instant::now() + self.config.txs_fetch_timeout();
        loop {
            let fetch = self.collab.txs.fetch_by_reference(codes, seq, leader);
            let fetched = match tokio::time::timeout_at(deadline, fetch).await {
                Err(_) => return Err(FetchError::Timeout),
                Ok(result) => result?,
            };
            if fetched.seq == seq {
                return Ok(fetched.txs);
            }
            let stale = FetchError::StaleSequence {
                expected: seq,
                got: fetched.seq,
            };
            debug!(height = self.height, error = %stale, "fetch answer skipped");
            if !self.is_fetching(seq) {
                return Err(stale);
            }
            let retry = tokio::time::sleep(STALE_FETCH_RETRY);
            if tokio::time::timeout_at(deadline, retry).await.is_err() {
                return Err(FetchError::Timeout);
            }
        }
    }

    async fn verify_txs(self, seq: u64, hash: Hash, header: BlockHeader, codes: Vec<TxCode>) {
        let txs = match self.fetch_txs(seq, &codes, header.leader).await {
            Ok(txs) => txs,
            Err(FetchError::Timeout) => {
                return self.complete(
                    seq,
                    hash,
                    Err(LocalVerifyResult::Recoverable(RecoverableReason::FetchTimeout)),
                )
            }
            Err(e) => {
                return self.complete(
                    seq,
                    hash,
                    Err(LocalVerifyResult::Recoverable(RecoverableReason::FetchFailed(
                        e.to_string(),
                    ))),
                )
            }
        };

        let matches = txs.len() == codes.len()
            && txs.iter().zip(&codes).all(|(tx, code)| tx.code() == *code);
        if !matches {
            let reason = RecoverableReason::FetchFailed("fetched set does not match references".into());
            return self.complete(seq, hash, Err(LocalVerifyResult::Recoverable(reason)));
        }
        if !self.is_current(seq, &hash) {
            debug!(height = self.height, seq, "verification superseded before execution");
            return;
        }

        let state = match self.collab.chain.state_at(&header.parent_hash) {
            Ok(state) => state,
            Err(e) => {
                let reason = RecoverableReason::StateUnavailable(e.to_string());
                return self.complete(seq, hash, Err(LocalVerifyResult::Recoverable(reason)));
            }
        };

        let chain = Arc::clone(&self.collab.chain);
        let topology = Arc::clone(&self.collab.topology);
        let joined = tokio::task::spawn_blocking(move || {
            reexecute(chain.as_ref(), topology.as_ref(), &header, &txs, state).map(|r| (r, txs))
        })
        .await;
        let outcome = joined.unwrap_or_else(|e| {
            Err(LocalVerifyResult::Recoverable(RecoverableReason::StateUnavailable(
                format!("re-execution task failed: {e}"),
            )))
        });
        self.complete(seq, hash, outcome);
    }

    /// Writes an asynchronous verification outcome if it is still current.
    fn complete(&self, seq: u64, hash: Hash, outcome: VerifyOutcome<B::State>) {
        let mut inner = self.inner.lock();
        let fenced = inner.closed || inner.seq != seq || inner.state != ProcessState::TxsVerify;
        let key = match inner.current {
            Some(key) if !fenced && inner.proposals.get(&key).is_some_and(|p| p.hash == hash) => key,
            _ => {
                debug!(height = self.height, seq, "stale verification result discarded");
                return;
            }
        };

        let verdict = match outcome {
            Ok((reexecuted, txs)) => {
                if let Some(proposal) = inner.proposals.get_mut(&key) {
                    proposal.txs = txs;
                    proposal.receipts = reexecuted.receipts;
                    proposal.state = Some(reexecuted.state);
                }
                LocalVerifyResult::Success
            }
            Err(verdict) => verdict,
        };
        self.on_verdict(&mut inner, key, verdict);
    }
}
