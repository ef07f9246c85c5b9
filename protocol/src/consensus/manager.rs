//! # Process Manager & Block Verifier
//!
//! The [`ProcessManager`] owns one [`VerificationProcess`] per height at or
//! above the current one, creating them lazily and closing them once the
//! chain moves past their height.
//!
//! The [`BlockVerifier`] is the async front door: it drains an mpsc inbox
//! of [`VerifierInput`]s into the manager until the shutdown watch fires.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::messages::{ConsensusRequest, LocalProposal, RecoveryMessage, VoteMessage};
use super::process::VerificationProcess;
use super::role::Role;
use super::schedule::{LeaderChangeNotice, ValidatorInfo};
use super::traits::{ChainBackend, Collaborators};
use crate::config::VerifierConfig;

/// Inbound work for the verifier.
#[derive(Debug, Clone)]
pub enum VerifierInput {
    StartRunning {
        height: u64,
        role: Role,
        validators: Vec<ValidatorInfo>,
    },
    LeaderChange(LeaderChangeNotice),
    Request(ConsensusRequest),
    LocalRequest(LocalProposal),
    Vote(VoteMessage),
    Recovery(RecoveryMessage),
}

impl VerifierInput {
    /// Height the input is addressed to.
    pub fn height(&self) -> u64 {
        match self {
            Self::StartRunning { height, .. } => *height,
            Self::LeaderChange(notice) => notice.number,
            Self::Request(req) => req.header.height,
            Self::LocalRequest(local) => local.request.header.height,
            Self::Vote(vote) => vote.height,
            Self::Recovery(msg) => msg.header.height,
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessManager
// ---------------------------------------------------------------------------

/// Height-keyed table of verification processes.
pub struct ProcessManager<B: ChainBackend> {
    current_height: u64,
    processes: BTreeMap<u64, VerificationProcess<B>>,
    collab: Collaborators<B>,
    config: VerifierConfig,
}

impl<B: ChainBackend> ProcessManager<B> {
    pub fn new(collab: Collaborators<B>, config: VerifierConfig) -> Self {
        Self {
            current_height: 0,
            processes: BTreeMap::new(),
            collab,
            config,
        }
    }

    pub fn current_height(&self) -> u64 {
        self.current_height
    }

    /// Advances the current height, closing processes below it.
    pub fn set_current_height(&mut self, height: u64) {
        if height <= self.current_height {
            return;
        }
        self.current_height = height;
        let kept = self.processes.split_off(&height);
        for (h, process) in std::mem::replace(&mut self.processes, kept) {
            process.close();
            debug!(height = h, "verification process pruned");
        }
    }

    /// Process for `height`, created on first use. `None` for heights
    /// already pruned.
    pub fn process(&mut self, height: u64) -> Option<VerificationProcess<B>> {
        if height < self.current_height {
            return None;
        }
        let process = self.processes.entry(height).or_insert_with(|| {
            VerificationProcess::new(height, self.collab.clone(), self.config)
        });
        Some(process.clone())
    }

    /// Number of live processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Routes one input to its height's process.
    pub fn handle(&mut self, input: VerifierInput) {
        let height = input.height();
        if let VerifierInput::StartRunning { .. } = input {
            self.set_current_height(height);
        }
        let Some(process) = self.process(height) else {
            debug!(
                height,
                current = self.current_height,
                "input for pruned height dropped"
            );
            return;
        };
        match input {
            VerifierInput::StartRunning {
                role, validators, ..
            } => process.start_running(role, validators),
            VerifierInput::LeaderChange(notice) => process.set_leader_info(notice),
            VerifierInput::Request(req) => process.add_req(req),
            VerifierInput::LocalRequest(local) => process.add_local_req(local),
            VerifierInput::Vote(vote) => process.add_vote(vote),
            VerifierInput::Recovery(msg) => process.process_recovery_msg(msg),
        }
    }

    /// Closes every process.
    pub fn close_all(&mut self) {
        for process in self.processes.values() {
            process.close();
        }
        self.processes.clear();
    }
}

// ---------------------------------------------------------------------------
// BlockVerifier
// ---------------------------------------------------------------------------

/// Async loop feeding a [`ProcessManager`].
pub struct BlockVerifier<B: ChainBackend> {
    manager: ProcessManager<B>,
    inbox: mpsc::Receiver<VerifierInput>,
}

impl<B: ChainBackend> BlockVerifier<B> {
    /// Creates a verifier and the sender that feeds it.
    pub fn new(
        collab: Collaborators<B>,
        config: VerifierConfig,
        capacity: usize,
    ) -> (Self, mpsc::Sender<VerifierInput>) {
        let (tx, inbox) = mpsc::channel(capacity);
        let verifier = Self {
            manager: ProcessManager::new(collab, config),
            inbox,
        };
        (verifier, tx)
    }

    pub fn manager(&mut self) -> &mut ProcessManager<B> {
        &mut self.manager
    }

    /// Runs until `shutdown` flips to `true` or every sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("block verifier starting");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                input = self.inbox.recv() => match input {
                    Some(input) => self.manager.handle(input),
                    None => {
                        debug!("verifier inbox closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        self.manager.close_all();
        info!("block verifier stopped");
    }
}
