//! # Block-Proposal Consensus
//!
//! Leader rotation plus block verification and DPOS vote aggregation.
//!
//! ## Components (leaf first)
//!
//! - [`timer`]: wall-clock time to turn phase, remaining time, legality.
//! - [`schedule`]: deterministic leader for each turn of a height.
//! - [`resend`]: at-least-once re-sending of consensus traffic.
//! - [`votes`]: per-proposal vote ledger and the early-vote pool.
//! - [`process`]: per-height verification state machine.
//!
//! On top of those, [`leader_service`] turns chain progress and clock
//! ticks into leader notices, and [`manager`] routes inbound traffic to
//! the process of the right height.
//!
//! ## Flow
//!
//! ```text
//! parent block ──► LeaderService ──notice──► VerificationProcess
//!                                                │  proposal cached
//!                                                ▼
//!                                 pre-checks, fetch txs, re-execute
//!                                                │  Success
//!                                                ▼
//!                      self-vote ──► VoteLedger ◄── peer votes
//!                                                │  quorum (DposEngine)
//!                                                ▼
//!                         PosFinished, MiningRequest, PosedRequest
//! ```

pub mod error;
pub mod leader_service;
pub mod manager;
pub mod messages;
pub mod process;
pub mod proposal;
pub mod reexec;
pub mod resend;
pub mod role;
pub mod schedule;
pub mod timer;
pub mod traits;
pub mod votes;

pub use error::{
    BackendError, DposError, FetchError, ScheduleError, SignError, TimeOutOfWindow, TopologyError,
};
pub use leader_service::LeaderService;
pub use manager::{BlockVerifier, ProcessManager, VerifierInput};
pub use messages::{
    BlockPosFinishedNotify, ConsensusEvent, ConsensusMessage, ConsensusRequest, LocalProposal,
    MiningRequest, PosedRequest, RecoveryMessage, StateFailureAlert, VoteMessage,
};
pub use process::{ProcessState, VerificationProcess};
pub use proposal::{LocalVerifyResult, Proposal, ProposalCache, RecoverableReason, StateFailureReason};
pub use resend::ResendController;
pub use role::{Role, RoleMask};
pub use schedule::{
    BroadcastInterval, ConsensusStateReader, LeaderChangeNotice, LeaderSchedule, SpecialAccounts,
    ValidatorInfo,
};
pub use timer::{LeaderTimeConfig, TurnPhase, TurnState, TurnTimer};
pub use traits::{
    ChainBackend, Collaborators, DposEngine, EventSink, FetchedTxs, PeerMessenger, SigningService,
    TopologyValidator, TransactionSource,
};
pub use votes::{UnverifiedVotePool, Vote, VoteLedger};
