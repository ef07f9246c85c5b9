//! # Leader Schedule
//!
//! Deterministic leader rotation for one block height.
//!
//! The schedule is rebuilt wholesale from the parent block's state
//! snapshot and never mutated piecemeal, so two nodes that saw the same
//! parent always agree on who leads which turn without talking to each
//! other:
//!
//! ```text
//! validators (role-filtered, snapshot order) = [A, B, C, D]
//! parent leader = B  ->  base = 2
//!
//! turn 0 -> C   turn 1 -> D   turn 2 -> A   turn 3 -> B   turn 4 -> C ...
//! ```
//!
//! Heights on the broadcast interval belong to the broadcast account
//! regardless of the turn.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::ScheduleError;
use super::role::Role;
use super::timer::{LeaderTimeConfig, TurnTimer};
use crate::types::{Address, BlockHeader, ConsensusTurn, Hash, ReelectTurn};

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

/// One entry of the validator topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub address: Address,
    pub stake: u64,
    pub role: Role,
}

/// Accounts with protocol-level duties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialAccounts {
    /// Leader of every broadcast height.
    pub broadcast: Address,
}

/// Every `interval` heights, counted from `last_broadcast_number`, is a
/// broadcast height. An interval of zero disables broadcast heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastInterval {
    pub interval: u64,
    pub last_broadcast_number: u64,
}

impl BroadcastInterval {
    pub fn is_broadcast_number(&self, number: u64) -> bool {
        if self.interval == 0 || number < self.last_broadcast_number {
            return false;
        }
        (number - self.last_broadcast_number) % self.interval == 0
    }
}

/// Read access to the consensus configuration stored in chain state.
///
/// `None` means the value is absent from the snapshot.
pub trait ConsensusStateReader {
    fn topology_graph(&self) -> Option<Vec<ValidatorInfo>>;
    fn special_accounts(&self) -> Option<SpecialAccounts>;
    fn leader_time_config(&self) -> Option<LeaderTimeConfig>;
    fn broadcast_interval(&self) -> Option<BroadcastInterval>;
}

/// Published whenever the active leader or its window changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderChangeNotice {
    /// Height being scheduled.
    pub number: u64,
    pub parent_hash: Hash,
    /// Active leader: the reelection candidate while a reelection runs.
    pub leader: Address,
    pub next_leader: Address,
    pub consensus_turn: ConsensusTurn,
    pub reelect_turn: ReelectTurn,
    /// `false` while a reelection candidate awaits confirmation.
    pub consensus_confirmed: bool,
    pub turn_begin_time: i64,
    pub turn_end_time: i64,
}

/// Pure leader lookup. `validators` must be the role-filtered snapshot
/// order; `parent_leader` picks the rotation base.
pub fn leader_for_turn(
    validators: &[Address],
    parent_leader: &Address,
    number: u64,
    broadcast: &Address,
    turn: u32,
    bc_interval: &BroadcastInterval,
) -> Result<Address, ScheduleError> {
    if bc_interval.is_broadcast_number(number) {
        return Ok(*broadcast);
    }
    if validators.is_empty() {
        return Err(ScheduleError::LeaderLookup(format!(
            "no validators for height {number}"
        )));
    }
    let n = validators.len() as u64;
    let base = validators
        .iter()
        .position(|v| v == parent_leader)
        .map(|i| i as u64 + 1)
        .unwrap_or(0);
    let index = (base + u64::from(turn)) % n;
    Ok(validators[index as usize])
}

// ---------------------------------------------------------------------------
// LeaderSchedule
// ---------------------------------------------------------------------------

/// Snapshot taken by `analyze_state`. Replaced, never edited.
#[derive(Debug, Clone)]
struct Snapshot {
    number: u64,
    parent_hash: Hash,
    parent_leader: Address,
    validators: Vec<ValidatorInfo>,
    addresses: Vec<Address>,
    special: SpecialAccounts,
    bc_interval: BroadcastInterval,
}

/// Leader rotation state for the height after the analyzed parent.
#[derive(Debug, Clone, Default)]
pub struct LeaderSchedule {
    snapshot: Option<Snapshot>,
    timer: Option<TurnTimer>,
    consensus_turn: ConsensusTurn,
    reelect_turn: ReelectTurn,
    leader: Address,
    next_leader: Address,
    reelect_leader: Option<Address>,
    reelect_next_leader: Option<Address>,
}

impl LeaderSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the schedule from the parent block and its post-state.
    ///
    /// Moving to a new height resets the consensus turn and the turn timer.
    /// Re-analyzing the same parent keeps them, refreshing only the
    /// snapshot and timing config.
    pub fn analyze_state<S: ConsensusStateReader + ?Sized>(
        &mut self,
        parent: &BlockHeader,
        state: &S,
    ) -> Result<(), ScheduleError> {
        let topology = state
            .topology_graph()
            .ok_or(ScheduleError::MissingConfig("topology graph"))?;
        let special = state
            .special_accounts()
            .ok_or(ScheduleError::MissingConfig("special accounts"))?;
        let time_config = state
            .leader_time_config()
            .ok_or(ScheduleError::MissingConfig("leader time config"))?;
        let bc_interval = state
            .broadcast_interval()
            .ok_or(ScheduleError::MissingConfig("broadcast interval"))?;

        let validators: Vec<ValidatorInfo> = topology
            .into_iter()
            .filter(|v| v.role == Role::Validator)
            .collect();
        let addresses = validators.iter().map(|v| v.address).collect();
        let snapshot = Snapshot {
            number: parent.height + 1,
            parent_hash: parent.hash_no_sign_nonce(),
            parent_leader: parent.leader,
            validators,
            addresses,
            special,
            bc_interval,
        };

        let same_height = self
            .snapshot
            .as_ref()
            .is_some_and(|s| s.number == snapshot.number && s.parent_hash == snapshot.parent_hash);
        let keep_timer = same_height && self.timer.is_some();
        if keep_timer {
            if let Some(timer) = self.timer.as_mut() {
                timer.set_time_config(time_config)?;
            }
        } else {
            self.timer = Some(TurnTimer::new(time_config)?);
            self.consensus_turn = ConsensusTurn::default();
        }

        debug!(
            number = snapshot.number,
            validators = snapshot.validators.len(),
            "leader schedule analyzed parent state"
        );
        self.snapshot = Some(snapshot);
        self.set_consensus_turn(self.consensus_turn)
    }

    fn snapshot(&self) -> Result<&Snapshot, ScheduleError> {
        self.snapshot
            .as_ref()
            .ok_or_else(|| ScheduleError::LeaderLookup("parent state not analyzed".into()))
    }

    /// Leader of `turn` under the analyzed snapshot.
    pub fn get_leader(
        &self,
        turn: u32,
        bc_interval: &BroadcastInterval,
    ) -> Result<Address, ScheduleError> {
        let snap = self.snapshot()?;
        leader_for_turn(
            &snap.addresses,
            &snap.parent_leader,
            snap.number,
            &snap.special.broadcast,
            turn,
            bc_interval,
        )
    }

    fn leader_pair(&self, turn: u32) -> Result<(Address, Address), ScheduleError> {
        let bc = self.snapshot()?.bc_interval;
        Ok((
            self.get_leader(turn, &bc)?,
            self.get_leader(turn.saturating_add(1), &bc)?,
        ))
    }

    /// Moves to a new consensus turn. Clears any reelection in progress.
    pub fn set_consensus_turn(&mut self, turn: ConsensusTurn) -> Result<(), ScheduleError> {
        let (leader, next_leader) = self.leader_pair(turn.total_turns())?;
        self.consensus_turn = turn;
        self.leader = leader;
        self.next_leader = next_leader;
        self.reelect_turn = 0;
        self.reelect_leader = None;
        self.reelect_next_leader = None;
        info!(
            consensus_turn = %turn,
            leader = %leader,
            "consensus turn set"
        );
        Ok(())
    }

    /// Moves to a reelection turn within the current consensus turn.
    pub fn set_reelect_turn(&mut self, turn: ReelectTurn) -> Result<(), ScheduleError> {
        if turn == self.reelect_turn {
            return Ok(());
        }
        if turn == 0 {
            self.reelect_turn = 0;
            self.reelect_leader = None;
            self.reelect_next_leader = None;
            return Ok(());
        }
        let index = self.consensus_turn.total_turns().saturating_add(turn);
        let (leader, next_leader) = self.leader_pair(index)?;
        self.reelect_turn = turn;
        self.reelect_leader = Some(leader);
        self.reelect_next_leader = Some(next_leader);
        info!(
            consensus_turn = %self.consensus_turn,
            reelect_turn = turn,
            candidate = %leader,
            "reelection turn set"
        );
        Ok(())
    }

    /// Assembles the notice for the current cached state.
    pub fn prepare_leader_notice(&self) -> Result<LeaderChangeNotice, ScheduleError> {
        let snap = self.snapshot()?;
        let timer = self
            .timer
            .as_ref()
            .ok_or_else(|| ScheduleError::LeaderLookup("turn timer not configured".into()))?;
        let (turn_begin_time, turn_end_time) =
            timer.calc_turn_time(self.consensus_turn.total_turns(), self.reelect_turn);
        let (leader, next_leader) = match self.reelect_leader {
            Some(candidate) => (candidate, self.reelect_next_leader.unwrap_or(candidate)),
            None => (self.leader, self.next_leader),
        };
        Ok(LeaderChangeNotice {
            number: snap.number,
            parent_hash: snap.parent_hash,
            leader,
            next_leader,
            consensus_turn: self.consensus_turn,
            reelect_turn: self.reelect_turn,
            consensus_confirmed: self.reelect_turn == 0,
            turn_begin_time,
            turn_end_time,
        })
    }

    // -- accessors ---------------------------------------------------------

    /// Height being scheduled, if a parent has been analyzed.
    pub fn number(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|s| s.number)
    }

    pub fn validators(&self) -> &[ValidatorInfo] {
        self.snapshot
            .as_ref()
            .map(|s| s.validators.as_slice())
            .unwrap_or(&[])
    }

    pub fn special_accounts(&self) -> Option<&SpecialAccounts> {
        self.snapshot.as_ref().map(|s| &s.special)
    }

    pub fn broadcast_interval(&self) -> Option<BroadcastInterval> {
        self.snapshot.as_ref().map(|s| s.bc_interval)
    }

    pub fn consensus_turn(&self) -> ConsensusTurn {
        self.consensus_turn
    }

    pub fn reelect_turn(&self) -> ReelectTurn {
        self.reelect_turn
    }

    /// Leader of the confirmed consensus turn.
    pub fn leader(&self) -> Address {
        self.leader
    }

    pub fn reelect_leader(&self) -> Option<Address> {
        self.reelect_leader
    }

    pub fn timer(&self) -> Option<&TurnTimer> {
        self.timer.as_ref()
    }

    pub fn timer_mut(&mut self) -> Option<&mut TurnTimer> {
        self.timer.as_mut()
    }
}
