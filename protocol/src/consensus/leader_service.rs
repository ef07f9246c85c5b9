//! # Leader Service
//!
//! Drives a [`LeaderSchedule`] from chain progress and the clock:
//!
//! - a new parent block starts a fresh height at consensus turn `{0, 0}`,
//!   with the parent's timestamp as the turn-0 begin time;
//! - clock ticks move into reelection turns once the POS window runs out;
//! - a confirmed reelection starts a new consensus turn led by the
//!   reelection candidate.
//!
//! Every change is published as a [`LeaderChangeNotice`].

use std::sync::Arc;

use tracing::{debug, info};

use super::error::ScheduleError;
use super::messages::ConsensusEvent;
use super::role::Role;
use super::schedule::{ConsensusStateReader, LeaderChangeNotice, LeaderSchedule, ValidatorInfo};
use super::traits::EventSink;
use crate::types::{Address, BlockHeader, ConsensusTurn, ReelectTurn};

pub struct LeaderService {
    schedule: LeaderSchedule,
    events: Arc<dyn EventSink>,
}

impl LeaderService {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            schedule: LeaderSchedule::new(),
            events,
        }
    }

    pub fn schedule(&self) -> &LeaderSchedule {
        &self.schedule
    }

    fn publish(&self) -> Result<LeaderChangeNotice, ScheduleError> {
        let notice = self.schedule.prepare_leader_notice()?;
        self.events
            .publish(ConsensusEvent::LeaderChanged(notice.clone()));
        Ok(notice)
    }

    /// Starts scheduling the height after `parent`.
    pub fn on_parent_block<S: ConsensusStateReader + ?Sized>(
        &mut self,
        parent: &BlockHeader,
        state: &S,
    ) -> Result<LeaderChangeNotice, ScheduleError> {
        self.schedule.analyze_state(parent, state)?;
        self.schedule.set_consensus_turn(ConsensusTurn::default())?;
        if let Some(timer) = self.schedule.timer_mut() {
            timer.set_begin_time(0, parent.time);
        }
        let notice = self.publish()?;
        info!(
            number = notice.number,
            leader = %notice.leader,
            begin = notice.turn_begin_time,
            end = notice.turn_end_time,
            "new height scheduled"
        );
        Ok(notice)
    }

    /// Re-evaluates the turn timer. Publishes an unconfirmed notice when
    /// `now` has moved into a later reelection turn.
    pub fn on_tick(&mut self, now: i64) -> Result<Option<LeaderChangeNotice>, ScheduleError> {
        let Some(timer) = self.schedule.timer() else {
            return Ok(None);
        };
        let state = timer.calc_state(self.schedule.consensus_turn().total_turns(), now);
        if state.reelect_turn <= self.schedule.reelect_turn() {
            return Ok(None);
        }
        self.schedule.set_reelect_turn(state.reelect_turn)?;
        let notice = self.publish()?;
        info!(
            number = notice.number,
            reelect_turn = notice.reelect_turn,
            candidate = %notice.leader,
            remaining = state.remaining,
            "primary leader timed out, reelection started"
        );
        Ok(Some(notice))
    }

    /// Adopts the candidate of `reelect_turn` as leader of a new consensus
    /// turn. The new turn begins where that reelection window began, so
    /// every node derives the same window.
    pub fn on_reelection_confirmed(
        &mut self,
        reelect_turn: ReelectTurn,
    ) -> Result<LeaderChangeNotice, ScheduleError> {
        if reelect_turn == 0 {
            return Err(ScheduleError::LeaderLookup(
                "reelection turn 0 cannot be confirmed".into(),
            ));
        }
        let old = self.schedule.consensus_turn();
        let begin = self
            .schedule
            .timer()
            .map(|t| t.calc_turn_time(old.total_turns(), reelect_turn).0)
            .ok_or_else(|| ScheduleError::LeaderLookup("turn timer not configured".into()))?;

        let next = old.after_reelection(reelect_turn);
        self.schedule.set_consensus_turn(next)?;
        if let Some(timer) = self.schedule.timer_mut() {
            timer.set_begin_time(next.total_turns(), begin);
        }
        let notice = self.publish()?;
        info!(
            number = notice.number,
            consensus_turn = %next,
            leader = %notice.leader,
            "reelection confirmed"
        );
        Ok(notice)
    }

    /// The current notice without publishing it.
    pub fn current_notice(&self) -> Result<LeaderChangeNotice, ScheduleError> {
        self.schedule.prepare_leader_notice()
    }

    /// Role of `account` and the validator set for the scheduled height.
    pub fn height_context(&self, account: &Address) -> (Role, Vec<ValidatorInfo>) {
        let validators = self.schedule.validators().to_vec();
        let role = if validators.iter().any(|v| v.address == *account) {
            Role::Validator
        } else if self
            .schedule
            .special_accounts()
            .is_some_and(|s| s.broadcast == *account)
        {
            Role::Broadcast
        } else {
            Role::Follower
        };
        debug!(account = %account, %role, "height context");
        (role, validators)
    }
}
