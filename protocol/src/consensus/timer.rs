//! # Turn Timer
//!
//! Converts wall-clock time into turn phases. Everything here is a pure
//! function of the leader timing config plus the recorded begin time of
//! each consensus turn, so every node with the same parent block computes
//! the same windows.
//!
//! ```text
//!  begin                begin+pos        +reelect        +reelect
//!    |---- POS window ----|-- reelect 1 --|-- reelect 2 --|-- ...
//!          reelect 0
//!
//!  pos = pos_out_time (+ parent_mining_time when consensus turn is 0)
//! ```
//!
//! Begin times only move forward: a stale observation of a turn start can
//! never widen or shift another node's window backwards.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::error::{ScheduleError, TimeOutOfWindow};
use crate::types::ReelectTurn;

/// Leader timing configuration, in seconds. Read from chain state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderTimeConfig {
    pub parent_mining_time: i64,
    pub pos_out_time: i64,
    pub reelect_out_time: i64,
    pub reelect_handle_interval: i64,
}

impl LeaderTimeConfig {
    /// Rejects any value that is not strictly positive.
    pub fn validate(&self) -> Result<(), ScheduleError> {
        let fields = [
            ("parent_mining_time", self.parent_mining_time),
            ("pos_out_time", self.pos_out_time),
            ("reelect_out_time", self.reelect_out_time),
            ("reelect_handle_interval", self.reelect_handle_interval),
        ];
        for (field, value) in fields {
            if value <= 0 {
                return Err(ScheduleError::InvalidTimeConfig { field, value });
            }
        }
        Ok(())
    }
}

impl Default for LeaderTimeConfig {
    fn default() -> Self {
        Self {
            parent_mining_time: crate::config::DEFAULT_PARENT_MINING_TIME,
            pos_out_time: crate::config::DEFAULT_POS_OUT_TIME,
            reelect_out_time: crate::config::DEFAULT_REELECT_OUT_TIME,
            reelect_handle_interval: crate::config::DEFAULT_REELECT_HANDLE_INTERVAL,
        }
    }
}

/// Which window `now` falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnPhase {
    /// The primary leader's POS window.
    Pos,
    /// Some reelection window.
    Reelect,
}

/// Output of [`TurnTimer::calc_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnState {
    pub phase: TurnPhase,
    /// Seconds until the current window closes.
    pub remaining: i64,
    /// Reelection turn `now` belongs to. Zero during the POS window.
    pub reelect_turn: ReelectTurn,
}

/// Per-height turn clock.
#[derive(Debug, Clone)]
pub struct TurnTimer {
    config: LeaderTimeConfig,
    begin_times: HashMap<u32, i64>,
}

impl TurnTimer {
    /// Creates a timer, validating the config.
    pub fn new(config: LeaderTimeConfig) -> Result<Self, ScheduleError> {
        config.validate()?;
        Ok(Self {
            config,
            begin_times: HashMap::new(),
        })
    }

    pub fn config(&self) -> &LeaderTimeConfig {
        &self.config
    }

    /// Swaps the timing config, keeping recorded begin times.
    pub fn set_time_config(&mut self, config: LeaderTimeConfig) -> Result<(), ScheduleError> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Records the begin time of a consensus turn. Returns `false` (and
    /// changes nothing) unless `time` is later than what is already known.
    pub fn set_begin_time(&mut self, consensus_turn: u32, time: i64) -> bool {
        match self.begin_times.get(&consensus_turn) {
            Some(&known) if known >= time => false,
            _ => {
                self.begin_times.insert(consensus_turn, time);
                true
            }
        }
    }

    /// Recorded begin time of a consensus turn, if any.
    pub fn begin_time(&self, consensus_turn: u32) -> Option<i64> {
        self.begin_times.get(&consensus_turn).copied()
    }

    /// Length of the POS window for a consensus turn.
    fn pos_window(&self, consensus_turn: u32) -> i64 {
        if consensus_turn == 0 {
            self.config.pos_out_time + self.config.parent_mining_time
        } else {
            self.config.pos_out_time
        }
    }

    /// Window `(begin, end)` of `reelect_turn` within `consensus_turn`.
    ///
    /// An unrecorded consensus turn is treated as beginning at 0.
    pub fn calc_turn_time(&self, consensus_turn: u32, reelect_turn: ReelectTurn) -> (i64, i64) {
        let start = self.begin_time(consensus_turn).unwrap_or(0);
        let pos = self.pos_window(consensus_turn);
        if reelect_turn == 0 {
            return (start, start + pos);
        }
        let reelect = self.config.reelect_out_time;
        let begin = start + pos + (i64::from(reelect_turn) - 1) * reelect;
        (begin, begin + reelect)
    }

    /// Phase, remaining time and implied reelection turn at `now`.
    pub fn calc_state(&self, consensus_turn: u32, now: i64) -> TurnState {
        let start = self.begin_time(consensus_turn).unwrap_or(0);
        let pos = self.pos_window(consensus_turn);
        let elapsed = now - start;

        if elapsed < pos {
            return TurnState {
                phase: TurnPhase::Pos,
                remaining: start + pos - now,
                reelect_turn: 0,
            };
        }

        let reelect = self.config.reelect_out_time;
        let implied = (elapsed - pos) / reelect + 1;
        let reelect_turn = ReelectTurn::try_from(implied).unwrap_or(ReelectTurn::MAX);
        TurnState {
            phase: TurnPhase::Reelect,
            remaining: start + pos + implied * reelect - now,
            reelect_turn,
        }
    }

    /// Accepts `time` only strictly inside the window of the given turn.
    pub fn check_time_legal(
        &self,
        consensus_turn: u32,
        reelect_turn: ReelectTurn,
        time: i64,
    ) -> Result<(), TimeOutOfWindow> {
        let (begin, end) = self.calc_turn_time(consensus_turn, reelect_turn);
        if time <= begin || time >= end {
            return Err(TimeOutOfWindow { time, begin, end });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pos: i64, mining: i64, reelect: i64) -> LeaderTimeConfig {
        LeaderTimeConfig {
            parent_mining_time: mining,
            pos_out_time: pos,
            reelect_out_time: reelect,
            reelect_handle_interval: 1,
        }
    }

    fn timer_at(t0: i64) -> TurnTimer {
        // parent_mining_time must be positive, so fold it into turn 1 tests.
        let mut timer = TurnTimer::new(config(20, 1, 40)).expect("valid config");
        timer.set_begin_time(0, t0);
        timer.set_begin_time(1, t0);
        timer
    }

    #[test]
    fn rejects_non_positive_config() {
        let err = TurnTimer::new(config(0, 5, 40)).expect_err("zero pos time");
        assert_eq!(
            err,
            ScheduleError::InvalidTimeConfig {
                field: "pos_out_time",
                value: 0
            }
        );
        assert!(TurnTimer::new(config(20, -1, 40)).is_err());
    }

    #[test]
    fn pos_window_includes_parent_mining_only_on_turn_zero() {
        let timer = timer_at(1_000);
        assert_eq!(timer.calc_turn_time(0, 0), (1_000, 1_021));
        assert_eq!(timer.calc_turn_time(1, 0), (1_000, 1_020));
    }

    #[test]
    fn reelection_after_pos_window() {
        // pos 20, reelect 40, window [t0, t0+20) on a turn without mining time.
        let t0 = 5_000;
        let timer = timer_at(t0);
        let state = timer.calc_state(1, t0 + 25);
        assert_eq!(state.phase, TurnPhase::Reelect);
        assert_eq!(state.reelect_turn, 1);
        assert_eq!(state.remaining, (t0 + 20 + 40) - (t0 + 25));
    }

    #[test]
    fn pos_phase_before_window_end() {
        let timer = timer_at(100);
        let state = timer.calc_state(1, 110);
        assert_eq!(state.phase, TurnPhase::Pos);
        assert_eq!(state.reelect_turn, 0);
        assert_eq!(state.remaining, 10);

        assert_eq!(timer.calc_state(1, 120).reelect_turn, 1);
        assert_eq!(timer.calc_state(1, 160).reelect_turn, 2);
    }

    #[test]
    fn reelection_windows_tile() {
        let timer = timer_at(777);
        for turn in [0, 1] {
            assert_eq!(timer.calc_turn_time(turn, 0).1, timer.calc_turn_time(turn, 1).0);
            for k in 1..20 {
                let (_, end) = timer.calc_turn_time(turn, k);
                let (next_begin, next_end) = timer.calc_turn_time(turn, k + 1);
                assert_eq!(end, next_begin);
                assert_eq!(next_end - next_begin, 40);
            }
        }
    }

    #[test]
    fn time_legality_is_strict() {
        let timer = timer_at(1_000);
        let (begin, end) = timer.calc_turn_time(1, 0);
        assert!(timer.check_time_legal(1, 0, begin).is_err());
        assert!(timer.check_time_legal(1, 0, begin + 1).is_ok());
        assert!(timer.check_time_legal(1, 0, end - 1).is_ok());

        let err = timer.check_time_legal(1, 0, end).expect_err("end is exclusive");
        assert_eq!(err, TimeOutOfWindow { time: end, begin, end });
    }

    #[test]
    fn begin_times_only_rise() {
        let mut timer = TurnTimer::new(LeaderTimeConfig::default()).expect("valid config");
        assert!(timer.set_begin_time(0, 100));
        assert!(!timer.set_begin_time(0, 90));
        assert!(!timer.set_begin_time(0, 100));
        assert_eq!(timer.begin_time(0), Some(100));
        assert!(timer.set_begin_time(0, 130));
        assert_eq!(timer.begin_time(0), Some(130));
    }
}
