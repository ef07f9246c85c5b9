//! # Consensus Turns
//!
//! A height is proposed in *turns*. Turn 0 belongs to the primary leader;
//! when its window elapses without finality the network enters reelection
//! turns, and a completed reelection starts a new consensus turn for the
//! same height.
//!
//! ```text
//! height h:  {pre: 0, used: 0}  --reelected at turn 2-->  {pre: 0, used: 2}
//!            total = 0                                    total = 2
//!                                --reelected at turn 1-->  {pre: 2, used: 1}
//!                                                          total = 3
//! height h+1: {pre: 0, used: 0}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Reelection round inside a consensus turn. Zero means the primary
/// leader's POS window is still running.
pub type ReelectTurn = u32;

/// Identifies a leader-rotation slot for a block height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConsensusTurn {
    /// Turns consumed by earlier consensus turns at this height.
    pub pre_consensus_turn: u32,
    /// Reelection turns it took to reach this consensus turn.
    pub used_reelect_turn: u32,
}

impl ConsensusTurn {
    /// Builds a consensus turn from its two components.
    pub const fn new(pre_consensus_turn: u32, used_reelect_turn: u32) -> Self {
        Self {
            pre_consensus_turn,
            used_reelect_turn,
        }
    }

    /// Index of this turn in the leader rotation.
    pub fn total_turns(&self) -> u32 {
        self.pre_consensus_turn
            .saturating_add(self.used_reelect_turn)
    }

    /// The consensus turn that starts once reelection succeeds at
    /// `reelect_turn`.
    pub fn after_reelection(&self, reelect_turn: ReelectTurn) -> Self {
        Self {
            pre_consensus_turn: self.total_turns(),
            used_reelect_turn: reelect_turn,
        }
    }
}

impl fmt::Display for ConsensusTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}+{}",
            self.pre_consensus_turn, self.used_reelect_turn
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_turns_adds_components() {
        assert_eq!(ConsensusTurn::default().total_turns(), 0);
        assert_eq!(ConsensusTurn::new(3, 2).total_turns(), 5);
    }

    #[test]
    fn reelection_carries_total_forward() {
        let first = ConsensusTurn::default().after_reelection(2);
        assert_eq!(first, ConsensusTurn::new(0, 2));

        let second = first.after_reelection(1);
        assert_eq!(second, ConsensusTurn::new(2, 1));
        assert_eq!(second.total_turns(), 3);
    }

    #[test]
    fn total_turns_saturates() {
        assert_eq!(ConsensusTurn::new(u32::MAX, 5).total_turns(), u32::MAX);
    }
}
