//! Node roles and role masks used to address peer messages.

use std::fmt;
use std::ops::BitOr;

use serde::{Deserialize, Serialize};

/// What a node does at a given height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Verifies proposals and votes on them.
    Validator,
    /// Singleton that produces broadcast blocks and relays finalized ones.
    Broadcast,
    /// Seals finalized headers.
    Miner,
    /// Follows the chain without taking part in consensus.
    Follower,
}

impl Role {
    fn bit(self) -> u8 {
        match self {
            Self::Validator => 1,
            Self::Broadcast => 1 << 1,
            Self::Miner => 1 << 2,
            Self::Follower => 1 << 3,
        }
    }

    /// Whether this role runs the verification state machine.
    pub fn verifies(self) -> bool {
        matches!(self, Self::Validator | Self::Broadcast)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validator => "validator",
            Self::Broadcast => "broadcast",
            Self::Miner => "miner",
            Self::Follower => "follower",
        };
        f.write_str(name)
    }
}

/// A set of roles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleMask(u8);

impl RoleMask {
    pub const NONE: RoleMask = RoleMask(0);
    pub const VALIDATOR: RoleMask = RoleMask(1);
    pub const BROADCAST: RoleMask = RoleMask(1 << 1);
    pub const MINER: RoleMask = RoleMask(1 << 2);
    pub const FOLLOWER: RoleMask = RoleMask(1 << 3);

    pub fn contains(self, role: Role) -> bool {
        self.0 & role.bit() != 0
    }

    pub fn intersects(self, other: RoleMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl From<Role> for RoleMask {
    fn from(role: Role) -> Self {
        RoleMask(role.bit())
    }
}

impl BitOr for RoleMask {
    type Output = RoleMask;

    fn bitor(self, rhs: RoleMask) -> RoleMask {
        RoleMask(self.0 | rhs.0)
    }
}
