//! Unix-seconds clock shared by the nodes of one devnet.
//!
//! Anchored to the wall clock once, then advanced by the tokio clock. A
//! test that pauses tokio time therefore also pauses every turn window.

use chrono::Utc;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct DevnetClock {
    anchor_unix: i64,
    anchor: Instant,
}

impl DevnetClock {
    /// A clock that reads the current wall-clock time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now().timestamp())
    }

    /// A clock that reads `unix` right now.
    pub fn starting_at(unix: i64) -> Self {
        Self {
            anchor_unix: unix,
            anchor: Instant::now(),
        }
    }

    /// Current time in Unix seconds.
    pub fn now(&self) -> i64 {
        let elapsed = Instant::now().saturating_duration_since(self.anchor).as_secs();
        self.anchor_unix
            .saturating_add(i64::try_from(elapsed).unwrap_or(i64::MAX))
    }
}

impl Default for DevnetClock {
    fn default() -> Self {
        Self::new()
    }
}
