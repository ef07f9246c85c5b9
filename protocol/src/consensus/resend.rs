//! # Resend Controller
//!
//! At-least-once delivery for consensus traffic. A controller sends its
//! payload immediately, then again every `interval`, until it has made
//! `max_attempts` attempts or is closed.
//!
//! Each controller belongs to exactly one logical phase (a vote, a
//! proposal, a mining request). Starting it again closes the running loop
//! first, so a phase never has two loops in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Sends one attempt. Receives the payload and the 1-based attempt number.
pub type SendFn<T> = Arc<dyn Fn(&T, u32) + Send + Sync>;

/// Periodic re-sender for a single payload type.
pub struct ResendController<T> {
    name: &'static str,
    interval: Duration,
    max_attempts: u32,
    send_fn: SendFn<T>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + Sync + 'static> ResendController<T> {
    pub fn new(
        name: &'static str,
        interval: Duration,
        max_attempts: u32,
        send_fn: SendFn<T>,
    ) -> Self {
        Self {
            name,
            interval,
            max_attempts,
            send_fn,
            handle: None,
        }
    }

    /// Starts resending `payload`, replacing any running loop.
    ///
    /// Needs a tokio runtime. Without one nothing is sent and a warning is
    /// logged.
    pub fn start(&mut self, payload: T) {
        self.close();

        let runtime = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(sender = self.name, error = %e, "no async runtime, resend not started");
                return;
            }
        };

        let send_fn = Arc::clone(&self.send_fn);
        let interval = self.interval;
        let max_attempts = self.max_attempts;
        let name = self.name;
        self.handle = Some(runtime.spawn(async move {
            for attempt in 1..=max_attempts {
                trace!(sender = name, attempt, "sending");
                send_fn(&payload, attempt);
                if attempt < max_attempts {
                    tokio::time::sleep(interval).await;
                }
            }
            debug!(sender = name, max_attempts, "resend budget exhausted");
        }));
    }

    /// Stops the running loop. Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            trace!(sender = self.name, "resend loop closed");
        }
    }

    /// Releases the running loop so it finishes its attempt budget on its
    /// own. Neither `close` nor drop reaches it afterwards.
    pub fn detach(&mut self) {
        if self.handle.take().is_some() {
            trace!(sender = self.name, "resend loop detached");
        }
    }

    /// Whether a loop is still sending.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl<T> Drop for ResendController<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<(u64, u32)>>>, SendFn<u64>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let send: SendFn<u64> = Arc::new(move |payload: &u64, attempt| {
            sink.lock().push((*payload, attempt));
        });
        (log, send)
    }

    #[tokio::test(start_paused = true)]
    async fn sends_until_budget_exhausted() {
        let (log, send) = recorder();
        let mut resend = ResendController::new("test", Duration::from_secs(1), 3, send);
        resend.start(7);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*log.lock(), vec![(7, 1), (7, 2), (7, 3)]);
        assert!(!resend.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_sending() {
        let (log, send) = recorder();
        let mut resend = ResendController::new("test", Duration::from_secs(1), 100, send);
        resend.start(1);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        resend.close();
        resend.close();

        let sent = log.lock().len();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(log.lock().len(), sent);
        assert!(sent >= 1);
        assert!(!resend.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_loop() {
        let (log, send) = recorder();
        let mut resend = ResendController::new("test", Duration::from_secs(1), 100, send);
        resend.start(1);
        tokio::time::sleep(Duration::from_millis(500)).await;
        resend.start(2);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        drop(resend);

        let entries = log.lock().clone();
        let first_two = entries.iter().position(|(p, _)| *p == 2).expect("second payload sent");
        assert!(entries[first_two..].iter().all(|(p, _)| *p == 2));
    }

    #[tokio::test(start_paused = true)]
    async fn detached_loop_outlives_controller() {
        let (log, send) = recorder();
        let mut resend = ResendController::new("test", Duration::from_secs(1), 3, send);
        resend.start(9);
        resend.detach();
        assert!(!resend.is_running());
        resend.close();
        drop(resend);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*log.lock(), vec![(9, 1), (9, 2), (9, 3)]);
    }

    #[test]
    fn start_without_runtime_is_a_noop() {
        let (log, send) = recorder();
        let mut resend = ResendController::new("test", Duration::from_secs(1), 3, send);
        resend.start(5);
        assert!(!resend.is_running());
        assert!(log.lock().is_empty());
    }
}
