use std::sync::Arc;
use std::time::Duration;

use humantime::format_duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::RunConfig;
use crate::worker::{Worker, WorkerSlot};

/// One-way cancellation flag observed by every worker.
///
/// Unlike a broadcast message, the flag is sticky: a worker that subscribes
/// or checks after the signal fired still sees it.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Returns `true` only for the call that actually flipped the flag.
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Sleeps for `duration` unless cancelled first. Returns `false` when
    /// the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => true,
            () = self.cancelled() => false,
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the run's lifetime: a fixed pool of workers and a monotonic
/// deadline after which the cancel signal fires.
#[derive(Debug)]
pub struct Scheduler {
    config: RunConfig,
    signal: CancelSignal,
}

impl Scheduler {
    #[must_use]
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            signal: CancelSignal::new(),
        }
    }

    #[must_use]
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    /// Spawns exactly `concurrency` workers built by `make_worker`.
    pub fn spawn_workers<F>(&self, mut make_worker: F) -> Vec<WorkerSlot>
    where
        F: FnMut(usize, CancelSignal) -> Worker,
    {
        (0..self.config.concurrency())
            .map(|id| WorkerSlot::spawn(make_worker(id, self.signal.clone())))
            .collect()
    }

    /// Fires the cancel signal once `duration` has elapsed. Single-pass
    /// runs have no deadline; their workers stop on their own.
    pub fn arm_deadline(&self) -> Option<JoinHandle<()>> {
        if self.config.is_single_pass() {
            return None;
        }
        let duration = self.config.duration();
        let signal = self.signal.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(duration) => {
                    if signal.cancel() {
                        info!(duration = %format_duration(duration), "Deadline reached, stopping workers");
                    }
                }
                () = signal.cancelled() => {}
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn cancel_is_idempotent() {
        let signal = CancelSignal::new();
        assert!(!signal.is_cancelled());
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn late_observer_sees_cancellation() {
        let signal = CancelSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_secs(1), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sleep_is_cut_short_by_cancel() {
        let signal = CancelSignal::new();
        let canceller = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let start = Instant::now();
        assert!(!signal.sleep(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn deadline_fires_after_duration() {
        let config = RunConfig::new(1, Duration::from_millis(50)).unwrap();
        let scheduler = Scheduler::new(config);
        let start = Instant::now();
        let deadline = scheduler.arm_deadline().unwrap();
        scheduler.signal().cancelled().await;
        assert!(start.elapsed() >= Duration::from_millis(50));
        deadline.await.unwrap();
    }

    #[test]
    fn single_pass_has_no_deadline() {
        let config = RunConfig::new(3, Duration::ZERO).unwrap();
        let scheduler = Scheduler::new(config);
        assert!(scheduler.arm_deadline().is_none());
    }
}
