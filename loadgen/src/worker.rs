//! The virtual-user loop: issue, check, record, pace, repeat.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::check::CheckSet;
use crate::client::Transport;
use crate::error::RequestError;
use crate::outcome::{Outcome, RequestResult};
use crate::request::RequestSpec;
use crate::scheduler::CancelSignal;
use crate::statistics::Aggregator;

pub struct Worker {
    id: usize,
    spec: Arc<RequestSpec>,
    checks: Arc<CheckSet>,
    transport: Arc<dyn Transport>,
    aggregator: Arc<Aggregator>,
    signal: CancelSignal,
    pacing: Option<Duration>,
    single_pass: bool,
    issued: Arc<AtomicU64>,
}

impl Worker {
    #[must_use]
    pub fn new(
        id: usize,
        spec: Arc<RequestSpec>,
        checks: Arc<CheckSet>,
        transport: Arc<dyn Transport>,
        aggregator: Arc<Aggregator>,
        signal: CancelSignal,
    ) -> Self {
        Self {
            id,
            spec,
            checks,
            transport,
            aggregator,
            signal,
            pacing: None,
            single_pass: false,
            issued: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Issue exactly one request, then stop.
    #[must_use]
    pub fn single_pass(mut self, single_pass: bool) -> Self {
        self.single_pass = single_pass;
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of requests this worker has started so far.
    #[must_use]
    pub fn issued_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.issued)
    }

    /// Runs until cancelled, or after one request in single-pass mode.
    ///
    /// Cancellation is checked between iterations only: a request already
    /// dispatched runs to completion or to its own timeout.
    pub async fn run(self) {
        debug!(worker_id = self.id, "Worker started");
        let mut iterations = 0u64;
        loop {
            if self.signal.is_cancelled() {
                break;
            }
            let result = self.execute_one().await;
            trace!(worker_id = self.id, outcome = ?result.outcome(), latency = ?result.latency(), "Request finished");
            self.aggregator.record(result);
            iterations += 1;

            if self.single_pass || self.signal.is_cancelled() {
                break;
            }
            if let Some(pacing) = self.pacing {
                if !self.signal.sleep(pacing).await {
                    break;
                }
            }
        }
        debug!(worker_id = self.id, iterations, "Worker finished");
    }

    async fn execute_one(&self) -> RequestResult {
        self.issued.fetch_add(1, Ordering::AcqRel);
        let timestamp = Utc::now();
        let start = Instant::now();
        let timeout = self.spec.timeout();
        let (outcome, checks) =
            match tokio::time::timeout(timeout, self.transport.issue(&self.spec)).await {
                Ok(Ok(response)) => {
                    let (verdicts, failure) = self.checks.evaluate(&response);
                    let outcome = failure.map_or(Outcome::Pass, Outcome::Fail);
                    (outcome, verdicts)
                }
                Ok(Err(cause)) => (Outcome::Error(cause), Vec::new()),
                Err(_elapsed) => (Outcome::Error(RequestError::Timeout(timeout)), Vec::new()),
            };
        RequestResult::new(self.id, timestamp, start.elapsed(), outcome, checks)
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("pacing", &self.pacing)
            .field("single_pass", &self.single_pass)
            .finish()
    }
}

/// A spawned worker as seen by the runner.
#[derive(Debug)]
pub struct WorkerSlot {
    id: usize,
    issued: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    #[must_use]
    pub fn spawn(worker: Worker) -> Self {
        let id = worker.id();
        let issued = worker.issued_counter();
        let handle = tokio::spawn(worker.run());
        Self {
            id,
            issued,
            handle: Some(handle),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Acquire)
    }

    /// `true` until the task has been joined or aborted.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.handle.is_some()
    }

    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Joins every pending worker. Cancel safe: slots already joined are
/// skipped when called again.
pub(crate) async fn join_all(slots: &mut [WorkerSlot]) {
    for slot in slots.iter_mut() {
        let Some(handle) = slot.handle.as_mut() else {
            continue;
        };
        let joined = handle.await;
        slot.handle = None;
        if let Err(e) = joined {
            error!(worker_id = slot.id, error = %e, "Worker task failed");
        }
    }
}
