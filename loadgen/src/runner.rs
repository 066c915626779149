//! Run orchestration.
//!
//! ```text
//! Idle --start()--> Running --deadline | cancel()--> Draining --> Completed
//!                                                             \-> Aborted
//! ```
//!
//! A [`Runner`] is the idle run. [`Runner::start`] spawns the worker pool and
//! returns a [`RunHandle`]; [`RunHandle::wait`] drives the remaining
//! transitions and always produces a [`Report`], partial when aborted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use humantime::format_duration;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::check::CheckSet;
use crate::client::Transport;
use crate::config::{ConfigError, RunConfig};
use crate::error::AbortError;
use crate::request::RequestSpec;
use crate::scheduler::Scheduler;
use crate::statistics::{Aggregator, Summary};
use crate::worker::{join_all, Worker, WorkerSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Draining,
    Completed,
    Aborted,
}

/// Final outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub state: RunState,
    /// Set when the run was aborted; counts cover only what was collected.
    pub partial: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub requests_per_second: f64,
    /// Requests started by all workers; equals `summary.total`.
    pub issued: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stuck_workers: Vec<usize>,
    #[serde(flatten)]
    pub summary: Summary,
    #[serde(skip)]
    pub abort: Option<AbortError>,
}

impl Report {
    /// 0 when completed with every request passing, 1 when any request
    /// failed or errored, 2 when aborted.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        if self.state == RunState::Aborted {
            2
        } else if self.summary.failed > 0 || self.summary.errored > 0 {
            1
        } else {
            0
        }
    }
}

/// An idle run: validated configuration plus the shared request, checks and
/// transport.
pub struct Runner {
    config: RunConfig,
    spec: Arc<RequestSpec>,
    checks: Arc<CheckSet>,
    transport: Arc<dyn Transport>,
}

impl Runner {
    pub fn new(
        config: RunConfig,
        spec: RequestSpec,
        checks: CheckSet,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            spec: Arc::new(spec),
            checks: Arc::new(checks),
            transport,
        })
    }

    /// Spawns the worker pool and arms the deadline. Must be called from
    /// within a tokio runtime.
    pub fn start(self) -> RunHandle {
        let scheduler = Scheduler::new(self.config);
        let aggregator = Arc::new(Aggregator::new());
        let (state_tx, _) = watch::channel(RunState::Idle);
        let started_at = Utc::now();
        let started = tokio::time::Instant::now();

        let pacing = self.config.pacing();
        let single_pass = self.config.is_single_pass();
        let workers = scheduler.spawn_workers(|id, signal| {
            Worker::new(
                id,
                Arc::clone(&self.spec),
                Arc::clone(&self.checks),
                Arc::clone(&self.transport),
                Arc::clone(&aggregator),
                signal,
            )
            .with_pacing(pacing)
            .single_pass(single_pass)
        });
        let deadline = scheduler.arm_deadline();
        state_tx.send_replace(RunState::Running);
        info!(
            concurrency = self.config.concurrency(),
            duration = %format_duration(self.config.duration()),
            pacing = ?pacing.map(format_duration),
            method = %self.spec.method(),
            url = %self.spec.uri(),
            "Run started"
        );

        RunHandle {
            control: RunControl {
                signal: scheduler.signal().clone(),
                state: Arc::new(state_tx),
            },
            grace_period: self.config.grace_period(self.spec.timeout()),
            scheduler,
            aggregator,
            workers,
            deadline,
            started_at,
            started,
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("spec", &self.spec)
            .field("checks", &self.checks.names())
            .finish()
    }
}

/// Cloneable access to a run's state and cancellation, e.g. for a Ctrl+C
/// handler.
#[derive(Debug, Clone)]
pub struct RunControl {
    signal: crate::scheduler::CancelSignal,
    state: Arc<watch::Sender<RunState>>,
}

impl RunControl {
    /// Requests cooperative shutdown. A no-op unless the run is `Running`,
    /// so repeated calls, or calls after completion, change nothing.
    pub fn cancel(&self) {
        if self.state() != RunState::Running {
            return;
        }
        if self.signal.cancel() {
            info!("Cancellation requested");
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    fn transition(&self, next: RunState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "Run state changed");
        }
    }
}

/// A started run.
#[derive(Debug)]
pub struct RunHandle {
    control: RunControl,
    grace_period: Duration,
    scheduler: Scheduler,
    aggregator: Arc<Aggregator>,
    workers: Vec<WorkerSlot>,
    deadline: Option<JoinHandle<()>>,
    started_at: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl RunHandle {
    #[must_use]
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.control.state()
    }

    /// Waits for the deadline, a cancel, or every worker finishing on its
    /// own; then drains workers for at most the grace period.
    pub async fn wait(mut self) -> Report {
        let signal = self.scheduler.signal().clone();
        tokio::select! {
            () = signal.cancelled() => debug!("Cancellation observed"),
            () = join_all(&mut self.workers) => debug!("All workers exited"),
        }
        self.control.transition(RunState::Draining);

        let drained = tokio::time::timeout(self.grace_period, join_all(&mut self.workers)).await;
        let stuck_workers: Vec<usize> = if drained.is_ok() {
            Vec::new()
        } else {
            self.workers
                .iter_mut()
                .filter(|slot| slot.is_pending())
                .map(|slot| {
                    warn!(
                        worker_id = slot.id(),
                        grace_period = %format_duration(self.grace_period),
                        "Worker did not stop within the grace period, aborting it"
                    );
                    slot.abort();
                    slot.id()
                })
                .collect()
        };

        // Seal first: a result from an aborted task must not land on top of
        // the cancelled result reconciled for it.
        self.aggregator.seal();
        // Covers both aborted workers and workers whose task panicked.
        let mut issued = 0;
        for slot in &self.workers {
            let worker_issued = slot.issued();
            issued += worker_issued;
            let cancelled = self.aggregator.reconcile(slot.id(), worker_issued);
            if cancelled > 0 {
                warn!(worker_id = slot.id(), cancelled, "Recorded unfinished requests as cancelled");
            }
        }

        signal.cancel();
        if let Some(deadline) = self.deadline.take() {
            deadline.abort();
        }

        let elapsed = self.started.elapsed();
        let summary = self.aggregator.snapshot();
        let (state, abort) = if stuck_workers.is_empty() {
            (RunState::Completed, None)
        } else {
            (
                RunState::Aborted,
                Some(AbortError {
                    stuck_workers: stuck_workers.clone(),
                    grace_period: self.grace_period,
                }),
            )
        };
        self.control.transition(state);

        let secs = elapsed.as_secs_f64();
        let requests_per_second = if secs > 0.0 {
            summary.total as f64 / secs
        } else {
            0.0
        };
        info!(
            state = ?state,
            elapsed = %format_duration(Duration::from_millis(elapsed.as_millis() as u64)),
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            errored = summary.errored,
            p95_ms = summary.latency.p95_ms,
            "Run finished"
        );

        Report {
            state,
            partial: state == RunState::Aborted,
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_secs: secs,
            requests_per_second,
            issued,
            stuck_workers,
            summary,
            abort,
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        // A handle dropped without `wait` must not leave workers running.
        self.scheduler.signal().cancel();
    }
}
