use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::error::RequestError;
use crate::outcome::{Outcome, RequestResult};

/// Latencies above one hour are clamped to it.
const MAX_TRACKED_LATENCY_US: u64 = 3_600_000_000;

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    fn from_micros(hist: &Histogram<u64>) -> Self {
        if hist.is_empty() {
            return Self::default();
        }
        let ms = |us: u64| us as f64 / 1000.0;
        Self {
            min_ms: ms(hist.min()),
            mean_ms: hist.mean() / 1000.0,
            p50_ms: ms(hist.value_at_quantile(0.50)),
            p90_ms: ms(hist.value_at_quantile(0.90)),
            p95_ms: ms(hist.value_at_quantile(0.95)),
            p99_ms: ms(hist.value_at_quantile(0.99)),
            max_ms: ms(hist.max()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckTally {
    pub passes: u64,
    pub fails: u64,
}

/// Counters over every recorded result.
///
/// `total == passed + failed + errored` always holds.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Summary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub errored: u64,
    pub latency: LatencySummary,
    pub checks: BTreeMap<String, CheckTally>,
    /// Check failure reasons, e.g. `status 500`.
    pub failures: BTreeMap<String, u64>,
    /// Transport, timeout and cancellation causes.
    pub errors: BTreeMap<String, u64>,
    pub per_worker: BTreeMap<usize, u64>,
}

struct Tally {
    summary: Summary,
    latency_us: Histogram<u64>,
    sealed: bool,
}

impl Tally {
    fn add(&mut self, result: &RequestResult) {
        let summary = &mut self.summary;
        summary.total += 1;
        *summary.per_worker.entry(result.worker_id()).or_default() += 1;
        match result.outcome() {
            Outcome::Pass => summary.passed += 1,
            Outcome::Fail(reason) => {
                summary.failed += 1;
                *summary.failures.entry(reason.clone()).or_default() += 1;
            }
            Outcome::Error(cause) => {
                summary.errored += 1;
                *summary.errors.entry(cause.to_string()).or_default() += 1;
            }
        }
        for verdict in result.checks() {
            let tally = summary.checks.entry(verdict.name.to_string()).or_default();
            if verdict.passed {
                tally.passes += 1;
            } else {
                tally.fails += 1;
            }
        }
        // Cancelled attempts never finished, so they have no latency.
        if result.outcome() != &Outcome::Error(RequestError::Cancelled) {
            let micros = u64::try_from(result.latency().as_micros()).unwrap_or(u64::MAX);
            self.latency_us.saturating_record(micros);
        }
    }
}

/// Collects results from all workers behind one lock.
///
/// [`Aggregator::snapshot`] is only meaningful once the run has finished;
/// during a run it may observe any interleaving of concurrent records.
pub struct Aggregator {
    inner: Mutex<Tally>,
}

impl Aggregator {
    #[must_use]
    pub fn new() -> Self {
        let latency_us = Histogram::new_with_bounds(1, MAX_TRACKED_LATENCY_US, 3)
            .expect("bounds of 1us..1h at three significant figures are valid");
        Self {
            inner: Mutex::new(Tally {
                summary: Summary::default(),
                latency_us,
                sealed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tally> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, result: RequestResult) {
        let mut tally = self.lock();
        if tally.sealed {
            // Its attempt was already accounted for by `reconcile`.
            tracing::debug!(
                worker_id = result.worker_id(),
                "Discarding result that arrived after the run was sealed"
            );
            return;
        }
        tally.add(&result);
    }

    /// Records a cancelled result for every attempt `worker_id` issued but
    /// never reported. Returns how many were added.
    ///
    /// Call after [`Aggregator::seal`], so a straggler cannot report an
    /// attempt that was already filled in here.
    pub fn reconcile(&self, worker_id: usize, issued: u64) -> u64 {
        let mut tally = self.lock();
        let recorded = tally
            .summary
            .per_worker
            .get(&worker_id)
            .copied()
            .unwrap_or(0);
        let missing = issued.saturating_sub(recorded);
        for _ in 0..missing {
            tally.add(&RequestResult::cancelled(worker_id));
        }
        missing
    }

    /// Stops accepting results. Later records are dropped.
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    #[must_use]
    pub fn snapshot(&self) -> Summary {
        let tally = self.lock();
        let mut summary = tally.summary.clone();
        summary.latency = LatencySummary::from_micros(&tally.latency_us);
        summary
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tally = self.lock();
        f.debug_struct("Aggregator")
            .field("total", &tally.summary.total)
            .field("sealed", &tally.sealed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::CheckVerdict;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn result(worker_id: usize, latency_ms: u64, outcome: Outcome) -> RequestResult {
        let passed = outcome.is_pass();
        RequestResult::new(
            worker_id,
            Utc::now(),
            Duration::from_millis(latency_ms),
            outcome,
            vec![CheckVerdict {
                name: Arc::from("status 200"),
                passed,
            }],
        )
    }

    #[test]
    fn counts_partition_the_total() {
        let aggregator = Aggregator::new();
        aggregator.record(result(0, 5, Outcome::Pass));
        aggregator.record(result(0, 7, Outcome::Fail("status 500".into())));
        aggregator.record(result(1, 9, Outcome::Fail("status 500".into())));
        aggregator.record(result(
            1,
            3,
            Outcome::Error(RequestError::Transport("refused".into())),
        ));

        let summary = aggregator.snapshot();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.errored, 1);
        assert_eq!(summary.total, summary.passed + summary.failed + summary.errored);
        assert_eq!(summary.failures["status 500"], 2);
        assert_eq!(summary.errors["transport error: refused"], 1);
        assert_eq!(summary.per_worker[&0], 2);
        assert_eq!(summary.per_worker[&1], 2);
        assert_eq!(
            summary.checks["status 200"],
            CheckTally {
                passes: 1,
                fails: 3
            }
        );
    }

    #[test]
    fn latency_percentiles() {
        let aggregator = Aggregator::new();
        for ms in 1..=100 {
            aggregator.record(result(0, ms, Outcome::Pass));
        }
        let latency = aggregator.snapshot().latency;
        assert!((latency.min_ms - 1.0).abs() < 0.01);
        assert!((latency.max_ms - 100.0).abs() < 0.1);
        assert!((latency.p50_ms - 50.0).abs() < 0.5);
        assert!((latency.p99_ms - 99.0).abs() < 0.5);
        assert!((latency.mean_ms - 50.5).abs() < 0.5);
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let summary = Aggregator::new().snapshot();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.latency, LatencySummary::default());
    }

    #[test]
    fn reconcile_fills_unreported_attempts() {
        let aggregator = Aggregator::new();
        aggregator.record(result(2, 4, Outcome::Pass));

        assert_eq!(aggregator.reconcile(2, 3), 2);
        assert_eq!(aggregator.reconcile(2, 3), 0);

        let summary = aggregator.snapshot();
        assert_eq!(summary.per_worker[&2], 3);
        assert_eq!(summary.errored, 2);
        assert_eq!(summary.errors["cancelled"], 2);
        // Only the finished attempt carries latency.
        assert!((summary.latency.max_ms - 4.0).abs() < 0.01);
    }

    #[test]
    fn sealed_aggregator_drops_late_results() {
        let aggregator = Aggregator::new();
        aggregator.seal();
        aggregator.record(result(0, 10, Outcome::Pass));
        assert_eq!(aggregator.reconcile(0, 1), 1);
        aggregator.record(result(0, 10, Outcome::Pass));

        let summary = aggregator.snapshot();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.passed, 0);
        assert_eq!(summary.errors["cancelled"], 1);
        assert_eq!(summary.per_worker[&0], 1);
    }

    #[test]
    fn result_recorded_before_seal_is_not_duplicated() {
        let aggregator = Aggregator::new();
        aggregator.record(result(0, 10, Outcome::Pass));
        aggregator.seal();
        assert_eq!(aggregator.reconcile(0, 1), 0);

        let summary = aggregator.snapshot();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.passed, 1);
        assert!(summary.errors.is_empty());
    }

    #[test]
    fn latency_beyond_a_second_is_not_clamped() {
        let aggregator = Aggregator::new();
        aggregator.record(result(0, 4, Outcome::Pass));
        aggregator.record(result(0, 2_500, Outcome::Pass));

        let latency = aggregator.snapshot().latency;
        assert!((latency.min_ms - 4.0).abs() < 0.01);
        assert!((latency.max_ms - 2_500.0).abs() < 2.5);
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let aggregator = Arc::new(Aggregator::new());
        let threads: Vec<_> = (0..8)
            .map(|worker_id| {
                let aggregator = Arc::clone(&aggregator);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        aggregator.record(result(worker_id, 1, Outcome::Pass));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let summary = aggregator.snapshot();
        assert_eq!(summary.total, 4000);
        assert!(summary.per_worker.values().all(|n| *n == 500));
    }
}
