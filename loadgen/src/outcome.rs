use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::check::CheckVerdict;
use crate::error::RequestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Pass,
    /// A response arrived but a check rejected it.
    Fail(String),
    /// No checkable response.
    Error(RequestError),
}

impl Outcome {
    #[inline]
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }
}

/// One attempt of one worker. Immutable once built.
#[derive(Debug, Clone)]
pub struct RequestResult {
    worker_id: usize,
    timestamp: DateTime<Utc>,
    latency: Duration,
    outcome: Outcome,
    checks: Vec<CheckVerdict>,
}

impl RequestResult {
    #[must_use]
    pub fn new(
        worker_id: usize,
        timestamp: DateTime<Utc>,
        latency: Duration,
        outcome: Outcome,
        checks: Vec<CheckVerdict>,
    ) -> Self {
        Self {
            worker_id,
            timestamp,
            latency,
            outcome,
            checks,
        }
    }

    /// Stands in for a request whose worker was aborted mid-flight.
    #[must_use]
    pub fn cancelled(worker_id: usize) -> Self {
        Self::new(
            worker_id,
            Utc::now(),
            Duration::ZERO,
            Outcome::Error(RequestError::Cancelled),
            Vec::new(),
        )
    }

    #[inline]
    #[must_use]
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[inline]
    #[must_use]
    pub fn latency(&self) -> Duration {
        self.latency
    }

    #[inline]
    #[must_use]
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    #[inline]
    #[must_use]
    pub fn checks(&self) -> &[CheckVerdict] {
        &self.checks
    }
}
