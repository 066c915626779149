use std::time::Duration;

use humantime::format_duration;
use thiserror::Error;

/// Why an attempt ended without a response to check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {}", format_duration(*.0))]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
}

/// Workers that did not stop within the grace period after cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{} worker(s) did not stop within the {} grace period: {:?}",
    stuck_workers.len(),
    format_duration(*grace_period),
    stuck_workers
)]
pub struct AbortError {
    pub stuck_workers: Vec<usize>,
    pub grace_period: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_is_human_readable() {
        let err = RequestError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timed out after 1s 500ms");
    }

    #[test]
    fn abort_error_names_stuck_workers() {
        let err = AbortError {
            stuck_workers: vec![3, 7],
            grace_period: Duration::from_secs(20),
        };
        assert_eq!(
            err.to_string(),
            "2 worker(s) did not stop within the 20s grace period: [3, 7]"
        );
    }
}
