//! Pass/fail predicates over responses.
//!
//! Checkers are pure: they hold only immutable configuration, so a single
//! [`CheckSet`] is shared by every worker without locking.

use std::fmt::Debug;
use std::sync::Arc;

use bytes::Bytes;
use hyper::StatusCode;

use crate::client::HttpResponse;
use crate::config::ConfigError;

pub trait Checker: Debug + Send + Sync {
    /// Label reported in the summary, e.g. `status 200`.
    fn name(&self) -> &str;

    /// `Err` carries the failure reason.
    fn check(&self, response: &HttpResponse) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct StatusChecker {
    expected: StatusCode,
    name: String,
}

impl StatusChecker {
    pub fn new(expected: u16) -> Result<Self, ConfigError> {
        let expected =
            StatusCode::from_u16(expected).map_err(|_| ConfigError::InvalidStatus(expected))?;
        Ok(Self {
            expected,
            name: format!("status {}", expected.as_u16()),
        })
    }
}

impl Checker for StatusChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, response: &HttpResponse) -> Result<(), String> {
        if response.status == self.expected {
            Ok(())
        } else {
            Err(format!("status {}", response.status.as_u16()))
        }
    }
}

#[derive(Debug, Clone)]
pub struct BodyContainsChecker {
    needle: Bytes,
    name: String,
}

impl BodyContainsChecker {
    #[must_use]
    pub fn new(needle: impl Into<String>) -> Self {
        let needle = needle.into();
        Self {
            name: format!("body contains {needle:?}"),
            needle: Bytes::from(needle),
        }
    }
}

impl Checker for BodyContainsChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, response: &HttpResponse) -> Result<(), String> {
        let found = self.needle.is_empty()
            || response
                .body
                .windows(self.needle.len())
                .any(|window| window == self.needle.as_ref());
        if found {
            Ok(())
        } else {
            Err(format!(
                "body missing {:?}",
                String::from_utf8_lossy(&self.needle)
            ))
        }
    }
}

/// The result of one named check on one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckVerdict {
    pub name: Arc<str>,
    pub passed: bool,
}

/// Ordered checks; a response passes only if every check does.
#[derive(Debug, Default)]
pub struct CheckSet {
    checks: Vec<(Arc<str>, Box<dyn Checker>)>,
}

impl CheckSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with<C: Checker + 'static>(mut self, checker: C) -> Self {
        let name: Arc<str> = Arc::from(checker.name());
        self.checks.push((name, Box::new(checker)));
        self
    }

    pub fn expect_status(self, status: u16) -> Result<Self, ConfigError> {
        Ok(self.with(StatusChecker::new(status)?))
    }

    #[must_use]
    pub fn expect_body_contains(self, needle: impl Into<String>) -> Self {
        self.with(BodyContainsChecker::new(needle))
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|(name, _)| name.as_ref()).collect()
    }

    /// Runs every check and returns the per-check verdicts together with the
    /// first failure reason, if any.
    #[must_use]
    pub fn evaluate(&self, response: &HttpResponse) -> (Vec<CheckVerdict>, Option<String>) {
        let mut first_failure = None;
        let verdicts = self
            .checks
            .iter()
            .map(|(name, checker)| {
                let passed = match checker.check(response) {
                    Ok(()) => true,
                    Err(reason) => {
                        first_failure.get_or_insert(reason);
                        false
                    }
                };
                CheckVerdict {
                    name: Arc::clone(name),
                    passed,
                }
            })
            .collect();
        (verdicts, first_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_checker_labels_observed_status() {
        let checker = StatusChecker::new(200).unwrap();
        assert_eq!(checker.name(), "status 200");
        assert_eq!(checker.check(&HttpResponse::new(StatusCode::OK)), Ok(()));
        assert_eq!(
            checker.check(&HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR)),
            Err("status 500".to_owned())
        );
    }

    #[test]
    fn invalid_expected_status_is_a_config_error() {
        assert!(matches!(
            StatusChecker::new(42),
            Err(ConfigError::InvalidStatus(42))
        ));
    }

    #[test]
    fn body_contains_searches_bytes() {
        let checker = BodyContainsChecker::new("answer");
        let hit = HttpResponse::new(StatusCode::OK).with_body(r#"{"answer":"gpt"}"#);
        let miss = HttpResponse::new(StatusCode::OK).with_body("{}");
        assert_eq!(checker.check(&hit), Ok(()));
        assert_eq!(checker.check(&miss), Err("body missing \"answer\"".to_owned()));
    }

    #[test]
    fn check_set_reports_first_failure_and_all_verdicts() {
        let checks = CheckSet::new()
            .expect_status(200)
            .unwrap()
            .expect_body_contains("answer");
        let response = HttpResponse::new(StatusCode::SERVICE_UNAVAILABLE).with_body("busy");

        let (verdicts, failure) = checks.evaluate(&response);
        assert_eq!(failure.as_deref(), Some("status 503"));
        assert_eq!(verdicts.len(), 2);
        assert!(verdicts.iter().all(|v| !v.passed));
        assert_eq!(&*verdicts[1].name, "body contains \"answer\"");
    }

    #[test]
    fn empty_check_set_passes() {
        let (verdicts, failure) = CheckSet::new().evaluate(&HttpResponse::new(StatusCode::IM_A_TEAPOT));
        assert!(verdicts.is_empty());
        assert!(failure.is_none());
    }
}
