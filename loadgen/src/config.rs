//! Run configuration and the JSON configuration surface.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::check::CheckSet;
use crate::request::RequestSpec;

pub const DEFAULT_CONCURRENCY: i64 = 10;
pub const DEFAULT_DURATION: &str = "30s";
pub const DEFAULT_EXPECTED_STATUS: u16 = 200;

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid concurrency {0}: must be at least 1")]
    InvalidConcurrency(i64),

    #[error("Invalid duration {value:?}: {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("Invalid timeout: must be greater than zero")]
    ZeroTimeout,

    #[error("Missing target url")]
    MissingUrl,

    #[error("Invalid url {0:?}")]
    InvalidUrl(String),

    #[error("Unsupported scheme in {0:?}: only plain http targets are supported")]
    UnsupportedScheme(String),

    #[error("Invalid method {0:?}")]
    InvalidMethod(String),

    #[error("Invalid header {0:?}")]
    InvalidHeader(String),

    #[error("Invalid expected status {0}")]
    InvalidStatus(u16),

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// How many virtual users run, for how long, and how they pace themselves.
///
/// A zero `duration` means a single pass: every worker issues exactly one
/// request and stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    concurrency: usize,
    duration: Duration,
    pacing: Option<Duration>,
    grace_period: Option<Duration>,
}

impl RunConfig {
    pub fn new(concurrency: i64, duration: Duration) -> Result<Self, ConfigError> {
        let concurrency = usize::try_from(concurrency)
            .ok()
            .filter(|c| *c > 0)
            .ok_or(ConfigError::InvalidConcurrency(concurrency))?;
        Ok(Self {
            concurrency,
            duration,
            pacing: None,
            grace_period: None,
        })
    }

    /// Sleep between iterations of one worker, measured from the end of the
    /// previous response.
    #[must_use]
    pub fn with_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.pacing = pacing;
        self
    }

    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = Some(grace_period);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(0));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[inline]
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    #[inline]
    #[must_use]
    pub fn pacing(&self) -> Option<Duration> {
        self.pacing
    }

    #[inline]
    #[must_use]
    pub fn is_single_pass(&self) -> bool {
        self.duration.is_zero()
    }

    /// The explicit grace period, or twice the request timeout.
    #[must_use]
    pub fn grace_period(&self, request_timeout: Duration) -> Duration {
        self.grace_period
            .unwrap_or_else(|| request_timeout.saturating_mul(2))
    }
}

/// Parses `"30s"`, `"500ms"`, `"1m 30s"`; `"0"` is zero.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let trimmed = value.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    humantime::parse_duration(trimmed).map_err(|e| ConfigError::InvalidDuration {
        value: value.to_owned(),
        reason: e.to_string(),
    })
}

/// The request every worker issues, as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TargetConfig {
    pub method: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Option<String>,
}

/// The JSON configuration surface. Every field is optional so that command
/// line flags can fill or override it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileConfig {
    pub concurrency: Option<i64>,
    pub duration: Option<String>,
    pub pacing: Option<String>,
    pub grace_period: Option<String>,
    #[serde(default)]
    pub target: TargetConfig,
    pub expected_status: Option<u16>,
    pub expect_body_contains: Option<String>,
}

/// Everything a [`crate::Runner`] needs, validated.
#[derive(Debug)]
pub struct LoadPlan {
    pub run: RunConfig,
    pub request: RequestSpec,
    pub checks: CheckSet,
}

impl FileConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn resolve(self) -> Result<LoadPlan, ConfigError> {
        let duration = parse_duration(self.duration.as_deref().unwrap_or(DEFAULT_DURATION))?;
        let pacing = self.pacing.as_deref().map(parse_duration).transpose()?;
        let mut run = RunConfig::new(self.concurrency.unwrap_or(DEFAULT_CONCURRENCY), duration)?
            .with_pacing(pacing);
        if let Some(grace) = self.grace_period.as_deref() {
            run = run.with_grace_period(parse_duration(grace)?);
        }

        let target = self.target;
        let url = target.url.ok_or(ConfigError::MissingUrl)?;
        let method = target.method.unwrap_or_else(|| {
            if target.body.is_some() { "POST" } else { "GET" }.to_owned()
        });
        let mut request = RequestSpec::new(&method, &url)?;
        for (name, value) in &target.headers {
            request = request.with_header(name, value)?;
        }
        if let Some(body) = target.body {
            request = request.with_body(body);
        }
        if let Some(timeout) = target.timeout.as_deref() {
            request = request.with_timeout(parse_duration(timeout)?)?;
        }

        let mut checks =
            CheckSet::new().expect_status(self.expected_status.unwrap_or(DEFAULT_EXPECTED_STATUS))?;
        if let Some(needle) = self.expect_body_contains {
            checks = checks.expect_body_contains(needle);
        }

        Ok(LoadPlan {
            run,
            request,
            checks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ASK_CONFIG: &str = r#"{
        "concurrency": 10,
        "duration": "30s",
        "pacing": "500ms",
        "target": {
            "method": "POST",
            "url": "http://localhost:8081/ask",
            "headers": { "Content-Type": "application/json" },
            "body": "{\"question\":\"What model does this demo use?\"}"
        },
        "expectedStatus": 200
    }"#;

    #[test]
    fn rejects_non_positive_concurrency() {
        for concurrency in [0, -1, i64::MIN] {
            let err = RunConfig::new(concurrency, Duration::from_secs(1)).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidConcurrency(c) if c == concurrency));
        }
    }

    #[test]
    fn grace_period_defaults_to_twice_the_timeout() {
        let config = RunConfig::new(1, Duration::ZERO).unwrap();
        assert!(config.is_single_pass());
        assert_eq!(config.grace_period(Duration::from_secs(5)), Duration::from_secs(10));

        let config = config.with_grace_period(Duration::from_secs(1));
        assert_eq!(config.grace_period(Duration::from_secs(5)), Duration::from_secs(1));
    }

    #[test]
    fn parses_human_durations() {
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration(" 1m 30s ").unwrap(), Duration::from_secs(90));
        assert!(matches!(
            parse_duration("-5s"),
            Err(ConfigError::InvalidDuration { .. })
        ));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn resolves_file_config() {
        let config: FileConfig = serde_json::from_str(ASK_CONFIG).unwrap();
        let plan = config.resolve().unwrap();

        assert_eq!(plan.run.concurrency(), 10);
        assert_eq!(plan.run.duration(), Duration::from_secs(30));
        assert_eq!(plan.run.pacing(), Some(Duration::from_millis(500)));
        assert_eq!(plan.request.method(), &hyper::Method::POST);
        assert_eq!(plan.request.uri().path(), "/ask");
        assert_eq!(plan.request.headers()["content-type"], "application/json");
        assert_eq!(plan.request.timeout(), RequestSpec::DEFAULT_TIMEOUT);
        assert_eq!(plan.checks.names(), vec!["status 200"]);
    }

    #[test]
    fn null_pacing_means_back_to_back() {
        let config: FileConfig = serde_json::from_str(
            r#"{ "pacing": null, "target": { "url": "http://127.0.0.1:1/" } }"#,
        )
        .unwrap();
        let plan = config.resolve().unwrap();
        assert_eq!(plan.run.pacing(), None);
        assert_eq!(plan.run.concurrency(), 10);
        assert_eq!(plan.request.method(), &hyper::Method::GET);
    }

    #[test]
    fn negative_concurrency_in_file_is_a_config_error() {
        let config: FileConfig = serde_json::from_str(
            r#"{ "concurrency": -4, "target": { "url": "http://127.0.0.1:1/" } }"#,
        )
        .unwrap();
        assert!(matches!(
            config.resolve(),
            Err(ConfigError::InvalidConcurrency(-4))
        ));
    }

    #[test]
    fn missing_url_is_rejected() {
        assert!(matches!(
            FileConfig::default().resolve(),
            Err(ConfigError::MissingUrl)
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed: Result<FileConfig, _> = serde_json::from_str(r#"{ "vus": 10 }"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = FileConfig::from_path(Path::new("/nonexistent/loadgen.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
