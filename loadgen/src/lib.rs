//! Fixed-pool HTTP load generation.
//!
//! A [`Runner`] spawns one worker per virtual user. Every worker issues the
//! shared [`RequestSpec`] in a loop, evaluates the response with a
//! [`CheckSet`] and hands one [`RequestResult`] per attempt to the
//! [`Aggregator`]. Runs end on their deadline, on [`RunHandle::cancel`], or
//! as `Aborted` when a worker ignores cancellation past the grace period.

pub mod check;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod outcome;
pub mod request;
pub mod runner;
pub mod scheduler;
pub mod statistics;
pub mod worker;

pub use check::{BodyContainsChecker, CheckSet, CheckVerdict, Checker, StatusChecker};
pub use client::{HttpClient, HttpResponse, Transport};
pub use config::{ConfigError, FileConfig, LoadPlan, RunConfig, TargetConfig};
pub use error::{AbortError, RequestError};
pub use outcome::{Outcome, RequestResult};
pub use request::RequestSpec;
pub use runner::{Report, RunControl, RunHandle, RunState, Runner};
pub use scheduler::{CancelSignal, Scheduler};
pub use statistics::{Aggregator, LatencySummary, Summary};
