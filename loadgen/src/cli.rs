use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{ConfigError, FileConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct LoadgenArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a load test and print the JSON summary to stdout
    Run(RunArgs),
}

/// Flags override values read from `--config`.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// JSON config file
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Number of virtual users
    #[arg(long, short = 'u', allow_negative_numbers = true)]
    pub concurrency: Option<i64>,

    /// Run length, e.g. 30s; 0 issues one request per virtual user
    #[arg(long, short = 'd')]
    pub duration: Option<String>,

    /// Pause after each response, e.g. 500ms
    #[arg(long, short = 'p')]
    pub pacing: Option<String>,

    /// Time allowed for workers to stop after the deadline (default: 2x timeout)
    #[arg(long)]
    pub grace_period: Option<String>,

    /// Target url (http only)
    #[arg(long)]
    pub url: Option<String>,

    /// HTTP method (default: POST with a body, GET without)
    #[arg(long, short = 'X')]
    pub method: Option<String>,

    /// Request header, "Name: value"; repeatable
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body
    #[arg(long)]
    pub body: Option<String>,

    /// Per-request timeout, e.g. 10s
    #[arg(long, short = 't')]
    pub timeout: Option<String>,

    /// Status every response must have
    #[arg(long)]
    pub expect_status: Option<u16>,

    /// Substring every response body must contain
    #[arg(long)]
    pub expect_body_contains: Option<String>,

    /// Also write the JSON summary to this file
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

impl RunArgs {
    /// Reads `--config` when given and layers the flags on top.
    pub fn to_file_config(&self) -> Result<FileConfig, ConfigError> {
        let base = match &self.config {
            Some(path) => FileConfig::from_path(path)?,
            None => FileConfig::default(),
        };
        Ok(self.apply(base))
    }

    #[must_use]
    pub fn apply(&self, mut config: FileConfig) -> FileConfig {
        fn set<T: Clone>(slot: &mut Option<T>, flag: &Option<T>) {
            if let Some(value) = flag {
                *slot = Some(value.clone());
            }
        }
        set(&mut config.concurrency, &self.concurrency);
        set(&mut config.duration, &self.duration);
        set(&mut config.pacing, &self.pacing);
        set(&mut config.grace_period, &self.grace_period);
        set(&mut config.expected_status, &self.expect_status);
        set(&mut config.expect_body_contains, &self.expect_body_contains);

        let target = &mut config.target;
        set(&mut target.url, &self.url);
        set(&mut target.method, &self.method);
        set(&mut target.body, &self.body);
        set(&mut target.timeout, &self.timeout);
        for (name, value) in &self.headers {
            // Header names are case-insensitive.
            target
                .headers
                .retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            target.headers.insert(name.clone(), value.clone());
        }
        config
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected \"Name: value\", got {raw:?}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty header name in {raw:?}"));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}
