use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use loadgen::cli::{Command, LoadgenArgs, RunArgs};
use loadgen::{ConfigError, HttpClient, Report, Runner};
use mimalloc::MiMalloc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> ExitCode {
    let args = LoadgenArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to build tokio runtime");
            return ExitCode::from(2);
        }
    };
    let _guard = rt.enter();
    match args.command {
        Command::Run(run) => match rt.block_on(run_load(run)) {
            Ok(code) => ExitCode::from(code),
            Err(e) => {
                if e.downcast_ref::<ConfigError>().is_some() {
                    error!("Invalid configuration: {e:#}");
                } else {
                    error!("{e:#}");
                }
                ExitCode::from(2)
            }
        },
    }
}

async fn run_load(args: RunArgs) -> anyhow::Result<u8> {
    let plan = args.to_file_config()?.resolve()?;
    let runner = Runner::new(plan.run, plan.request, plan.checks, Arc::new(HttpClient::new()))?;
    let handle = runner.start();

    let control = handle.control();
    let ctrl_c = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping workers");
                control.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });
    let report = handle.wait().await;
    ctrl_c.abort();

    print_report(&report, args.output.as_deref())?;
    if let Some(abort) = &report.abort {
        error!("Run aborted, summary is partial: {abort}");
    }
    Ok(report.exit_code())
}

/// Prints the summary to stdout. A failed `--output` write is logged and
/// does not change the run's exit code.
fn print_report(report: &Report, output: Option<&Path>) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize summary")?;
    println!("{json}");
    if let Some(path) = output {
        match std::fs::write(path, &json) {
            Ok(()) => info!(path = %path.display(), "Summary written"),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to write summary"),
        }
    }
    Ok(())
}
