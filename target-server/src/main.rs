//! A local endpoint to point `loadgen` at: answers every request except
//! `GET /healthz` with a fixed status after an optional delay.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use http_test_util::{TargetBehavior, TargetServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct TargetArgs {
    /// Listen address
    #[arg(long, short = 'l', default_value = "127.0.0.1:8081")]
    listen: SocketAddr,

    /// Status returned for every request
    #[arg(long, short = 's', default_value_t = 200, value_parser = clap::value_parser!(u16).range(100..=999))]
    status: u16,

    /// Delay before answering, e.g. 20ms
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    delay: Option<Duration>,
}

fn main() -> anyhow::Result<()> {
    let args = TargetArgs::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    let _guard = rt.enter();
    rt.block_on(run_server(args))
}

async fn run_server(args: TargetArgs) -> anyhow::Result<()> {
    let behavior =
        TargetBehavior::status(args.status).with_delay(args.delay.unwrap_or(Duration::ZERO));
    let server = TargetServer::bind(args.listen, behavior).await?;
    info!(addr = %server.addr(), status = %behavior.status, delay = ?behavior.delay, "Target server listening");

    tokio::select! {
        res = server.serve_forever() => res,
        res = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            res.context("Failed to listen for Ctrl+C")
        }
    }
}
