// Vehicle tracker for Linux: reports this vehicle's position to the dispatch server.

mod agent;
mod config;
mod console;
mod location;
mod reporter;
mod route;
mod store;

#[cfg(test)]
mod http_stub;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracker_core::Tracker;

use crate::agent::{Agent, Timeouts};
use crate::config::Config;
use crate::reporter::HttpReporter;
use crate::route::RouteClient;
use crate::store::FileStore;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, PartialEq)]
struct Args {
    version: bool,
    id: Option<String>,
    clear_id: bool,
    config: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut out = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => out.version = true,
            "--clear-id" => out.clear_id = true,
            "--id" => out.id = Some(args.next().context("--id needs a value")?),
            "--config" => out.config = Some(args.next().context("--config needs a path")?.into()),
            other => bail!("unknown argument: {}", other),
        }
    }
    Ok(out)
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;
    if args.version {
        println!("tracker-linux {}", VERSION);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cfg = config::load(args.config.as_deref()).context("loading config")?;
    let store = FileStore::open(cfg.store_path()).context("opening identity store")?;
    info!(store = %store.path().display(), server = %cfg.server_url, "starting");

    if args.clear_id {
        let (_, result) = Tracker::new(store).clear_identity();
        result.context("clearing identity")?;
        println!("vehicle ID cleared");
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run(cfg, store, args.id));
    rt.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(cfg: Config, store: FileStore, id: Option<String>) -> anyhow::Result<()> {
    let location = location::from_config(&cfg.location).context("location source")?;
    let reporter = HttpReporter::new(cfg.positions_url(), cfg.request_timeout())?;
    let routes = RouteClient::new(cfg.route_url(), cfg.request_timeout())?;
    let timeouts = Timeouts {
        permission: cfg.location.permission_timeout(),
        initial_fix: cfg.location.fix_timeout(),
    };

    let (agent, handle) = Agent::new(
        Tracker::new(store),
        location,
        Arc::new(reporter),
        Some(routes),
        timeouts,
    );
    let agent = tokio::spawn(agent.run());
    tokio::spawn(console::present(handle.session(), handle.route()));

    if let Some(id) = id {
        handle.set_identity(&id).await.context("setting vehicle ID")?;
    }

    tokio::select! {
        r = shutdown_signal() => r?,
        r = console::read_commands(handle.clone()) => r?,
    }

    info!("shutting down");
    handle.shutdown();
    if tokio::time::timeout(Duration::from_secs(5), agent).await.is_err() {
        warn!("agent did not stop in time");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
