//! Tether - operational probe CLI.
//!
//! Usage:
//!   tether --service billing --endpoints http://127.0.0.1:2379 hold --ids 1-8
//!   tether --service billing hold --ips 10.0.0.10-10.0.0.20
//!   tether --service billing lock migrations
//!
//! Endpoints and credentials fall back to ETCD_ADDRESS / ETCD_USER /
//! ETCD_PASSWORD when the flags are omitted.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tether::shutdown::ProcessContext;
use tether::{EventSink, LeaseEvent, Options, PoolLease, Range, Service};
use tracing::{info, warn};

/// Tether - service coordination probe.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Service name to coordinate under.
    #[arg(short, long, global = true, default_value = "")]
    service: String,

    /// Comma-separated store endpoints.
    #[arg(short, long, global = true)]
    endpoints: Option<String>,

    /// Lease TTL in seconds.
    #[arg(long, global = true, default_value_t = 30)]
    ttl: u64,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Acquire a pool member and hold it until interrupted.
    Hold(HoldArgs),
    /// Acquire a named mutex and hold it until interrupted.
    Lock(LockArgs),
}

#[derive(Args, Debug)]
struct HoldArgs {
    /// ID pool spec, e.g. "1-8" or "1,3,5".
    #[arg(long, conflicts_with = "ips")]
    ids: Option<String>,

    /// IPv4 pool spec, e.g. "10.0.0.1-10.0.0.9".
    #[arg(long)]
    ips: Option<String>,
}

#[derive(Args, Debug)]
struct LockArgs {
    /// Mutex name.
    name: String,
}

/// Sink that narrates lifecycle events into the log.
struct LogEvents;

impl EventSink for LogEvents {
    fn on_lease_event(&self, event: LeaseEvent, member: &str) {
        warn!(member, "{event}");
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut options = Options::new(&cli.service)
        .with_lease_ttl(std::time::Duration::from_secs(cli.ttl))
        .with_events(Arc::new(LogEvents));
    if let Some(endpoints) = &cli.endpoints {
        options = options.with_endpoints(endpoints);
    }

    match cli.command {
        Commands::Hold(args) => run_hold(options, args).await,
        Commands::Lock(args) => run_lock(options, args).await,
    }
}

async fn run_hold(options: Options, args: HoldArgs) -> Result<()> {
    let range = match (&args.ids, &args.ips) {
        (Some(spec), None) => Range::ids(spec).context("invalid --ids spec")?,
        (None, Some(spec)) => Range::ipv4(spec).context("invalid --ips spec")?,
        _ => bail!("exactly one of --ids or --ips is required"),
    };

    let service = Service::connect(options).await.context("store connection failed")?;
    let ctx = ProcessContext::new();
    let signals = {
        let ctx = ctx.clone();
        tokio::spawn(async move { tether::shutdown::wait_for_shutdown(&ctx).await })
    };

    let mut lease = PoolLease::new(range, &service, ctx.token());
    match lease.wait().await {
        Ok(member) => {
            info!(member = %member, "holding pool member, interrupt to release");
            ctx.token().cancelled().await;
            lease.close().await;
            info!(member = %member, "released");
        }
        Err(tether::Error::Cancelled) => info!("interrupted before acquisition"),
        Err(error) => {
            service.close().await;
            return Err(error).context("pool acquisition failed");
        }
    }

    service.close().await;
    let _ = signals.await;
    Ok(())
}

async fn run_lock(options: Options, args: LockArgs) -> Result<()> {
    let service = Service::connect(options).await.context("store connection failed")?;

    let released = service
        .acquire_lock(&args.name)
        .await
        .context("mutex acquisition failed")?;
    info!(name = %args.name, "mutex held, interrupt to release");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            service.release_lock(&args.name).await?;
            info!(name = %args.name, "mutex released");
        }
        _ = released.cancelled() => {
            warn!(name = %args.name, "mutex lost with the session");
        }
    }

    service.close().await;
    Ok(())
}
