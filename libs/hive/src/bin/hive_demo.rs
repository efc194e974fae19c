//! Single-node demo hive: a Counter app with a transactional handler and a
//! detached reporter.
//!
//! Usage:
//!   hive-demo
//!   hive-demo --config hive.toml --log-level debug
//!
//! Connect with the bee-addressing wire protocol (framed bincode records):
//! send `RcvrId { app_name: "Counter", id: 1 }`, read the `true`
//! acknowledgment, then stream `Msg { msg_type: "Incr", .. }` records.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use waggle_hive::{DetachedHandler, Handler, Hive, HiveConfig, RcvContext};
use waggle_types::Msg;

#[derive(Parser, Debug)]
#[command(name = "hive-demo")]
#[command(about = "Waggle demo hive")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Increments a per-key counter inside a transaction and emits the running
/// total.
struct CounterHandler;

#[async_trait]
impl Handler for CounterHandler {
    async fn rcv(&self, ctx: &mut RcvContext, msg: &Msg) -> waggle_hive::Result<()> {
        let key = String::from_utf8_lossy(&msg.data).to_string();
        let dict = ctx.dict("counts");

        ctx.begin_tx()?;
        let count = dict
            .get(&key)
            .map(|raw| u64::from_be_bytes(raw.try_into().unwrap_or_default()))
            .unwrap_or(0)
            + 1;
        dict.put(&key, count.to_be_bytes().to_vec());
        ctx.emit("Count", count.to_be_bytes().to_vec()).await;
        ctx.commit_tx().await?;

        info!(key = %key, count, "counted");
        Ok(())
    }
}

/// Background unit logging that the app is alive.
struct Reporter;

#[async_trait]
impl DetachedHandler for Reporter {
    async fn start(&self, ctx: &mut RcvContext) {
        info!(bee = %ctx.bee_id(), "reporter started");
    }

    async fn stop(&self, ctx: &mut RcvContext) {
        info!(bee = %ctx.bee_id(), "reporter stopped");
    }

    async fn rcv(&self, _ctx: &mut RcvContext, msg: &Msg) -> waggle_hive::Result<()> {
        info!(msg = %msg, "reporter observed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &args.config {
        Some(path) => HiveConfig::from_file(path)?,
        None => HiveConfig::default(),
    };

    let hive = Hive::new(config)?;
    let app = hive.new_app("Counter");
    app.handle("Incr", Arc::new(CounterHandler));

    let qee = hive
        .qee("Counter")
        .expect("app was just registered");
    qee.spawn_bee(Some(1)).await?;
    let reporter = qee.start_detached(Arc::new(Reporter)).await?;
    info!(reporter = %reporter, "detached reporter running");

    // Drain outbound so emitted totals are visible in the log.
    let mut outbound = hive.subscribe_outbound();
    tokio::spawn(async move {
        while let Ok(msg) = outbound.recv().await {
            info!(msg = %msg, "outbound");
        }
    });

    let addr = hive.start().await?;
    info!(addr = %addr, "demo hive ready; Counter bee 1 is waiting for Incr messages");

    let mut shutdown = hive.shutdown_signal();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            hive.stop().await;
        }
        _ = shutdown.changed() => {
            warn!("hive stopped on its own");
        }
    }

    // Give in-flight sessions a moment to observe the closed listener.
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}
