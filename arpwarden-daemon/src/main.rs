use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use arpwarden_core::ArpWardenConfig;
use arpwarden_daemon::cli::DaemonCli;
use arpwarden_daemon::replay::{self, ReplaySummary};
use arpwarden_daemon::{Daemon, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = ArpWardenConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    if cli.validate {
        println!("configuration is valid: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    info!(config = %cli.config.display(), "arpwarden-daemon starting");

    let daemon = Arc::new(Daemon::build(&config)?);
    daemon
        .engine
        .start()
        .map_err(|e| anyhow::anyhow!("failed to start detection engine: {}", e))?;

    let summary = tokio::select! {
        result = run_replay(cli.replay.as_deref(), &daemon) => Some(result?),
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("interrupted, stopping replay");
            None
        }
    };

    let wait = Duration::from_secs_f64(cli.wait_timeout_secs.max(0.0));
    let waiter = Arc::clone(&daemon);
    let completed = tokio::task::spawn_blocking(move || waiter.engine.wait_for_completion(wait))
        .await?;
    if !completed {
        warn!(timeout_secs = wait.as_secs_f64(), "rule tasks still running after wait");
    }

    let report = daemon.report(summary, completed);
    println!("{}", serde_json::to_string_pretty(&report)?);

    let engine_daemon = Arc::clone(&daemon);
    match tokio::task::spawn_blocking(move || engine_daemon.engine.shutdown(completed)).await? {
        Ok(discarded) if discarded > 0 => {
            warn!(discarded, "rule tasks discarded at shutdown");
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "failed to stop detection engine"),
    }

    info!("arpwarden-daemon shut down");
    Ok(())
}

async fn run_replay(path: Option<&std::path::Path>, daemon: &Daemon) -> Result<ReplaySummary> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .map_err(|e| anyhow::anyhow!("failed to open {}: {}", path.display(), e))?;
            info!(path = %path.display(), "replaying packet records");
            replay::replay(BufReader::new(file), &daemon.engine).await
        }
        None => {
            info!("replaying packet records from stdin");
            replay::replay(BufReader::new(tokio::io::stdin()), &daemon.engine).await
        }
    }
}
