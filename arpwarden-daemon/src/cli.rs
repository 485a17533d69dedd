//! CLI argument definitions for arpwarden-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// ARP detection daemon.
///
/// Loads `arpwarden.toml`, builds the rule evaluation engine and replays
/// JSON-lines ARP packet records through it.
#[derive(Parser, Debug)]
#[command(name = "arpwarden-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to arpwarden.toml configuration file.
    #[arg(short, long, default_value = "/etc/arpwarden/arpwarden.toml")]
    pub config: PathBuf,

    /// JSON-lines file of ARP packet records to replay.
    ///
    /// Reads from stdin when omitted.
    #[arg(short, long)]
    pub replay: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the engine.
    #[arg(long)]
    pub validate: bool,

    /// Seconds to wait for in-flight rule tasks after the replay ends.
    #[arg(long, default_value_t = 30.0)]
    pub wait_timeout_secs: f64,
}
