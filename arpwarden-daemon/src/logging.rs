//! Tracing setup for arpwarden-daemon.
//!
//! Output always goes to stderr so the stats report on stdout stays
//! parseable. `RUST_LOG` wins over `general.log_level`.

use anyhow::{Result, bail};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use arpwarden_core::config::GeneralConfig;

/// Log line encoding selected by `general.log_format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON lines, one event per line
    Json,
    /// Multi-line human-readable output
    Pretty,
}

impl LogFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => bail!("unknown log format '{other}', expected 'json' or 'pretty'"),
        }
    }
}

/// Install the global subscriber. Call once, before the engine spawns threads.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format = LogFormat::parse(&config.log_format)?;
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // worker threads are named, so keep the names in every line
    let base = fmt::layer()
        .with_thread_names(true)
        .with_writer(std::io::stderr);
    let (json, pretty) = match format {
        LogFormat::Json => (Some(base.json()), None),
        LogFormat::Pretty => (None, Some(base.pretty())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::Layer::and_then(json, pretty))
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize {format:?} tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_formats_parse() {
        assert_eq!(LogFormat::parse("json").unwrap(), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty").unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn format_names_are_case_sensitive() {
        assert!(LogFormat::parse("JSON").is_err());
    }

    #[test]
    fn unknown_format_is_rejected_before_install() {
        let config = GeneralConfig {
            log_level: "info".to_owned(),
            log_format: "xml".to_owned(),
        };
        let err = init_tracing(&config).unwrap_err();
        assert!(err.to_string().contains("unknown log format 'xml'"));
    }
}
