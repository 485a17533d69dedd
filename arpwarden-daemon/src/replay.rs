//! JSON-lines packet replay.
//!
//! Each non-empty line is one `ArpPacket` record. Malformed lines are
//! logged and skipped; packets the engine rejects are counted.

use anyhow::Result;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use arpwarden_core::ArpPacket;
use arpwarden_engine::DetectionEngine;

/// Outcome of one replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    /// Lines read (blank lines excluded)
    pub lines: u64,
    /// Packets accepted by the engine
    pub ingested: u64,
    /// Lines that did not parse as a packet
    pub malformed: u64,
    /// Packets the engine refused (queue full, not running)
    pub rejected: u64,
}

/// Parse a single replay line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ArpPacket>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Feed every record from `reader` into the engine.
pub async fn replay<R>(reader: R, engine: &DetectionEngine) -> Result<ReplaySummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = ReplaySummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let packet = match parse_line(&line) {
            Ok(Some(packet)) => packet,
            Ok(None) => continue,
            Err(e) => {
                summary.lines += 1;
                summary.malformed += 1;
                warn!(line = line_no, error = %e, "skipping malformed packet record");
                continue;
            }
        };
        summary.lines += 1;

        match engine.ingest(packet) {
            Ok(()) => summary.ingested += 1,
            Err(e) => {
                summary.rejected += 1;
                warn!(line = line_no, error = %e, "engine rejected packet");
            }
        }
    }

    debug!(?summary, "replay finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_is_skipped() {
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn record_parses() {
        let packet = parse_line(
            r#"{"src_mac":"02:00:00:00:00:01","src_ip":"10.0.0.5","dst_mac":"00:00:00:00:00:00","dst_ip":"10.0.0.1","packet_type":"request"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(packet.src_ip.to_string(), "10.0.0.5");
    }

    #[test]
    fn bad_mac_is_an_error() {
        assert!(
            parse_line(
                r#"{"src_mac":"zz","src_ip":"10.0.0.5","dst_mac":"00:00:00:00:00:00","dst_ip":"10.0.0.1","packet_type":"request"}"#
            )
            .is_err()
        );
    }
}
