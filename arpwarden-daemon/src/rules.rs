//! Built-in detection rules and the logging alert sink.
//!
//! Rule priorities come from `engine.rule_priority_map`; the names below
//! match its default entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use arpwarden_core::{
    AlertSink, ArpOperation, ArpPacket, BatchRule, DetectionContext, DetectionError, MacAddr,
    MatchDetails, RuleOutcome, Severity,
};
use arpwarden_engine::DetectionEngineBuilder;

/// Per-packet rule: a gateway IP announced from an unexpected MAC.
pub const GATEWAY_IMPERSONATION: &str = "gateway_impersonation";
/// Per-packet rule: unsolicited gratuitous ARP reply.
pub const GRATUITOUS_ARP: &str = "gratuitous_arp";
/// Batch rule: one sender dominating a sub-batch.
pub const ARP_FLOOD: &str = "arp_flood";

/// Default number of packets from one MAC within a sub-batch that counts as a flood.
pub const DEFAULT_FLOOD_THRESHOLD: usize = 10;

/// Flags packets whose sender claims a gateway IP with a MAC the context does not know
/// for it.
///
/// Configured gateway MACs take precedence; without them the trusted host and ARP
/// table entries for the IP are used. An IP with no known MAC never matches.
pub fn gateway_impersonation(packet: &ArpPacket, context: &DetectionContext) -> RuleOutcome {
    if !context.is_gateway_ip(&packet.src_ip) {
        return Ok(None);
    }

    let legitimate = if !context.gateway_macs.is_empty() {
        context.gateway_macs.contains(&packet.src_mac)
    } else {
        match context.expected_mac(&packet.src_ip) {
            Some(expected) => expected == packet.src_mac,
            None => true,
        }
    };
    if legitimate {
        return Ok(None);
    }

    Ok(Some(
        MatchDetails::new(
            Severity::Critical,
            format!(
                "gateway {} announced from unknown mac {}",
                packet.src_ip, packet.src_mac
            ),
        )
        .with_field("gateway_ip", packet.src_ip)
        .with_field("claimed_mac", packet.src_mac),
    ))
}

/// Flags gratuitous ARP replies. Announcements from a gateway are reported higher.
pub fn gratuitous_arp(packet: &ArpPacket, context: &DetectionContext) -> RuleOutcome {
    if packet.packet_type != ArpOperation::Reply || !packet.is_gratuitous() {
        return Ok(None);
    }
    let severity = if context.is_gateway_ip(&packet.src_ip) {
        Severity::Medium
    } else {
        Severity::Low
    };
    Ok(Some(
        MatchDetails::new(
            severity,
            format!("gratuitous arp reply for {}", packet.src_ip),
        )
        .with_field("ip", packet.src_ip)
        .with_field("mac", packet.src_mac),
    ))
}

/// Batch rule reporting a sender with at least `threshold` packets in one sub-batch.
#[derive(Debug, Clone)]
pub struct ArpFloodRule {
    threshold: usize,
}

impl ArpFloodRule {
    /// `threshold` below 1 is raised to 1.
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Default for ArpFloodRule {
    fn default() -> Self {
        Self::new(DEFAULT_FLOOD_THRESHOLD)
    }
}

impl BatchRule for ArpFloodRule {
    fn check_batch(&self, packets: &[ArpPacket], _context: &DetectionContext) -> RuleOutcome {
        // mac -> (count, index of its last packet)
        let mut senders: HashMap<MacAddr, (usize, usize)> = HashMap::new();
        for (index, packet) in packets.iter().enumerate() {
            let entry = senders.entry(packet.src_mac).or_insert((0, index));
            entry.0 += 1;
            entry.1 = index;
        }

        let worst = senders
            .into_iter()
            .filter(|(_, (count, _))| *count >= self.threshold)
            .max_by_key(|(mac, (count, _))| (*count, *mac));

        Ok(worst.map(|(mac, (count, last_index))| {
            MatchDetails::new(
                Severity::High,
                format!("{count} arp packets from {mac} in one batch"),
            )
            .with_field("mac", mac)
            .with_field("count", count)
            .with_field("batch_len", packets.len())
            .at_packet(last_index)
        }))
    }
}

/// Alert sink writing every match as a `warn` event.
#[derive(Debug, Clone, Default)]
pub struct LoggingAlertSink {
    emitted: Arc<AtomicU64>,
}

impl LoggingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared counter of alerts written so far.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.emitted)
    }
}

impl AlertSink for LoggingAlertSink {
    fn on_match(
        &self,
        rule_name: &str,
        packet: &ArpPacket,
        details: &MatchDetails,
    ) -> Result<(), DetectionError> {
        let fields = details
            .fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        warn!(
            rule = rule_name,
            severity = %details.severity,
            src_ip = %packet.src_ip,
            src_mac = %packet.src_mac,
            fields = %fields,
            "{}",
            details.description
        );
        self.emitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Register the built-in rules on an engine builder.
///
/// Priorities are left to the configured priority map.
pub fn register_builtin_rules(
    builder: DetectionEngineBuilder,
    flood_threshold: usize,
) -> DetectionEngineBuilder {
    builder
        .rule(GATEWAY_IMPERSONATION, gateway_impersonation, None)
        .rule(GRATUITOUS_ARP, gratuitous_arp, None)
        .batch_rule(ARP_FLOOD, ArpFloodRule::new(flood_threshold), None)
}
