//! Detection context provider backed by the kernel ARP table.
//!
//! Each snapshot starts from the static gateways and trusted hosts in the
//! `[context]` config section and adds the entries currently listed in
//! `/proc/net/arp`. A missing table file yields the static entries only.

use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::SystemTime;

use tracing::debug;

use arpwarden_core::config::ContextConfig;
use arpwarden_core::{ContextProvider, DetectionContext, DetectionError, MacAddr};

/// ATF_COM: the kernel has resolved the hardware address.
const ATF_COMPLETE: u32 = 0x2;

/// Context provider merging static config with `/proc/net/arp`.
#[derive(Debug, Clone)]
pub struct ProcArpContextProvider {
    base: DetectionContext,
    arp_table_path: PathBuf,
}

impl ProcArpContextProvider {
    /// Build a provider from the `[context]` config section.
    pub fn from_config(config: &ContextConfig) -> Self {
        Self {
            base: DetectionContext::from_config(config),
            arp_table_path: PathBuf::from(&config.arp_table_path),
        }
    }

    /// Path of the ARP table file read on every snapshot.
    pub fn arp_table_path(&self) -> &PathBuf {
        &self.arp_table_path
    }

    fn read_arp_table(&self) -> Result<HashMap<Ipv4Addr, MacAddr>, DetectionError> {
        match std::fs::read_to_string(&self.arp_table_path) {
            Ok(content) => Ok(parse_arp_table(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    path = %self.arp_table_path.display(),
                    "arp table not found, using static context only"
                );
                Ok(HashMap::new())
            }
            Err(e) => Err(DetectionError::ContextUnavailable(format!(
                "failed to read {}: {}",
                self.arp_table_path.display(),
                e
            ))),
        }
    }
}

impl ContextProvider for ProcArpContextProvider {
    fn snapshot(&self) -> Result<DetectionContext, DetectionError> {
        let mut context = self.base.clone();
        context.arp_table = self.read_arp_table()?;
        context.captured_at = SystemTime::now();
        Ok(context)
    }
}

/// Parse the contents of `/proc/net/arp`.
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         00:11:22:33:44:55     *        eth0
/// ```
///
/// Incomplete entries and malformed lines are skipped.
pub fn parse_arp_table(content: &str) -> HashMap<Ipv4Addr, MacAddr> {
    content
        .lines()
        .skip(1)
        .filter_map(parse_arp_line)
        .collect()
}

fn parse_arp_line(line: &str) -> Option<(Ipv4Addr, MacAddr)> {
    let mut cols = line.split_whitespace();
    let ip: Ipv4Addr = cols.next()?.parse().ok()?;
    let _hw_type = cols.next()?;
    let flags = u32::from_str_radix(cols.next()?.trim_start_matches("0x"), 16).ok()?;
    let mac: MacAddr = cols.next()?.parse().ok()?;
    if flags & ATF_COMPLETE == 0 || mac.is_zero() {
        return None;
    }
    Some((ip, mac))
}
