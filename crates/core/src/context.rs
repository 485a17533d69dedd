//! 탐지 컨텍스트: 룰이 참조하는 공유 네트워크 상태의 불변 스냅샷
//!
//! [`DetectionContext`]는 한 번 만들어지면 변경되지 않습니다.
//! 오케스트레이터는 갱신 주기마다 새 값을 만들어 통째로 교체(publish)하고,
//! 각 룰 태스크는 생성 시점의 스냅샷을 `Arc`로 붙잡아 둡니다.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::config::ContextConfig;
use crate::types::MacAddr;

/// 탐지 컨텍스트 스냅샷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionContext {
    /// 게이트웨이 IP 집합
    pub gateway_ips: HashSet<Ipv4Addr>,
    /// 게이트웨이 MAC 집합
    pub gateway_macs: HashSet<MacAddr>,
    /// 신뢰 호스트 테이블 (IP -> MAC)
    pub trusted_hosts: HashMap<Ipv4Addr, MacAddr>,
    /// 관측된 ARP 테이블 (IP -> MAC)
    pub arp_table: HashMap<Ipv4Addr, MacAddr>,
    /// 발행 세대 번호 (오케스트레이터가 발행할 때마다 1씩 증가)
    pub generation: u64,
    /// 스냅샷 생성 시각
    pub captured_at: SystemTime,
}

impl DetectionContext {
    /// 비어 있는 컨텍스트를 생성합니다.
    pub fn empty() -> Self {
        Self {
            gateway_ips: HashSet::new(),
            gateway_macs: HashSet::new(),
            trusted_hosts: HashMap::new(),
            arp_table: HashMap::new(),
            generation: 0,
            captured_at: SystemTime::now(),
        }
    }

    /// 게이트웨이를 추가합니다.
    pub fn with_gateway(mut self, ip: Ipv4Addr, mac: MacAddr) -> Self {
        self.gateway_ips.insert(ip);
        self.gateway_macs.insert(mac);
        self
    }

    /// 신뢰 호스트를 추가합니다.
    pub fn with_trusted_host(mut self, ip: Ipv4Addr, mac: MacAddr) -> Self {
        self.trusted_hosts.insert(ip, mac);
        self
    }

    /// ARP 테이블 항목을 추가합니다.
    pub fn with_arp_entry(mut self, ip: Ipv4Addr, mac: MacAddr) -> Self {
        self.arp_table.insert(ip, mac);
        self
    }

    /// 발행 세대를 지정합니다.
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// 설정의 정적 항목(게이트웨이, 신뢰 호스트)으로 컨텍스트를 생성합니다.
    pub fn from_config(config: &ContextConfig) -> Self {
        let mut context = Self::empty();
        context.gateway_ips.extend(config.gateway_ips.iter().copied());
        context.gateway_macs.extend(config.gateway_macs.iter().copied());
        context.trusted_hosts.extend(
            config
                .trusted_hosts
                .iter()
                .map(|host| (host.ip, host.mac)),
        );
        context
    }

    /// 게이트웨이 IP인지 확인합니다.
    pub fn is_gateway_ip(&self, ip: &Ipv4Addr) -> bool {
        self.gateway_ips.contains(ip)
    }

    /// IP에 대해 알려진 MAC을 찾습니다 (신뢰 호스트 우선, 그다음 ARP 테이블).
    pub fn expected_mac(&self, ip: &Ipv4Addr) -> Option<MacAddr> {
        self.trusted_hosts
            .get(ip)
            .or_else(|| self.arp_table.get(ip))
            .copied()
    }
}

impl Default for DetectionContext {
    fn default() -> Self {
        Self::empty()
    }
}
