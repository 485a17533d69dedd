//! 도메인 타입: 시스템 전역에서 사용되는 공통 타입
//!
//! 패킷 공급자가 넘겨주는 파싱 완료된 ARP 레코드와
//! 룰이 돌려주는 매칭 결과를 정의합니다.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// 48비트 MAC 주소
///
/// 직렬화 시 `aa:bb:cc:dd:ee:ff` 문자열 형식을 사용합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// 브로드캐스트 주소 (`ff:ff:ff:ff:ff:ff`)
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);

    /// 모든 옥텟이 0인 주소 (ARP 요청의 target 필드에 흔히 쓰임)
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    /// 브로드캐스트 주소인지 확인합니다.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    /// 0 주소인지 확인합니다.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in &mut octets {
            let part = parts
                .next()
                .ok_or_else(|| format!("invalid mac address '{s}': too few octets"))?;
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| format!("invalid mac address '{s}': bad octet '{part}'"))?;
        }
        if parts.next().is_some() {
            return Err(format!("invalid mac address '{s}': too many octets"));
        }
        Ok(MacAddr(octets))
    }
}

impl TryFrom<String> for MacAddr {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MacAddr> for String {
    fn from(mac: MacAddr) -> Self {
        mac.to_string()
    }
}

/// ARP 오퍼레이션 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArpOperation {
    /// who-has 요청 (opcode 1)
    Request,
    /// is-at 응답 (opcode 2)
    Reply,
}

impl fmt::Display for ArpOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Reply => write!(f, "reply"),
        }
    }
}

/// 파싱이 끝난 ARP 패킷 레코드
///
/// 캡처 계층이 넘겨주는 `(src_mac, src_ip, dst_mac, dst_ip, packet_type, timestamp)` 튜플입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArpPacket {
    /// 송신자 하드웨어 주소
    pub src_mac: MacAddr,
    /// 송신자 프로토콜 주소
    pub src_ip: Ipv4Addr,
    /// 대상 하드웨어 주소
    pub dst_mac: MacAddr,
    /// 대상 프로토콜 주소
    pub dst_ip: Ipv4Addr,
    /// 요청/응답 구분
    pub packet_type: ArpOperation,
    /// 캡처 시각 (리플레이 파일에 없으면 수신 시각)
    #[serde(default = "SystemTime::now")]
    pub timestamp: SystemTime,
}

impl ArpPacket {
    /// 현재 시각을 타임스탬프로 갖는 패킷을 생성합니다.
    pub fn new(
        src_mac: MacAddr,
        src_ip: Ipv4Addr,
        dst_mac: MacAddr,
        dst_ip: Ipv4Addr,
        packet_type: ArpOperation,
    ) -> Self {
        Self {
            src_mac,
            src_ip,
            dst_mac,
            dst_ip,
            packet_type,
            timestamp: SystemTime::now(),
        }
    }

    /// 송신자와 대상 IP가 같은 gratuitous ARP인지 확인합니다.
    pub fn is_gratuitous(&self) -> bool {
        self.src_ip == self.dst_ip
    }
}

impl fmt::Display for ArpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) -> {} ({})",
            self.packet_type, self.src_ip, self.src_mac, self.dst_ip, self.dst_mac,
        )
    }
}

/// 심각도 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 정보성 이벤트
    #[default]
    Info,
    /// 낮은 심각도
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// 룰 매칭 결과 상세
///
/// 룰 함수가 매칭을 보고할 때 돌려주는 값이며,
/// 알림 싱크에 그대로 전달됩니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    /// 심각도
    pub severity: Severity,
    /// 사람이 읽을 수 있는 설명
    pub description: String,
    /// 추가 필드 (key-value 쌍)
    pub fields: Vec<(String, String)>,
    /// 배치 룰인 경우, 매칭을 유발한 패킷의 배치 내 인덱스
    pub packet_index: Option<usize>,
}

impl MatchDetails {
    /// 새 매칭 결과를 생성합니다.
    pub fn new(severity: Severity, description: impl Into<String>) -> Self {
        Self {
            severity,
            description: description.into(),
            fields: Vec::new(),
            packet_index: None,
        }
    }

    /// 추가 필드를 붙입니다.
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// 매칭을 유발한 패킷 인덱스를 지정합니다.
    pub fn at_packet(mut self, index: usize) -> Self {
        self.packet_index = Some(index);
        self
    }

    /// 필드 값을 조회합니다.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "AA:bb:0c:00:ff:01".parse().unwrap();
        assert_eq!(mac.0, [0xaa, 0xbb, 0x0c, 0x00, 0xff, 0x01]);
        assert_eq!(mac.to_string(), "aa:bb:0c:00:ff:01");
    }

    #[test]
    fn mac_parse_accepts_dashes() {
        let mac: MacAddr = "00-11-22-33-44-55".parse().unwrap();
        assert_eq!(mac.0[5], 0x55);
    }

    #[test]
    fn mac_parse_rejects_malformed() {
        assert!("00:11:22:33:44".parse::<MacAddr>().is_err());
        assert!("00:11:22:33:44:55:66".parse::<MacAddr>().is_err());
        assert!("00:11:22:33:44:zz".parse::<MacAddr>().is_err());
    }

    #[test]
    fn packet_deserializes_from_json_line_without_timestamp() {
        let line = r#"{"src_mac":"00:11:22:33:44:55","src_ip":"10.0.0.1","dst_mac":"ff:ff:ff:ff:ff:ff","dst_ip":"10.0.0.1","packet_type":"reply"}"#;
        let packet: ArpPacket = serde_json::from_str(line).unwrap();
        assert_eq!(packet.packet_type, ArpOperation::Reply);
        assert!(packet.dst_mac.is_broadcast());
        assert!(packet.is_gratuitous());
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn match_details_fields() {
        let details = MatchDetails::new(Severity::High, "gateway mac changed")
            .with_field("expected", "00:11:22:33:44:55")
            .at_packet(2);
        assert_eq!(details.field("expected"), Some("00:11:22:33:44:55"));
        assert_eq!(details.field("missing"), None);
        assert_eq!(details.packet_index, Some(2));
    }
}
