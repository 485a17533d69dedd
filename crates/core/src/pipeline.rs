//! 협력자 trait: 엔진 바깥에서 주입되는 확장 포인트 정의
//!
//! 엔진은 룰의 탐지 논리를 알지 못합니다. 룰은 패킷(또는 배치)과 컨텍스트를 받아
//! 매칭 여부만 돌려주는 불투명한 함수로 취급됩니다.
//!
//! 클로저도 그대로 사용할 수 있도록 각 trait에 blanket 구현을 제공합니다.

use serde::Serialize;

use crate::context::DetectionContext;
use crate::error::DetectionError;
use crate::types::{ArpPacket, MatchDetails};

/// 룰 평가 결과 (`None`이면 매칭 없음)
pub type RuleOutcome = Result<Option<MatchDetails>, DetectionError>;

/// 패킷 단위 탐지 룰
///
/// 컨텍스트에 대해 부작용이 없어야 하며, 호출이 끝난 뒤 컨텍스트 참조를 보관하지 않아야 합니다.
pub trait PacketRule: Send + Sync {
    /// 패킷 하나를 평가합니다.
    fn check(&self, packet: &ArpPacket, context: &DetectionContext) -> RuleOutcome;
}

impl<F> PacketRule for F
where
    F: Fn(&ArpPacket, &DetectionContext) -> RuleOutcome + Send + Sync,
{
    fn check(&self, packet: &ArpPacket, context: &DetectionContext) -> RuleOutcome {
        self(packet, context)
    }
}

/// 배치 단위 탐지 룰 (flood 탐지처럼 여러 패킷을 함께 봐야 하는 경우)
///
/// 매칭 시 [`MatchDetails::packet_index`]로 원인 패킷을 지정할 수 있습니다.
/// 지정하지 않으면 배치의 마지막 패킷이 알림에 사용됩니다.
pub trait BatchRule: Send + Sync {
    /// 서브 배치 하나를 평가합니다.
    fn check_batch(&self, packets: &[ArpPacket], context: &DetectionContext) -> RuleOutcome;
}

impl<F> BatchRule for F
where
    F: Fn(&[ArpPacket], &DetectionContext) -> RuleOutcome + Send + Sync,
{
    fn check_batch(&self, packets: &[ArpPacket], context: &DetectionContext) -> RuleOutcome {
        self(packets, context)
    }
}

/// 알림 싱크
///
/// 매칭 하나당 한 번, 워커 스레드에서 호출됩니다. 블로킹하지 않아야 합니다.
/// 반환된 에러는 로그로 남고 삼켜집니다.
pub trait AlertSink: Send + Sync {
    /// 매칭을 전달받습니다.
    fn on_match(
        &self,
        rule_name: &str,
        packet: &ArpPacket,
        details: &MatchDetails,
    ) -> Result<(), DetectionError>;
}

impl<F> AlertSink for F
where
    F: Fn(&str, &ArpPacket, &MatchDetails) -> Result<(), DetectionError> + Send + Sync,
{
    fn on_match(
        &self,
        rule_name: &str,
        packet: &ArpPacket,
        details: &MatchDetails,
    ) -> Result<(), DetectionError> {
        self(rule_name, packet, details)
    }
}

/// 컨텍스트 공급자
///
/// 호출 시점의 게이트웨이, 신뢰 호스트, ARP 테이블을 부작용 없이 스냅샷으로 돌려줍니다.
pub trait ContextProvider: Send + Sync {
    /// 현재 상태의 스냅샷을 만듭니다.
    fn snapshot(&self) -> Result<DetectionContext, DetectionError>;
}

/// 고정된 컨텍스트를 돌려주는 공급자 (테스트 및 정적 배포용)
#[derive(Debug, Clone, Default)]
pub struct StaticContextProvider {
    context: DetectionContext,
}

impl StaticContextProvider {
    /// 주어진 컨텍스트를 항상 돌려주는 공급자를 생성합니다.
    pub fn new(context: DetectionContext) -> Self {
        Self { context }
    }
}

impl ContextProvider for StaticContextProvider {
    fn snapshot(&self) -> Result<DetectionContext, DetectionError> {
        Ok(self.context.clone())
    }
}

/// 컴포넌트 헬스 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// 정상 동작
    Healthy,
    /// 동작하지만 성능 저하 (사유 포함)
    Degraded(String),
    /// 동작 불가 (사유 포함)
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArpOperation, MacAddr, Severity};
    use std::net::Ipv4Addr;

    fn packet() -> ArpPacket {
        ArpPacket::new(
            MacAddr([0, 1, 2, 3, 4, 5]),
            Ipv4Addr::new(10, 0, 0, 2),
            MacAddr::ZERO,
            Ipv4Addr::new(10, 0, 0, 1),
            ArpOperation::Request,
        )
    }

    #[test]
    fn closure_acts_as_packet_rule() {
        let rule = |p: &ArpPacket, _ctx: &DetectionContext| -> RuleOutcome {
            Ok(p.is_gratuitous().then(|| MatchDetails::new(Severity::Low, "gratuitous")))
        };
        let outcome = rule.check(&packet(), &DetectionContext::empty()).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn closure_acts_as_batch_rule() {
        let rule = |ps: &[ArpPacket], _ctx: &DetectionContext| -> RuleOutcome {
            Ok((ps.len() > 1).then(|| MatchDetails::new(Severity::Medium, "burst")))
        };
        let batch = vec![packet(), packet()];
        let outcome = rule
            .check_batch(&batch, &DetectionContext::empty())
            .unwrap();
        assert!(outcome.is_some());
    }

    #[test]
    fn static_provider_returns_clone() {
        let ctx = DetectionContext::empty().with_generation(7);
        let provider = StaticContextProvider::new(ctx.clone());
        assert_eq!(provider.snapshot().unwrap(), ctx);
    }

    #[test]
    fn health_status_helpers() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Unhealthy("stopped".to_owned()).is_unhealthy());
        assert!(!HealthStatus::Degraded("slow".to_owned()).is_healthy());
    }
}
