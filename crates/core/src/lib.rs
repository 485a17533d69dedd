//! # arpwarden-core
//!
//! arpwarden 공통 크레이트입니다. 도메인 타입, 탐지 협력자 trait,
//! 에러 계층, 설정 로딩, 메트릭 이름을 정의합니다.
//!
//! 룰 평가 엔진(`arpwarden-engine`)과 데몬(`arpwarden-daemon`)이 이 크레이트에 의존합니다.

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ArpWardenError, ConfigError, DetectionError, EngineFailure};

// 설정
pub use config::{ArpWardenConfig, ContextConfig, EngineConfig, GeneralConfig, TrustedHost};

// 컨텍스트
pub use context::DetectionContext;

// 협력자 trait
pub use pipeline::{
    AlertSink, BatchRule, ContextProvider, HealthStatus, PacketRule, RuleOutcome,
    StaticContextProvider,
};

// 도메인 타입
pub use types::{ArpOperation, ArpPacket, MacAddr, MatchDetails, Severity};
