//! 엔진 에러 타입
//!
//! [`EngineError`]는 룰 평가 엔진 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<EngineError> for ArpWardenError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.
//!
//! # 전파 정책
//! - 태스크/콜백 실패는 태스크 상태와 통계, 로그에만 남고 호출자에게 전파되지 않습니다.
//! - 잘못된 공개 API 호출(중복 ID, 범위 밖 우선순위, 정지된 풀, 가득 찬 큐)만
//!   제출 시점에 동기적으로 반환됩니다.

use arpwarden_core::error::{ArpWardenError, ConfigError, DetectionError, EngineFailure};

/// 룰 평가 엔진 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 태스크 실행 실패 (룰 함수가 에러를 반환했거나 panic)
    #[error("task '{task_id}' failed: {reason}")]
    TaskExecution {
        /// 실패한 태스크 ID
        task_id: String,
        /// 실패 사유
        reason: String,
    },

    /// 알림 콜백 실패
    #[error("alert callback failed for rule '{rule}': {reason}")]
    Callback {
        /// 매칭된 룰 이름
        rule: String,
        /// 실패 사유
        reason: String,
    },

    /// 실행 중이 아닌 풀/스케줄러에 제출
    #[error("executor is not running")]
    NotRunning,

    /// 진행 중인 태스크와 ID 충돌
    #[error("duplicate task id: {0}")]
    DuplicateTaskId(String),

    /// 허용 범위 밖의 우선순위
    #[error("invalid priority {0}: must be in 0..=10")]
    InvalidPriority(i32),

    /// 제한 용량 큐가 가득 참 (제출은 블록하지 않음)
    #[error("queue full: capacity {capacity}")]
    QueueFull {
        /// 큐 최대 용량
        capacity: usize,
    },

    /// 같은 이름의 룰이 이미 등록됨
    #[error("rule already registered: {0}")]
    DuplicateRule(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 메모리 압박 (로그 전용, 요청을 실패시키지 않음)
    #[error("resource exhaustion: {usage_bytes} of {limit_bytes} bytes in use")]
    ResourceExhaustion {
        /// 샘플링된 사용량
        usage_bytes: u64,
        /// 설정된 한도
        limit_bytes: u64,
    },

    /// 메모리 샘플링 실패
    #[error("memory sampler error: {0}")]
    Sampler(String),

    /// 협력자(룰, 컨텍스트 공급자) 에러
    #[error(transparent)]
    Detection(#[from] DetectionError),

    /// 스레드 생성 등 I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// 잘못된 공개 API 호출로 인한 거부인지 확인합니다.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotRunning
                | Self::DuplicateTaskId(_)
                | Self::InvalidPriority(_)
                | Self::QueueFull { .. }
                | Self::DuplicateRule(_)
        )
    }
}

impl From<EngineError> for ArpWardenError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Config { field, reason } => {
                ArpWardenError::Config(ConfigError::InvalidValue { field, reason })
            }
            EngineError::Detection(e) => ArpWardenError::Detection(e),
            EngineError::Io(e) => ArpWardenError::Io(e),
            e @ (EngineError::TaskExecution { .. } | EngineError::Callback { .. }) => {
                ArpWardenError::Engine(EngineFailure::Task(e.to_string()))
            }
            e if e.is_rejection() => {
                ArpWardenError::Engine(EngineFailure::Rejected(e.to_string()))
            }
            e => ArpWardenError::Engine(EngineFailure::InitFailed(e.to_string())),
        }
    }
}
