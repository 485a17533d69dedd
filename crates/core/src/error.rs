//! 에러 타입: 도메인별 에러 정의

/// arpwarden 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum ArpWardenError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 탐지 협력자(룰, 알림 싱크, 컨텍스트 공급자) 에러
    #[error("detection error: {0}")]
    Detection(#[from] DetectionError),

    /// 룰 평가 엔진 에러
    #[error("engine error: {0}")]
    Engine(#[from] EngineFailure),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 탐지 협력자가 반환하는 에러
///
/// 룰 함수, 알림 콜백, 컨텍스트 공급자 구현체는 이 타입으로 실패를 보고합니다.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// 룰 평가 실패
    #[error("rule error: {0}")]
    Rule(String),

    /// 알림 콜백 실패
    #[error("callback error: {0}")]
    Callback(String),

    /// 컨텍스트 스냅샷을 만들 수 없음
    #[error("context unavailable: {0}")]
    ContextUnavailable(String),
}

/// 엔진 계층 에러의 요약
///
/// 엔진 크레이트의 상세 에러를 상위 레이어로 전파할 때 사용합니다.
#[derive(Debug, thiserror::Error)]
pub enum EngineFailure {
    /// 잘못된 공개 API 호출 (중복 ID, 정지된 풀에 제출 등)
    #[error("rejected: {0}")]
    Rejected(String),

    /// 태스크 실행 실패
    #[error("task failed: {0}")]
    Task(String),

    /// 엔진 초기화 실패
    #[error("init failed: {0}")]
    InitFailed(String),
}
