//! 설정 관리: arpwarden.toml 파싱 및 런타임 설정
//!
//! [`ArpWardenConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선, 데몬에서 적용)
//! 2. 환경변수 (`ARPWARDEN_ENGINE_MAX_WORKERS=32` 형식)
//! 3. 설정 파일 (`arpwarden.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), arpwarden_core::error::ArpWardenError> {
//! use arpwarden_core::config::ArpWardenConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ArpWardenConfig::load("arpwarden.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ArpWardenConfig::parse("[engine]\nmax_workers = 8")?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ArpWardenError, ConfigError};
use crate::types::MacAddr;

/// 룰/태스크 우선순위 하한
pub const MIN_PRIORITY: i32 = 0;

/// 룰/태스크 우선순위 상한
pub const MAX_PRIORITY: i32 = 10;

/// 사용 가능한 CPU 수를 반환합니다 (조회 실패 시 4).
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// arpwarden 통합 설정
///
/// `arpwarden.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArpWardenConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 룰 평가 엔진 설정
    #[serde(default)]
    pub engine: EngineConfig,
    /// 정적 탐지 컨텍스트 설정
    #[serde(default)]
    pub context: ContextConfig,
}

impl ArpWardenConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ArpWardenError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ArpWardenError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ArpWardenError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ArpWardenError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ArpWardenError> {
        toml::from_str(toml_str).map_err(|e| {
            ArpWardenError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `ARPWARDEN_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "ARPWARDEN_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "ARPWARDEN_GENERAL_LOG_FORMAT");

        // Engine
        let e = &mut self.engine;
        override_usize(&mut e.worker_count, "ARPWARDEN_ENGINE_WORKER_COUNT");
        override_usize(&mut e.min_workers, "ARPWARDEN_ENGINE_MIN_WORKERS");
        override_usize(&mut e.max_workers, "ARPWARDEN_ENGINE_MAX_WORKERS");
        override_usize(&mut e.batch_size, "ARPWARDEN_ENGINE_BATCH_SIZE");
        override_f64(&mut e.batch_timeout_secs, "ARPWARDEN_ENGINE_BATCH_TIMEOUT_SECS");
        override_usize(&mut e.sub_batch_size, "ARPWARDEN_ENGINE_SUB_BATCH_SIZE");
        override_u64(&mut e.memory_limit_mb, "ARPWARDEN_ENGINE_MEMORY_LIMIT_MB");
        override_f64(
            &mut e.scale_up_threshold,
            "ARPWARDEN_ENGINE_SCALE_UP_THRESHOLD",
        );
        override_f64(
            &mut e.scale_down_threshold,
            "ARPWARDEN_ENGINE_SCALE_DOWN_THRESHOLD",
        );
        override_f64(
            &mut e.scaling_cooldown_secs,
            "ARPWARDEN_ENGINE_SCALING_COOLDOWN_SECS",
        );
        override_f64(
            &mut e.context_update_interval_secs,
            "ARPWARDEN_ENGINE_CONTEXT_UPDATE_INTERVAL_SECS",
        );
        override_string(&mut e.executor, "ARPWARDEN_ENGINE_EXECUTOR");
        override_usize(
            &mut e.max_concurrent_tasks,
            "ARPWARDEN_ENGINE_MAX_CONCURRENT_TASKS",
        );

        // Context
        override_string(
            &mut self.context.arp_table_path,
            "ARPWARDEN_CONTEXT_ARP_TABLE_PATH",
        );
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ArpWardenError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.engine.validate()
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ArpWardenError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
        }
    }
}

/// 룰 평가 엔진 설정
///
/// 워커 풀, 게이트 스케줄러, 패킷 배처, 메모리 거버너, 룰 프로세서,
/// 오케스트레이터가 각자 필요한 필드만 읽어 사용합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 초기 워커 수 (`[min_workers, max_workers]` 범위로 보정)
    pub worker_count: usize,
    /// 최소 워커 수
    pub min_workers: usize,
    /// 최대 워커 수
    pub max_workers: usize,
    /// 초기 배치 크기
    pub batch_size: usize,
    /// 적응형 배치 크기 하한
    pub min_batch_size: usize,
    /// 적응형 배치 크기 상한
    pub max_batch_size: usize,
    /// 배치 타임아웃 (초)
    pub batch_timeout_secs: f64,
    /// 룰 팬아웃 시 서브 배치 크기
    pub sub_batch_size: usize,
    /// 프로세스 메모리 한도 (MB)
    pub memory_limit_mb: u64,
    /// 메모리 샘플링 주기 (초)
    pub memory_check_interval_secs: f64,
    /// 스케일 업 부하 임계값 (active / total)
    pub scale_up_threshold: f64,
    /// 스케일 다운 부하 임계값
    pub scale_down_threshold: f64,
    /// 스케일러 샘플링 주기 (초)
    pub scaling_interval_secs: f64,
    /// 스케일링 동작 사이 최소 간격 (초)
    pub scaling_cooldown_secs: f64,
    /// 티어별 큐 최대 용량
    pub queue_capacity: usize,
    /// 종료 시 워커 스레드 join 대기 한도 (초)
    pub shutdown_timeout_secs: f64,
    /// 컨텍스트 갱신 최소 간격 (초)
    pub context_update_interval_secs: f64,
    /// 실행기 종류 (elastic, gated)
    pub executor: String,
    /// 게이트 스케줄러의 동시 실행 상한
    pub max_concurrent_tasks: usize,
    /// 우선순위 맵에 없는 룰의 기본 우선순위
    pub default_rule_priority: i32,
    /// 룰 이름 -> 우선순위
    pub rule_priority_map: BTreeMap<String, i32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = cpu_count();
        Self {
            worker_count: cpus,
            min_workers: 2,
            max_workers: cpus * 4,
            batch_size: 50,
            min_batch_size: 10,
            max_batch_size: 200,
            batch_timeout_secs: 1.0,
            sub_batch_size: 25,
            memory_limit_mb: 512,
            memory_check_interval_secs: 10.0,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            scaling_interval_secs: 2.0,
            scaling_cooldown_secs: 10.0,
            queue_capacity: 10_000,
            shutdown_timeout_secs: 5.0,
            context_update_interval_secs: 5.0,
            executor: "elastic".to_owned(),
            max_concurrent_tasks: cpus,
            default_rule_priority: 5,
            rule_priority_map: default_rule_priorities(),
        }
    }
}

/// 운영상 중요한 룰(MITM 등)이 값싼 룰(gratuitous ARP 등)보다 앞서도록 하는 기본 맵
fn default_rule_priorities() -> BTreeMap<String, i32> {
    [
        ("mitm_detection", 10),
        ("gateway_impersonation", 9),
        ("arp_spoofing", 8),
        ("arp_flood", 6),
        ("gratuitous_arp", 3),
    ]
    .into_iter()
    .map(|(name, p)| (name.to_owned(), p))
    .collect()
}

impl EngineConfig {
    /// 엔진 설정의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ArpWardenError> {
        if self.min_workers == 0 {
            return Err(invalid("engine.min_workers", "must be at least 1"));
        }
        if self.min_workers > self.max_workers {
            return Err(invalid(
                "engine.max_workers",
                format!("must be >= min_workers ({})", self.min_workers),
            ));
        }
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(invalid(
                "engine.min_batch_size",
                "must be in 1..=max_batch_size",
            ));
        }
        if self.batch_size == 0 {
            return Err(invalid("engine.batch_size", "must be greater than 0"));
        }
        if self.sub_batch_size == 0 {
            return Err(invalid("engine.sub_batch_size", "must be greater than 0"));
        }
        if self.memory_limit_mb == 0 {
            return Err(invalid("engine.memory_limit_mb", "must be greater than 0"));
        }
        if self.queue_capacity == 0 {
            return Err(invalid("engine.queue_capacity", "must be greater than 0"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(invalid(
                "engine.max_concurrent_tasks",
                "must be greater than 0",
            ));
        }

        for (field, value) in [
            ("engine.scale_up_threshold", self.scale_up_threshold),
            ("engine.scale_down_threshold", self.scale_down_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(invalid(field, "must be in (0, 1]"));
            }
        }
        if self.scale_down_threshold >= self.scale_up_threshold {
            return Err(invalid(
                "engine.scale_down_threshold",
                "must be lower than scale_up_threshold",
            ));
        }

        for (field, value) in [
            ("engine.batch_timeout_secs", self.batch_timeout_secs),
            (
                "engine.memory_check_interval_secs",
                self.memory_check_interval_secs,
            ),
            ("engine.scaling_interval_secs", self.scaling_interval_secs),
            ("engine.shutdown_timeout_secs", self.shutdown_timeout_secs),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(field, "must be a positive number of seconds"));
            }
        }
        for (field, value) in [
            ("engine.scaling_cooldown_secs", self.scaling_cooldown_secs),
            (
                "engine.context_update_interval_secs",
                self.context_update_interval_secs,
            ),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(field, "must be zero or a positive number of seconds"));
            }
        }

        let valid_executors = ["elastic", "gated"];
        if !valid_executors.contains(&self.executor.as_str()) {
            return Err(invalid(
                "engine.executor",
                format!("must be one of: {}", valid_executors.join(", ")),
            ));
        }

        let range = MIN_PRIORITY..=MAX_PRIORITY;
        if !range.contains(&self.default_rule_priority) {
            return Err(invalid(
                "engine.default_rule_priority",
                format!("must be in {MIN_PRIORITY}..={MAX_PRIORITY}"),
            ));
        }
        if let Some((name, p)) = self
            .rule_priority_map
            .iter()
            .find(|(_, p)| !range.contains(p))
        {
            return Err(invalid(
                "engine.rule_priority_map",
                format!("rule '{name}' has priority {p}, must be in {MIN_PRIORITY}..={MAX_PRIORITY}"),
            ));
        }

        Ok(())
    }

    /// 룰 이름에 해당하는 우선순위를 반환합니다 (맵에 없으면 기본값).
    pub fn priority_for(&self, rule_name: &str) -> i32 {
        self.rule_priority_map
            .get(rule_name)
            .copied()
            .unwrap_or(self.default_rule_priority)
    }
}

/// 신뢰 호스트 항목
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustedHost {
    /// 호스트 IP
    pub ip: Ipv4Addr,
    /// 호스트 MAC
    pub mac: MacAddr,
}

/// 정적 탐지 컨텍스트 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// 게이트웨이 IP 목록
    pub gateway_ips: Vec<Ipv4Addr>,
    /// 게이트웨이 MAC 목록
    pub gateway_macs: Vec<MacAddr>,
    /// 신뢰 호스트 목록
    pub trusted_hosts: Vec<TrustedHost>,
    /// 커널 ARP 테이블 경로
    pub arp_table_path: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            gateway_ips: Vec::new(),
            gateway_macs: Vec::new(),
            trusted_hosts: Vec::new(),
            arp_table_path: "/proc/net/arp".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_f64(target: &mut f64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<f64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse f64 from env var, ignoring"
            ),
        }
    }
}
