//! 엔진 컴포넌트 설정
//!
//! 각 컴포넌트 설정은 core의 [`EngineConfig`]에서 파생됩니다.
//! core 설정에 없는 확장 필드(폴링 주기, 이력 한도 등)는 기본값이 적용됩니다.
//!
//! # 사용 예시
//! ```ignore
//! use arpwarden_core::config::ArpWardenConfig;
//! use arpwarden_engine::config::PoolConfig;
//!
//! let core_config = ArpWardenConfig::default();
//! let config = PoolConfig::from_core(&core_config.engine);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use arpwarden_core::config::{EngineConfig, MAX_PRIORITY, MIN_PRIORITY};

use crate::error::EngineError;
use crate::scaling::ScalingPolicy;

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn config_error(field: &str, reason: impl Into<String>) -> EngineError {
    EngineError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 적응형 워커 풀 설정
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 시작 시 워커 수 (`[min_workers, max_workers]`로 보정)
    pub initial_workers: usize,
    /// 스케일링 정책 (워커 수 범위 포함)
    pub scaling: ScalingPolicy,
    /// 스케일러 샘플링 주기
    pub scaling_interval: Duration,
    /// 티어별 큐 용량
    pub queue_capacity: usize,
    /// 큐가 비었을 때 워커의 normal 큐 블로킹 대기 시간
    pub idle_wait: Duration,
    /// 종료 시 워커 join 대기 한도
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_workers: 4,
            scaling: ScalingPolicy::default(),
            scaling_interval: Duration::from_secs(2),
            queue_capacity: 10_000,
            idle_wait: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    /// core 엔진 설정에서 풀 설정을 생성합니다.
    pub fn from_core(core: &EngineConfig) -> Self {
        Self {
            initial_workers: core.worker_count,
            scaling: ScalingPolicy {
                min_workers: core.min_workers,
                max_workers: core.max_workers,
                scale_up_threshold: core.scale_up_threshold,
                scale_down_threshold: core.scale_down_threshold,
                cooldown: secs(core.scaling_cooldown_secs),
                ..ScalingPolicy::default()
            },
            scaling_interval: secs(core.scaling_interval_secs),
            queue_capacity: core.queue_capacity,
            shutdown_timeout: secs(core.shutdown_timeout_secs),
            ..Self::default()
        }
    }

    /// 범위로 보정된 초기 워커 수
    pub fn clamped_initial_workers(&self) -> usize {
        self.initial_workers
            .clamp(self.scaling.min_workers, self.scaling.max_workers)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), EngineError> {
        let s = &self.scaling;
        if s.min_workers == 0 {
            return Err(config_error("min_workers", "must be at least 1"));
        }
        if s.min_workers > s.max_workers {
            return Err(config_error(
                "max_workers",
                format!("must be >= min_workers ({})", s.min_workers),
            ));
        }
        if s.max_step == 0 {
            return Err(config_error("max_step", "must be at least 1"));
        }
        if !(s.scale_down_threshold > 0.0
            && s.scale_down_threshold < s.scale_up_threshold
            && s.scale_up_threshold <= 1.0)
        {
            return Err(config_error(
                "scale_thresholds",
                "must satisfy 0 < scale_down < scale_up <= 1",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(config_error("queue_capacity", "must be greater than 0"));
        }
        if self.scaling_interval.is_zero() || self.idle_wait.is_zero() {
            return Err(config_error(
                "scaling_interval",
                "polling intervals must be greater than 0",
            ));
        }
        Ok(())
    }

    /// 빌더를 생성합니다.
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }
}

/// [`PoolConfig`] 빌더 (주로 테스트에서 짧은 주기를 지정할 때 사용)
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// 기본값으로 시작합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 워커 수 범위와 초기 워커 수를 지정합니다.
    pub fn workers(mut self, initial: usize, min: usize, max: usize) -> Self {
        self.config.initial_workers = initial;
        self.config.scaling.min_workers = min;
        self.config.scaling.max_workers = max;
        self
    }

    /// 스케일링 임계값을 지정합니다.
    pub fn thresholds(mut self, scale_up: f64, scale_down: f64) -> Self {
        self.config.scaling.scale_up_threshold = scale_up;
        self.config.scaling.scale_down_threshold = scale_down;
        self
    }

    /// 스케일링 쿨다운을 지정합니다.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.config.scaling.cooldown = cooldown;
        self
    }

    /// 스케일러 샘플링 주기를 지정합니다.
    pub fn scaling_interval(mut self, interval: Duration) -> Self {
        self.config.scaling_interval = interval;
        self
    }

    /// 티어별 큐 용량을 지정합니다.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// 종료 시 join 대기 한도를 지정합니다.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// 설정을 검증하고 반환합니다.
    pub fn build(self) -> Result<PoolConfig, EngineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// 게이트 스케줄러 설정
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// 동시 실행 상한
    pub max_concurrent_tasks: usize,
    /// 대기 큐 용량
    pub queue_capacity: usize,
    /// 완료 이력 최대 보관 수 (초과 시 오래된 것부터 제거)
    pub history_limit: usize,
    /// 스케줄러 스레드의 대기 주기
    pub poll_interval: Duration,
    /// 강제 종료 시 실행 중 태스크 대기 한도
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            queue_capacity: 10_000,
            history_limit: 10_000,
            poll_interval: Duration::from_millis(50),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl SchedulerConfig {
    /// core 엔진 설정에서 스케줄러 설정을 생성합니다.
    pub fn from_core(core: &EngineConfig) -> Self {
        Self {
            max_concurrent_tasks: core.max_concurrent_tasks,
            queue_capacity: core.queue_capacity,
            shutdown_timeout: secs(core.shutdown_timeout_secs),
            ..Self::default()
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_concurrent_tasks == 0 {
            return Err(config_error(
                "max_concurrent_tasks",
                "must be greater than 0",
            ));
        }
        if self.queue_capacity == 0 {
            return Err(config_error("queue_capacity", "must be greater than 0"));
        }
        if self.poll_interval.is_zero() {
            return Err(config_error("poll_interval", "must be greater than 0"));
        }
        Ok(())
    }
}

/// 패킷 배처 설정
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// 시작 배치 크기
    pub initial_batch_size: usize,
    /// 적응형 배치 크기 하한
    pub min_batch_size: usize,
    /// 적응형 배치 크기 상한
    pub max_batch_size: usize,
    /// 첫 패킷 이후 이 시간이 지나면 봉인
    pub batch_timeout: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            initial_batch_size: 50,
            min_batch_size: 10,
            max_batch_size: 200,
            batch_timeout: Duration::from_secs(1),
        }
    }
}

impl BatcherConfig {
    /// core 엔진 설정에서 배처 설정을 생성합니다.
    pub fn from_core(core: &EngineConfig) -> Self {
        Self {
            initial_batch_size: core.batch_size,
            min_batch_size: core.min_batch_size,
            max_batch_size: core.max_batch_size,
            batch_timeout: secs(core.batch_timeout_secs),
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.min_batch_size == 0 || self.min_batch_size > self.max_batch_size {
            return Err(config_error(
                "min_batch_size",
                "must be in 1..=max_batch_size",
            ));
        }
        if self.initial_batch_size == 0 {
            return Err(config_error("batch_size", "must be greater than 0"));
        }
        if self.batch_timeout.is_zero() {
            return Err(config_error("batch_timeout", "must be greater than 0"));
        }
        Ok(())
    }
}

/// 메모리 거버너 설정
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// 프로세스 메모리 한도 (바이트)
    pub memory_limit_bytes: u64,
    /// 샘플링 주기
    pub check_interval: Duration,
    /// 이 비율 초과 시 배치 크기 축소
    pub shrink_above: f64,
    /// 이 비율 미만 시 배치 크기 확대
    pub grow_below: f64,
    /// 이 비율 초과 시 회수 훅 실행
    pub reclaim_above: f64,
    /// 한 번에 조정하는 비율
    pub adjust_factor: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            memory_limit_bytes: 512 * 1024 * 1024,
            check_interval: Duration::from_secs(10),
            shrink_above: 0.8,
            grow_below: 0.5,
            reclaim_above: 0.9,
            adjust_factor: 0.25,
        }
    }
}

impl GovernorConfig {
    /// core 엔진 설정에서 거버너 설정을 생성합니다.
    pub fn from_core(core: &EngineConfig) -> Self {
        Self {
            memory_limit_bytes: core.memory_limit_mb.saturating_mul(1024 * 1024),
            check_interval: secs(core.memory_check_interval_secs),
            ..Self::default()
        }
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.memory_limit_bytes == 0 {
            return Err(config_error("memory_limit_mb", "must be greater than 0"));
        }
        if self.check_interval.is_zero() {
            return Err(config_error(
                "memory_check_interval",
                "must be greater than 0",
            ));
        }
        if !(self.grow_below < self.shrink_above && self.shrink_above <= self.reclaim_above) {
            return Err(config_error(
                "memory_watermarks",
                "must satisfy grow_below < shrink_above <= reclaim_above",
            ));
        }
        if !(self.adjust_factor > 0.0 && self.adjust_factor < 1.0) {
            return Err(config_error("adjust_factor", "must be in (0, 1)"));
        }
        Ok(())
    }
}

/// 룰 프로세서 설정
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// 팬아웃 시 서브 배치 크기
    pub sub_batch_size: usize,
    /// 맵에 없는 룰의 우선순위
    pub default_priority: i32,
    /// 룰 이름 -> 우선순위
    pub priority_map: BTreeMap<String, i32>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: 25,
            default_priority: 5,
            priority_map: BTreeMap::new(),
        }
    }
}

impl ProcessorConfig {
    /// core 엔진 설정에서 프로세서 설정을 생성합니다.
    pub fn from_core(core: &EngineConfig) -> Self {
        Self {
            sub_batch_size: core.sub_batch_size,
            default_priority: core.default_rule_priority,
            priority_map: core.rule_priority_map.clone(),
        }
    }

    /// 룰 이름에 해당하는 우선순위
    pub fn priority_for(&self, rule_name: &str) -> i32 {
        self.priority_map
            .get(rule_name)
            .copied()
            .unwrap_or(self.default_priority)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sub_batch_size == 0 {
            return Err(config_error("sub_batch_size", "must be greater than 0"));
        }
        let range = MIN_PRIORITY..=MAX_PRIORITY;
        if !range.contains(&self.default_priority) {
            return Err(EngineError::InvalidPriority(self.default_priority));
        }
        if let Some(p) = self.priority_map.values().find(|p| !range.contains(p)) {
            return Err(EngineError::InvalidPriority(*p));
        }
        Ok(())
    }
}

/// 오케스트레이터 설정
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 컨텍스트 갱신 최소 간격
    pub context_update_interval: Duration,
    /// 로컬 버퍼 타임아웃 플러시 스레드의 점검 주기
    pub flush_poll_interval: Duration,
    /// `wait_for_completion`의 폴링 주기
    pub completion_poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            context_update_interval: Duration::from_secs(5),
            flush_poll_interval: Duration::from_millis(100),
            completion_poll_interval: Duration::from_millis(10),
        }
    }
}

impl OrchestratorConfig {
    /// core 엔진 설정에서 오케스트레이터 설정을 생성합니다.
    ///
    /// 플러시 점검 주기는 배치 타임아웃의 1/4 (10ms..=250ms)입니다.
    pub fn from_core(core: &EngineConfig) -> Self {
        let flush_poll = secs(core.batch_timeout_secs / 4.0)
            .clamp(Duration::from_millis(10), Duration::from_millis(250));
        Self {
            context_update_interval: secs(core.context_update_interval_secs),
            flush_poll_interval: flush_poll,
            ..Self::default()
        }
    }
}
