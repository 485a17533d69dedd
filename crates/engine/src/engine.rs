//! 탐지 엔진: 실행기, 배처, 거버너, 룰 프로세서, 오케스트레이터를 하나로 묶는 진입점
//!
//! [`DetectionEngineBuilder`]로 구성하고 `start()` -> `ingest()` -> `shutdown()` 순서로 사용합니다.
//!
//! # 사용 예시
//! ```ignore
//! let engine = DetectionEngineBuilder::new()
//!     .config(config.engine.clone())
//!     .context_provider(provider)
//!     .rule("gateway_impersonation", gateway_rule, None)
//!     .alert_sink(log_sink)
//!     .build()?;
//!
//! engine.start()?;
//! engine.ingest_all(packets)?;
//! engine.wait_for_completion(Duration::from_secs(30));
//! engine.shutdown(true)?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arpwarden_core::config::EngineConfig;
use arpwarden_core::pipeline::{
    AlertSink, BatchRule, ContextProvider, HealthStatus, PacketRule, StaticContextProvider,
};
use arpwarden_core::types::ArpPacket;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::batcher::PacketBatcher;
use crate::config::{
    BatcherConfig, GovernorConfig, OrchestratorConfig, PoolConfig, ProcessorConfig,
    SchedulerConfig,
};
use crate::error::EngineError;
use crate::executor::{ExecutorKind, TaskExecutor};
use crate::governor::{MemoryGovernor, MemorySampler, ProcessMemorySampler};
use crate::orchestrator::{DetectionOrchestrator, OrchestratorStats};
use crate::pool::{PoolStats, WorkerPool};
use crate::processor::{RuleProcessor, RuleStats};
use crate::scheduler::{AdmissionScheduler, SchedulerStats};
use crate::tier::Tier;

/// 큐가 이 비율 이상 차면 Degraded
const QUEUE_DEGRADED_RATIO: f64 = 0.9;

/// 엔진 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Initialized,
    Running,
    Stopped,
}

impl EngineState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// 설정으로 선택된 실행기
enum Executor {
    Elastic(Arc<WorkerPool>),
    Gated(Arc<AdmissionScheduler>),
}

impl Executor {
    fn as_dyn(&self) -> Arc<dyn TaskExecutor> {
        match self {
            Self::Elastic(pool) => Arc::clone(pool) as Arc<dyn TaskExecutor>,
            Self::Gated(scheduler) => Arc::clone(scheduler) as Arc<dyn TaskExecutor>,
        }
    }

    fn start(&self) -> Result<(), EngineError> {
        match self {
            Self::Elastic(pool) => pool.start(),
            Self::Gated(scheduler) => scheduler.start(),
        }
    }

    fn shutdown(&self, drain: bool) -> usize {
        match self {
            Self::Elastic(pool) => pool.shutdown(drain),
            Self::Gated(scheduler) => scheduler.shutdown(drain),
        }
    }

    /// 실행기 전체의 대기열 용량. 풀은 티어마다 `queue_capacity`를 가집니다.
    fn capacity(&self) -> usize {
        match self {
            Self::Elastic(pool) => pool.config().queue_capacity * Tier::ALL.len(),
            Self::Gated(scheduler) => scheduler.config().queue_capacity,
        }
    }

    fn stats(&self) -> ExecutorStats {
        match self {
            Self::Elastic(pool) => ExecutorStats::Elastic(pool.get_stats()),
            Self::Gated(scheduler) => ExecutorStats::Gated(scheduler.get_stats()),
        }
    }
}

/// 실행기 통계
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutorStats {
    /// 적응형 워커 풀
    Elastic(PoolStats),
    /// 게이트 스케줄러
    Gated(SchedulerStats),
}

/// 엔진 전체 통계
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// 엔진 상태
    pub state: &'static str,
    /// 실행기 통계
    pub executor: ExecutorStats,
    /// 오케스트레이터 통계
    pub orchestrator: OrchestratorStats,
    /// 룰별 통계
    pub rules: BTreeMap<String, RuleStats>,
    /// 삼켜진 알림 콜백 에러 수
    pub callback_errors: u64,
    /// 마지막 샘플의 메모리 사용량 (바이트)
    pub memory_usage_bytes: u64,
    /// 마지막 샘플의 메모리 사용률
    pub memory_pressure: f64,
}

type Registration = Box<dyn FnOnce(&RuleProcessor) -> Result<(), EngineError>>;

/// 탐지 엔진 빌더
pub struct DetectionEngineBuilder {
    config: EngineConfig,
    provider: Option<Arc<dyn ContextProvider>>,
    sampler: Option<Arc<dyn MemorySampler>>,
    executor: Option<ExecutorKind>,
    registrations: Vec<Registration>,
}

impl DetectionEngineBuilder {
    /// 기본 설정으로 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            provider: None,
            sampler: None,
            executor: None,
            registrations: Vec::new(),
        }
    }

    /// 엔진 설정을 지정합니다.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// 컨텍스트 공급자를 지정합니다. 지정하지 않으면 빈 정적 컨텍스트를 사용합니다.
    pub fn context_provider<P>(mut self, provider: P) -> Self
    where
        P: ContextProvider + 'static,
    {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// 메모리 샘플러를 지정합니다. 지정하지 않으면 현재 프로세스의 RSS를 읽습니다.
    pub fn memory_sampler<S>(mut self, sampler: S) -> Self
    where
        S: MemorySampler + 'static,
    {
        self.sampler = Some(Arc::new(sampler));
        self
    }

    /// 설정의 `executor` 값 대신 사용할 실행기 종류를 지정합니다.
    pub fn executor(mut self, kind: ExecutorKind) -> Self {
        self.executor = Some(kind);
        self
    }

    /// 패킷 단위 룰을 등록합니다.
    pub fn rule<R>(mut self, name: impl Into<String>, rule: R, priority: Option<i32>) -> Self
    where
        R: PacketRule + 'static,
    {
        let name = name.into();
        self.registrations
            .push(Box::new(move |p: &RuleProcessor| {
                p.register_rule(name, rule, priority)
            }));
        self
    }

    /// 배치 단위 룰을 등록합니다.
    pub fn batch_rule<R>(mut self, name: impl Into<String>, rule: R, priority: Option<i32>) -> Self
    where
        R: BatchRule + 'static,
    {
        let name = name.into();
        self.registrations
            .push(Box::new(move |p: &RuleProcessor| {
                p.register_batch_rule(name, rule, priority)
            }));
        self
    }

    /// 알림 싱크를 추가합니다.
    pub fn alert_sink<S>(mut self, sink: S) -> Self
    where
        S: AlertSink + 'static,
    {
        self.registrations.push(Box::new(move |p: &RuleProcessor| {
            p.add_alert_callback(sink);
            Ok(())
        }));
        self
    }

    /// 엔진을 빌드합니다. 스레드는 `start()`에서 시작됩니다.
    pub fn build(self) -> Result<DetectionEngine, EngineError> {
        self.config
            .validate()
            .map_err(|e| EngineError::Config {
                field: "engine".to_owned(),
                reason: e.to_string(),
            })?;

        let kind = match self.executor {
            Some(kind) => kind,
            None => self.config.executor.parse()?,
        };
        let executor = match kind {
            ExecutorKind::Elastic => Executor::Elastic(Arc::new(WorkerPool::new(
                PoolConfig::from_core(&self.config),
            )?)),
            ExecutorKind::Gated => Executor::Gated(Arc::new(AdmissionScheduler::new(
                SchedulerConfig::from_core(&self.config),
            )?)),
        };

        let batcher = Arc::new(PacketBatcher::new(BatcherConfig::from_core(&self.config))?);
        let processor = Arc::new(RuleProcessor::new(
            ProcessorConfig::from_core(&self.config),
            executor.as_dyn(),
        )?);
        for register in self.registrations {
            register(&processor)?;
        }

        let sampler: Arc<dyn MemorySampler> = match self.sampler {
            Some(sampler) => sampler,
            None => Arc::new(ProcessMemorySampler::new()?),
        };
        let governor = MemoryGovernor::new(
            GovernorConfig::from_core(&self.config),
            sampler,
            Arc::clone(&batcher),
        )?;
        let reclaim_batcher = Arc::clone(&batcher);
        governor.register_reclaim_hook("batcher_buffer", move || reclaim_batcher.shrink_buffer());
        if let Executor::Gated(scheduler) = &executor {
            let scheduler = Arc::clone(scheduler);
            governor.register_reclaim_hook("scheduler_history", move || {
                let keep = scheduler.config().history_limit / 2;
                scheduler.trim_history(keep);
            });
        }

        let provider = self
            .provider
            .unwrap_or_else(|| Arc::new(StaticContextProvider::default()));
        let orchestrator = DetectionOrchestrator::new(
            OrchestratorConfig::from_core(&self.config),
            provider,
            Arc::clone(&batcher),
            Arc::clone(&processor),
        );

        info!(
            executor = %kind,
            rules = processor.rules().len(),
            "detection engine built"
        );
        Ok(DetectionEngine {
            state: Mutex::new(EngineState::Initialized),
            executor,
            governor,
            orchestrator,
            processor,
        })
    }
}

impl Default for DetectionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 탐지 엔진
pub struct DetectionEngine {
    state: Mutex<EngineState>,
    executor: Executor,
    governor: MemoryGovernor,
    orchestrator: DetectionOrchestrator,
    processor: Arc<RuleProcessor>,
}

impl DetectionEngine {
    /// 빌더를 생성합니다.
    pub fn builder() -> DetectionEngineBuilder {
        DetectionEngineBuilder::new()
    }

    /// 실행기, 거버너, 오케스트레이터를 차례로 시작합니다.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if *state == EngineState::Running {
            warn!("detection engine already running");
            return Ok(());
        }
        self.executor.start()?;
        self.governor.start()?;
        self.orchestrator.start()?;
        *state = EngineState::Running;
        info!("detection engine started");
        Ok(())
    }

    /// 패킷 하나를 받아들입니다.
    pub fn ingest(&self, packet: ArpPacket) -> Result<(), EngineError> {
        self.orchestrator.ingest(packet)
    }

    /// 여러 패킷을 받아들입니다. 받아들인 수를 반환합니다.
    pub fn ingest_all<I>(&self, packets: I) -> Result<usize, EngineError>
    where
        I: IntoIterator<Item = ArpPacket>,
    {
        self.orchestrator.ingest_all(packets)
    }

    /// 부분 배치를 제출하고 모든 작업이 끝날 때까지 기다립니다.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        self.orchestrator.wait_for_completion(timeout)
    }

    /// 엔진을 멈춥니다. 폐기된 태스크 수를 반환합니다.
    ///
    /// 남은 버퍼는 항상 제출됩니다. `drain`이 거짓이면 대기 중인 태스크는
    /// 실행되지 않고 실패로 기록됩니다.
    pub fn shutdown(&self, drain: bool) -> Result<usize, EngineError> {
        let mut state = self.state.lock();
        if *state != EngineState::Running {
            return Err(EngineError::NotRunning);
        }
        let flushed = self.orchestrator.shutdown();
        self.governor.stop();
        let discarded = self.executor.shutdown(drain);
        *state = EngineState::Stopped;
        info!(drain, discarded, "detection engine stopped");
        flushed.map(|_| discarded)
    }

    /// 엔진 헬스 상태
    pub fn health(&self) -> HealthStatus {
        match *self.state.lock() {
            EngineState::Initialized => return HealthStatus::Unhealthy("not started".to_owned()),
            EngineState::Stopped => return HealthStatus::Unhealthy("stopped".to_owned()),
            EngineState::Running => {}
        }
        let executor = self.executor.as_dyn();
        if !executor.is_running() {
            return HealthStatus::Unhealthy(format!("{} executor not running", executor.kind()));
        }

        let pressure = self.governor.pressure();
        if pressure > self.governor.config().reclaim_above {
            return HealthStatus::Degraded(format!("memory pressure: {:.1}%", pressure * 100.0));
        }
        let fill = executor.outstanding() as f64 / self.executor.capacity() as f64;
        if fill >= QUEUE_DEGRADED_RATIO {
            return HealthStatus::Degraded(format!("queue utilization high: {:.1}%", fill * 100.0));
        }
        HealthStatus::Healthy
    }

    /// 엔진 통계의 현재 사본
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            state: self.state.lock().as_str(),
            executor: self.executor.stats(),
            orchestrator: self.orchestrator.stats(),
            rules: self.processor.get_stats(),
            callback_errors: self.processor.callback_errors(),
            memory_usage_bytes: self.governor.last_usage_bytes(),
            memory_pressure: self.governor.pressure(),
        }
    }

    /// 룰 프로세서 (실행 중 룰 등록, 통계 초기화용)
    pub fn processor(&self) -> &Arc<RuleProcessor> {
        &self.processor
    }

    /// 오케스트레이터
    pub fn orchestrator(&self) -> &DetectionOrchestrator {
        &self.orchestrator
    }

    /// 메모리 거버너
    pub fn governor(&self) -> &MemoryGovernor {
        &self.governor
    }

    /// 선택된 실행기 종류
    pub fn executor_kind(&self) -> ExecutorKind {
        self.executor.as_dyn().kind()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::thread;

    use arpwarden_core::context::DetectionContext;
    use arpwarden_core::pipeline::RuleOutcome;
    use arpwarden_core::types::{ArpOperation, MacAddr, MatchDetails, Severity};

    use super::*;

    struct FixedSampler(AtomicU64);

    impl MemorySampler for FixedSampler {
        fn sample_bytes(&self) -> Result<u64, EngineError> {
            Ok(self.0.load(Ordering::Relaxed))
        }
    }

    fn small_config(executor: &str) -> EngineConfig {
        EngineConfig {
            worker_count: 2,
            min_workers: 1,
            max_workers: 4,
            max_concurrent_tasks: 2,
            batch_size: 10,
            executor: executor.to_owned(),
            ..EngineConfig::default()
        }
    }

    fn packets(n: u8) -> Vec<ArpPacket> {
        (1..=n)
            .map(|i| {
                ArpPacket::new(
                    MacAddr([2, 0, 0, 0, 0, i]),
                    Ipv4Addr::new(10, 1, 0, i),
                    MacAddr::ZERO,
                    Ipv4Addr::new(10, 1, 0, 254),
                    ArpOperation::Request,
                )
            })
            .collect()
    }

    fn always(_: &ArpPacket, _: &DetectionContext) -> RuleOutcome {
        Ok(Some(MatchDetails::new(Severity::Low, "always")))
    }

    #[test]
    fn lifecycle_and_health() {
        let engine = DetectionEngineBuilder::new()
            .config(small_config("elastic"))
            .memory_sampler(FixedSampler(AtomicU64::new(0)))
            .build()
            .unwrap();
        assert!(engine.health().is_unhealthy());
        assert!(matches!(engine.shutdown(true), Err(EngineError::NotRunning)));

        engine.start().unwrap();
        assert!(engine.health().is_healthy());
        assert_eq!(engine.executor_kind(), ExecutorKind::Elastic);

        engine.shutdown(true).unwrap();
        assert!(engine.health().is_unhealthy());
        assert_eq!(engine.stats().state, "stopped");
    }

    #[test]
    fn runs_rules_on_both_executors() {
        for kind in ["elastic", "gated"] {
            let engine = DetectionEngineBuilder::new()
                .config(small_config(kind))
                .memory_sampler(FixedSampler(AtomicU64::new(0)))
                .rule("always", always, Some(7))
                .build()
                .unwrap();
            engine.start().unwrap();
            assert_eq!(engine.ingest_all(packets(25)).unwrap(), 25);
            assert!(engine.wait_for_completion(Duration::from_secs(5)));

            let stats = engine.stats();
            assert_eq!(stats.rules["always"].count, 25, "executor {kind}");
            assert_eq!(stats.rules["always"].matches, 25, "executor {kind}");
            assert_eq!(stats.orchestrator.packets_ingested, 25);

            let json = serde_json::to_value(&stats).unwrap();
            assert_eq!(json["executor"]["kind"], kind);
            assert_eq!(json["rules"]["always"]["matches"], 25);
            engine.shutdown(true).unwrap();
        }
    }

    #[test]
    fn memory_pressure_degrades_health() {
        let config = EngineConfig {
            memory_limit_mb: 1,
            ..small_config("elastic")
        };
        let engine = DetectionEngineBuilder::new()
            .config(config)
            .memory_sampler(FixedSampler(AtomicU64::new(1024 * 1024)))
            .build()
            .unwrap();
        engine.start().unwrap();
        engine.governor().tick().unwrap();
        assert!(matches!(engine.health(), HealthStatus::Degraded(_)));
        engine.shutdown(false).unwrap();
    }

    #[test]
    fn queue_health_counts_every_pool_tier() {
        let config = EngineConfig {
            worker_count: 1,
            min_workers: 1,
            max_workers: 1,
            sub_batch_size: 1,
            queue_capacity: 10,
            ..small_config("elastic")
        };
        let open = Arc::new(AtomicBool::new(false));
        let mut builder = DetectionEngineBuilder::new()
            .config(config)
            .memory_sampler(FixedSampler(AtomicU64::new(0)));
        for (name, priority) in [("high", 9), ("normal", 5), ("low", 2)] {
            let open = Arc::clone(&open);
            builder = builder.rule(
                name,
                move |_: &ArpPacket, _: &DetectionContext| -> RuleOutcome {
                    while !open.load(Ordering::Acquire) {
                        thread::sleep(Duration::from_millis(1));
                    }
                    Ok(None)
                },
                Some(priority),
            );
        }
        let engine = builder.build().unwrap();
        assert_eq!(engine.executor.capacity(), 30);
        engine.start().unwrap();

        // 티어마다 3개, 합계 9/30
        engine.ingest_all(packets(3)).unwrap();
        engine.orchestrator().flush().unwrap();
        assert!(engine.health().is_healthy(), "{:?}", engine.health());

        // 티어마다 9개, 합계 27/30
        engine.ingest_all(packets(6)).unwrap();
        engine.orchestrator().flush().unwrap();
        assert!(
            matches!(engine.health(), HealthStatus::Degraded(ref m) if m.starts_with("queue utilization")),
            "{:?}",
            engine.health()
        );

        open.store(true, Ordering::Release);
        assert!(engine.wait_for_completion(Duration::from_secs(5)));
        assert!(engine.health().is_healthy());
        engine.shutdown(true).unwrap();
    }

    #[test]
    fn invalid_executor_name_is_rejected() {
        let result = DetectionEngineBuilder::new()
            .config(small_config("round-robin"))
            .build();
        assert!(matches!(result, Err(EngineError::Config { .. })));
    }

    #[test]
    fn duplicate_rule_fails_build() {
        let result = DetectionEngineBuilder::new()
            .config(small_config("elastic"))
            .memory_sampler(FixedSampler(AtomicU64::new(0)))
            .rule("dup", always, None)
            .rule("dup", always, None)
            .build();
        assert!(matches!(result, Err(EngineError::DuplicateRule(_))));
    }
}
