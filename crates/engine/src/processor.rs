//! 룰 프로세서: 룰 등록, 배치 팬아웃, 룰별 통계, 알림 콜백
//!
//! 배치 하나가 들어오면 서브 배치로 나누고 (룰 × 서브 배치)마다
//! [`RuleCheckTask`]를 하나씩 만들어 우선순위 내림차순으로 실행기에 제출합니다.
//!
//! 각 태스크는 생성 시점의 컨텍스트 스냅샷(`Arc<DetectionContext>`)을 들고 있으므로,
//! 실행 중에 오케스트레이터가 컨텍스트를 교체해도 절반만 갱신된 상태를 보지 않습니다.
//!
//! 룰 실패와 콜백 실패는 해당 태스크 안에서 끝납니다. 콜백 하나가 실패해도
//! 나머지 콜백과 나머지 매칭은 계속 처리됩니다.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arpwarden_core::config::{MAX_PRIORITY, MIN_PRIORITY};
use arpwarden_core::context::DetectionContext;
use arpwarden_core::metrics as m;
use arpwarden_core::pipeline::{AlertSink, BatchRule, PacketRule, RuleOutcome};
use arpwarden_core::types::{ArpPacket, MatchDetails};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batcher::Batch;
use crate::config::ProcessorConfig;
use crate::error::EngineError;
use crate::executor::TaskExecutor;
use crate::task::{TaskHandle, TaskOutput, WorkerTask, panic_message};

/// 룰 평가 방식
#[derive(Clone)]
enum RuleKind {
    /// 패킷마다 한 번 호출
    Packet(Arc<dyn PacketRule>),
    /// 서브 배치마다 한 번 호출
    Batch(Arc<dyn BatchRule>),
}

struct RegisteredRule {
    name: String,
    priority: i32,
    kind: RuleKind,
}

/// 룰 하나의 누적 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleStats {
    /// 호출 횟수 (패킷 룰은 패킷 수, 배치 룰은 서브 배치 수)
    pub count: u64,
    /// 누적 실행 시간 (ms)
    pub total_time_ms: f64,
    /// 호출당 평균 실행 시간 (ms)
    pub avg_time_ms: f64,
    /// 매칭 수
    pub matches: u64,
    /// matches / count
    pub match_rate: f64,
    /// 룰 에러 수 (에러 반환 또는 panic)
    pub errors: u64,
}

#[derive(Debug, Default)]
struct RawStats {
    count: u64,
    total_time: Duration,
    matches: u64,
    errors: u64,
}

impl RawStats {
    fn snapshot(&self) -> RuleStats {
        let total_time_ms = self.total_time.as_secs_f64() * 1000.0;
        let (avg_time_ms, match_rate) = if self.count == 0 {
            (0.0, 0.0)
        } else {
            (
                total_time_ms / self.count as f64,
                self.matches as f64 / self.count as f64,
            )
        };
        RuleStats {
            count: self.count,
            total_time_ms,
            avg_time_ms,
            matches: self.matches,
            match_rate,
            errors: self.errors,
        }
    }
}

/// 태스크들이 공유하는 상태 (통계, 콜백 목록)
struct Shared {
    stats: Mutex<BTreeMap<String, RawStats>>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
    callback_errors: AtomicU64,
}

impl Shared {
    fn record(&self, rule: &str, invocations: u64, elapsed: Duration, matches: u64, errors: u64) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(rule.to_owned()).or_default();
        entry.count += invocations;
        entry.total_time += elapsed;
        entry.matches += matches;
        entry.errors += errors;
    }

    /// 매칭 하나를 모든 싱크에 전달합니다.
    fn dispatch(
        &self,
        sinks: &[Arc<dyn AlertSink>],
        rule: &str,
        packet: &ArpPacket,
        details: &MatchDetails,
    ) {
        for sink in sinks {
            let result = catch_unwind(AssertUnwindSafe(|| sink.on_match(rule, packet, details)));
            let reason = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(payload) => format!("callback panicked: {}", panic_message(&*payload)),
            };
            self.callback_errors.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::RULE_CALLBACK_ERRORS_TOTAL, m::LABEL_RULE => rule.to_owned())
                .increment(1);
            let err = EngineError::Callback {
                rule: rule.to_owned(),
                reason,
            };
            warn!(error = %err, "alert callback error swallowed");
        }
    }
}

/// (룰, 서브 배치) 하나를 평가하는 태스크
pub struct RuleCheckTask {
    label: String,
    rule: Arc<RegisteredRule>,
    packets: Arc<[ArpPacket]>,
    context: Arc<DetectionContext>,
    shared: Arc<Shared>,
}

impl RuleCheckTask {
    /// 평가 대상 룰 이름
    pub fn rule_name(&self) -> &str {
        &self.rule.name
    }

    /// 룰 우선순위
    pub fn priority(&self) -> i32 {
        self.rule.priority
    }

    /// 서브 배치 크기
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// 서브 배치가 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}

/// 룰 호출 결과를 panic까지 포함해 문자열 에러로 정리합니다.
fn invoke(f: impl FnOnce() -> RuleOutcome) -> Result<Option<MatchDetails>, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(format!("rule panicked: {}", panic_message(&*payload))),
    }
}

impl WorkerTask for RuleCheckTask {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(self: Box<Self>) -> Result<TaskOutput, EngineError> {
        let started = Instant::now();
        let name = self.rule.name.as_str();
        let sinks = self.shared.sinks.read().clone();
        let mut invocations = 0u64;
        let mut matched = 0u64;
        let mut errors = 0u64;
        let mut last_error = None;

        let mut handle = |outcome: Result<Option<MatchDetails>, String>, packet: &ArpPacket| {
            invocations += 1;
            match outcome {
                Ok(Some(details)) => {
                    matched += 1;
                    self.shared.dispatch(&sinks, name, packet, &details);
                }
                Ok(None) => {}
                Err(reason) => {
                    errors += 1;
                    debug!(rule = name, error = %reason, "rule invocation failed");
                    last_error = Some(reason);
                }
            }
        };

        match &self.rule.kind {
            RuleKind::Packet(rule) => {
                for packet in self.packets.iter() {
                    handle(invoke(|| rule.check(packet, &self.context)), packet);
                }
            }
            RuleKind::Batch(rule) => {
                if let Some(last) = self.packets.last() {
                    let outcome = invoke(|| rule.check_batch(&self.packets, &self.context));
                    let culprit = match &outcome {
                        Ok(Some(details)) => details
                            .packet_index
                            .and_then(|i| self.packets.get(i))
                            .unwrap_or(last),
                        _ => last,
                    };
                    handle(outcome, culprit);
                }
            }
        }

        self.shared
            .record(name, invocations, started.elapsed(), matched, errors);
        metrics::counter!(m::RULE_INVOCATIONS_TOTAL, m::LABEL_RULE => name.to_owned())
            .increment(invocations);
        if matched > 0 {
            metrics::counter!(m::RULE_MATCHES_TOTAL, m::LABEL_RULE => name.to_owned())
                .increment(matched);
        }
        if errors > 0 {
            metrics::counter!(m::RULE_ERRORS_TOTAL, m::LABEL_RULE => name.to_owned())
                .increment(errors);
        }

        match last_error {
            Some(reason) => Err(EngineError::TaskExecution {
                task_id: self.label.clone(),
                reason: format!("{errors} of {invocations} invocations failed, last: {reason}"),
            }),
            None => Ok(TaskOutput {
                processed: self.packets.len(),
                matched: matched as usize,
            }),
        }
    }
}

/// 룰 프로세서
pub struct RuleProcessor {
    config: ProcessorConfig,
    executor: Arc<dyn TaskExecutor>,
    rules: RwLock<Vec<Arc<RegisteredRule>>>,
    shared: Arc<Shared>,
    batches_processed: AtomicU64,
}

impl RuleProcessor {
    /// 새 프로세서를 생성합니다.
    pub fn new(
        config: ProcessorConfig,
        executor: Arc<dyn TaskExecutor>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            executor,
            rules: RwLock::new(Vec::new()),
            shared: Arc::new(Shared {
                stats: Mutex::new(BTreeMap::new()),
                sinks: RwLock::new(Vec::new()),
                callback_errors: AtomicU64::new(0),
            }),
            batches_processed: AtomicU64::new(0),
        })
    }

    /// 패킷 단위 룰을 등록합니다.
    ///
    /// `priority`가 `None`이면 설정의 룰 우선순위 맵(없으면 기본값)을 따릅니다.
    pub fn register_rule<R>(
        &self,
        name: impl Into<String>,
        rule: R,
        priority: Option<i32>,
    ) -> Result<(), EngineError>
    where
        R: PacketRule + 'static,
    {
        self.register(name.into(), RuleKind::Packet(Arc::new(rule)), priority)
    }

    /// 배치 단위 룰을 등록합니다.
    pub fn register_batch_rule<R>(
        &self,
        name: impl Into<String>,
        rule: R,
        priority: Option<i32>,
    ) -> Result<(), EngineError>
    where
        R: BatchRule + 'static,
    {
        self.register(name.into(), RuleKind::Batch(Arc::new(rule)), priority)
    }

    fn register(
        &self,
        name: String,
        kind: RuleKind,
        priority: Option<i32>,
    ) -> Result<(), EngineError> {
        let priority = priority.unwrap_or_else(|| self.config.priority_for(&name));
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(EngineError::InvalidPriority(priority));
        }

        let mut rules = self.rules.write();
        if rules.iter().any(|r| r.name == name) {
            return Err(EngineError::DuplicateRule(name));
        }
        self.shared.stats.lock().entry(name.clone()).or_default();
        info!(rule = %name, priority, "rule registered");
        rules.push(Arc::new(RegisteredRule {
            name,
            priority,
            kind,
        }));
        Ok(())
    }

    /// 알림 콜백을 추가합니다. 등록 순서대로 호출됩니다.
    pub fn add_alert_callback<S>(&self, sink: S)
    where
        S: AlertSink + 'static,
    {
        self.shared.sinks.write().push(Arc::new(sink));
    }

    /// 등록된 룰 이름과 우선순위 (우선순위 내림차순)
    pub fn rules(&self) -> Vec<(String, i32)> {
        let mut rules: Vec<_> = self
            .rules
            .read()
            .iter()
            .map(|r| (r.name.clone(), r.priority))
            .collect();
        rules.sort_by_key(|(_, p)| Reverse(*p));
        rules
    }

    /// 배치를 (룰 × 서브 배치) 태스크로 팬아웃해 제출합니다.
    ///
    /// 반환된 핸들은 제출 순서(우선순위 내림차순)입니다. 제출이 도중에 거부되면
    /// 이미 제출된 태스크는 그대로 실행되고 에러가 반환됩니다.
    pub fn process_packets(
        &self,
        batch: &Batch,
        context: Arc<DetectionContext>,
    ) -> Result<Vec<TaskHandle>, EngineError> {
        let rules = self.rules.read().clone();
        if batch.is_empty() || rules.is_empty() {
            return Ok(Vec::new());
        }

        let sub_batches: Vec<Arc<[ArpPacket]>> = batch
            .packets()
            .chunks(self.config.sub_batch_size)
            .map(Arc::from)
            .collect();

        let mut tasks: Vec<RuleCheckTask> = Vec::with_capacity(rules.len() * sub_batches.len());
        for rule in &rules {
            for (index, packets) in sub_batches.iter().enumerate() {
                tasks.push(RuleCheckTask {
                    label: format!("{}@{}.{}", rule.name, batch.id(), index),
                    rule: Arc::clone(rule),
                    packets: Arc::clone(packets),
                    context: Arc::clone(&context),
                    shared: Arc::clone(&self.shared),
                });
            }
        }
        tasks.sort_by_key(|t| Reverse(t.priority()));

        let total = tasks.len();
        let mut handles = Vec::with_capacity(total);
        for task in tasks {
            let priority = task.priority();
            match self.executor.submit_task(Box::new(task), priority, None) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(
                        batch = batch.id(),
                        submitted = handles.len(),
                        total,
                        error = %e,
                        "rule task submission rejected"
                    );
                    return Err(e);
                }
            }
        }

        self.batches_processed.fetch_add(1, Ordering::Relaxed);
        debug!(
            batch = batch.id(),
            packets = batch.len(),
            rules = rules.len(),
            tasks = total,
            "batch fanned out"
        );
        Ok(handles)
    }

    /// 룰별 통계의 현재 사본
    pub fn get_stats(&self) -> BTreeMap<String, RuleStats> {
        self.shared
            .stats
            .lock()
            .iter()
            .map(|(name, raw)| (name.clone(), raw.snapshot()))
            .collect()
    }

    /// 모든 룰의 통계를 0으로 되돌립니다.
    pub fn reset_stats(&self) {
        let mut stats = self.shared.stats.lock();
        for raw in stats.values_mut() {
            *raw = RawStats::default();
        }
        self.shared.callback_errors.store(0, Ordering::Relaxed);
    }

    /// 삼켜진 콜백 에러 수
    pub fn callback_errors(&self) -> u64 {
        self.shared.callback_errors.load(Ordering::Relaxed)
    }

    /// 처리한 배치 수
    pub fn batches_processed(&self) -> u64 {
        self.batches_processed.load(Ordering::Relaxed)
    }

    /// 태스크를 받는 실행기
    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }
}
