//! 적응형 워커 풀: 세 개의 우선순위 티어를 비우는 탄력적 OS 스레드 집합
//!
//! [`WorkerPool`]은 `[min_workers, max_workers]` 범위의 워커 스레드와
//! 백그라운드 스케일러 스레드를 관리합니다.
//!
//! # 아키텍처
//! ```text
//! submit() ──▶ TieredQueues (high / normal / low)
//!                   │ dequeue_highest_available()
//!                   ▼
//!             worker 0..N ──▶ Task::run() ──▶ 통계 / 메트릭
//!                   ▲
//!   scaler ─────────┘ (2초마다 active/total 샘플링, ScalingPolicy::decide)
//! ```
//!
//! # 종료
//! `shutdown(true)`는 세 큐가 모두 비워질 때까지 기다린 뒤 워커를 멈춥니다.
//! `shutdown(false)`는 대기 중인 태스크를 `Failed("discarded at shutdown")`로
//! 기록하고 그 수를 로그로 남깁니다. 종료 후 풀은 비어 있으며 다시 `start()`할 수 있습니다.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arpwarden_core::metrics as m;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::error::EngineError;
use crate::executor::{ExecutorKind, TaskExecutor};
use crate::scaling::{LoadSample, ScalingDecision};
use crate::task::{FnTask, RunReport, Task, TaskHandle, TaskId, TaskOutput, WorkerTask, new_task_id};
use crate::tier::{QueueDepths, Tier, TieredQueues};

/// 강제 종료 시 폐기된 태스크에 기록되는 사유
pub const DISCARDED_AT_SHUTDOWN: &str = "discarded at shutdown";

/// 워커 하나의 상태 (스케일러가 읽는 busy 플래그 포함)
#[derive(Debug)]
struct WorkerState {
    id: usize,
    busy: AtomicBool,
    stop: AtomicBool,
    completed: AtomicU64,
    failed: AtomicU64,
}

struct WorkerEntry {
    state: Arc<WorkerState>,
    handle: JoinHandle<()>,
}

/// 풀 매니저가 소유하는 워커 목록과 스케일링 상태
#[derive(Default)]
struct WorkerSet {
    workers: Vec<WorkerEntry>,
    /// 스케일 다운으로 빠졌지만 아직 끝나지 않았을 수 있는 스레드
    retired: Vec<JoinHandle<()>>,
    scaler: Option<JoinHandle<()>>,
    last_scaling: Option<Instant>,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
    total_run_micros: AtomicU64,
    scale_ups: AtomicU64,
    scale_downs: AtomicU64,
}

struct PoolInner {
    config: PoolConfig,
    queues: TieredQueues<Task>,
    running: AtomicBool,
    workers: Mutex<WorkerSet>,
    in_flight: Mutex<HashSet<TaskId>>,
    counters: Counters,
    started_at: Mutex<Option<Instant>>,
    scaler_stop: Mutex<bool>,
    scaler_wake: Condvar,
    next_worker_id: AtomicUsize,
}

/// 풀 통계 (특정 시점 사본)
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// 실행 중 여부
    pub running: bool,
    /// 전체 워커 수
    pub total_workers: usize,
    /// 태스크를 실행 중인 워커 수
    pub active_workers: usize,
    /// 유휴 워커 수
    pub idle_workers: usize,
    /// 티어별 대기 태스크 수
    pub queue_depths: QueueDepths,
    /// 제출된 태스크 수
    pub tasks_submitted: u64,
    /// 정상 완료된 태스크 수
    pub tasks_completed: u64,
    /// 실패한 태스크 수 (폐기 포함)
    pub tasks_failed: u64,
    /// 강제 종료로 폐기된 태스크 수
    pub tasks_discarded: u64,
    /// 아직 끝나지 않은 태스크 수
    pub outstanding: usize,
    /// 가동 이후 초당 처리량
    pub throughput_per_sec: f64,
    /// 평균 실행 시간 (밀리초)
    pub avg_latency_ms: f64,
    /// 스케일 업 횟수
    pub scale_ups: u64,
    /// 스케일 다운 횟수
    pub scale_downs: u64,
    /// 가동 시간 (초)
    pub uptime_secs: f64,
}

/// 적응형 워커 풀
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// 새 풀을 생성합니다. 워커는 `start()`에서 시작됩니다.
    pub fn new(config: PoolConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let queues = TieredQueues::new(config.queue_capacity);
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                queues,
                running: AtomicBool::new(false),
                workers: Mutex::new(WorkerSet::default()),
                in_flight: Mutex::new(HashSet::new()),
                counters: Counters::default(),
                started_at: Mutex::new(None),
                scaler_stop: Mutex::new(false),
                scaler_wake: Condvar::new(),
                next_worker_id: AtomicUsize::new(0),
            }),
        })
    }

    /// 초기 워커와 스케일러 스레드를 시작합니다.
    pub fn start(&self) -> Result<(), EngineError> {
        let inner = &self.inner;
        let mut set = inner.workers.lock();
        if inner.running.load(Ordering::Acquire) {
            warn!("worker pool already running");
            return Ok(());
        }

        let initial = inner.config.clamped_initial_workers();
        for _ in 0..initial {
            PoolInner::spawn_worker(inner, &mut set)?;
        }
        *inner.scaler_stop.lock() = false;
        let scaler_inner = Arc::clone(inner);
        set.scaler = Some(
            thread::Builder::new()
                .name("arpwarden-scaler".to_owned())
                .spawn(move || scaler_loop(scaler_inner))?,
        );
        set.last_scaling = None;
        *inner.started_at.lock() = Some(Instant::now());
        inner.running.store(true, Ordering::Release);
        metrics::gauge!(m::POOL_WORKERS).set(set.workers.len() as f64);

        info!(
            workers = initial,
            min_workers = inner.config.scaling.min_workers,
            max_workers = inner.config.scaling.max_workers,
            "worker pool started"
        );
        Ok(())
    }

    /// 클로저를 태스크로 감싸 제출합니다.
    pub fn submit<F>(
        &self,
        f: F,
        priority: i32,
        task_id: Option<TaskId>,
    ) -> Result<TaskHandle, EngineError>
    where
        F: FnOnce() -> Result<TaskOutput, EngineError> + Send + 'static,
    {
        self.submit_task(Box::new(FnTask::new("fn", f)), priority, task_id)
    }

    /// 풀을 멈춥니다.
    ///
    /// `drain`이면 대기 중인 모든 태스크가 끝날 때까지 기다립니다.
    /// 아니면 대기 중인 태스크를 실패로 기록합니다. 폐기된 태스크 수를 반환합니다.
    pub fn shutdown(&self, drain: bool) -> usize {
        let inner = &self.inner;
        let was_running = inner.running.swap(false, Ordering::AcqRel);
        if !was_running && inner.workers.lock().workers.is_empty() {
            return 0;
        }
        info!(drain, "worker pool shutting down");

        let mut discarded = 0;
        if drain {
            inner.queues.join_all();
        } else {
            discarded += inner.discard_queued();
        }

        inner.stop_threads();

        // start/submit 경쟁으로 워커 정지 후 들어온 태스크
        discarded += inner.discard_queued();
        if discarded > 0 {
            warn!(discarded, "pending tasks discarded at shutdown");
        }
        metrics::gauge!(m::POOL_WORKERS).set(0.0);
        info!("worker pool stopped");
        discarded
    }

    /// 현재 워커 수
    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().workers.len()
    }

    /// 티어별 대기 태스크 수
    pub fn queue_depths(&self) -> QueueDepths {
        self.inner.queues.depths()
    }

    /// 세 큐의 미완료 작업이 모두 0이 될 때까지 블록합니다.
    pub fn join(&self) {
        self.inner.queues.join_all();
    }

    /// 풀 설정
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// 스케일러 한 주기를 즉시 실행합니다.
    pub fn scale_tick(&self) -> ScalingDecision {
        PoolInner::scale_tick(&self.inner)
    }

    /// 풀 통계를 반환합니다.
    pub fn get_stats(&self) -> PoolStats {
        let inner = &self.inner;
        let (total, active) = {
            let set = inner.workers.lock();
            let active = set
                .workers
                .iter()
                .filter(|w| w.state.busy.load(Ordering::Acquire))
                .count();
            (set.workers.len(), active)
        };
        let c = &inner.counters;
        let completed = c.completed.load(Ordering::Relaxed);
        let failed = c.failed.load(Ordering::Relaxed);
        let discarded = c.discarded.load(Ordering::Relaxed);
        let executed = completed + failed - discarded;
        let uptime = inner
            .started_at
            .lock()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        let total_run_ms = c.total_run_micros.load(Ordering::Relaxed) as f64 / 1000.0;

        PoolStats {
            running: inner.running.load(Ordering::Acquire),
            total_workers: total,
            active_workers: active,
            idle_workers: total - active,
            queue_depths: inner.queues.depths(),
            tasks_submitted: c.submitted.load(Ordering::Relaxed),
            tasks_completed: completed,
            tasks_failed: failed,
            tasks_discarded: discarded,
            outstanding: inner.queues.unfinished(),
            throughput_per_sec: if uptime > 0.0 {
                executed as f64 / uptime
            } else {
                0.0
            },
            avg_latency_ms: if executed > 0 {
                total_run_ms / executed as f64
            } else {
                0.0
            },
            scale_ups: c.scale_ups.load(Ordering::Relaxed),
            scale_downs: c.scale_downs.load(Ordering::Relaxed),
            uptime_secs: uptime,
        }
    }
}

impl TaskExecutor for WorkerPool {
    fn submit_task(
        &self,
        task: Box<dyn WorkerTask>,
        priority: i32,
        task_id: Option<TaskId>,
    ) -> Result<TaskHandle, EngineError> {
        let inner = &self.inner;
        if !inner.running.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        let tier = Tier::for_priority(priority)?;
        let id = task_id.unwrap_or_else(new_task_id);

        {
            let mut in_flight = inner.in_flight.lock();
            if !in_flight.insert(id.clone()) {
                return Err(EngineError::DuplicateTaskId(id));
            }
        }

        let (task, handle) = Task::new(id.clone(), priority, task);
        if let Err(e) = inner.queues.queue(tier).put(task, priority) {
            inner.in_flight.lock().remove(&id);
            return Err(e);
        }

        inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::POOL_TASKS_SUBMITTED_TOTAL).increment(1);
        metrics::gauge!(m::POOL_QUEUE_DEPTH, m::LABEL_TIER => tier.as_str())
            .set(inner.queues.queue(tier).len() as f64);
        Ok(handle)
    }

    fn outstanding(&self) -> usize {
        self.inner.queues.unfinished()
    }

    fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Elastic
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.is_running() || !self.inner.workers.lock().workers.is_empty() {
            self.shutdown(false);
        }
    }
}

impl PoolInner {
    fn spawn_worker(inner: &Arc<Self>, set: &mut WorkerSet) -> Result<(), EngineError> {
        let id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(WorkerState {
            id,
            busy: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        let worker_inner = Arc::clone(inner);
        let worker_state = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(format!("arpwarden-worker-{id}"))
            .spawn(move || worker_loop(worker_inner, worker_state))?;
        set.workers.push(WorkerEntry { state, handle });
        Ok(())
    }

    fn record(&self, report: &RunReport) {
        let c = &self.counters;
        c.total_run_micros.fetch_add(
            u64::try_from(report.elapsed.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        let result = if report.succeeded {
            c.completed.fetch_add(1, Ordering::Relaxed);
            "completed"
        } else {
            c.failed.fetch_add(1, Ordering::Relaxed);
            "failed"
        };
        metrics::counter!(m::POOL_TASKS_FINISHED_TOTAL, m::LABEL_RESULT => result).increment(1);
        metrics::histogram!(m::POOL_TASK_DURATION_SECONDS).record(report.elapsed.as_secs_f64());
    }

    fn discard_queued(&self) -> usize {
        let drained = self.queues.drain_all();
        let count = drained.len();
        for (tier, task) in drained {
            self.in_flight.lock().remove(task.id());
            task.discard(DISCARDED_AT_SHUTDOWN);
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            self.queues.task_done(tier);
        }
        count
    }

    fn stop_threads(&self) {
        let deadline = Instant::now() + self.config.shutdown_timeout;
        let mut abandoned = 0;

        // 스케일러가 비워진 워커 목록에 새 워커를 넣지 못하도록 먼저 멈춘다
        let scaler = self.workers.lock().scaler.take();
        *self.scaler_stop.lock() = true;
        self.scaler_wake.notify_all();
        if let Some(handle) = scaler {
            if !join_until(handle, deadline) {
                abandoned += 1;
            }
        }

        let (workers, retired) = {
            let mut set = self.workers.lock();
            set.last_scaling = None;
            (
                std::mem::take(&mut set.workers),
                std::mem::take(&mut set.retired),
            )
        };
        for w in &workers {
            w.state.stop.store(true, Ordering::Release);
        }

        let handles = workers.into_iter().map(|w| w.handle).chain(retired);
        for handle in handles {
            if !join_until(handle, deadline) {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            error!(
                abandoned,
                timeout_secs = self.config.shutdown_timeout.as_secs_f64(),
                "worker threads did not stop within shutdown timeout"
            );
        }
    }

    fn scale_tick(inner: &Arc<Self>) -> ScalingDecision {
        let mut set = inner.workers.lock();
        set.retired.retain(|h| !h.is_finished());
        // start()는 workers 잠금을 쥔 채 running을 켠다
        if !inner.running.load(Ordering::Acquire) {
            return ScalingDecision::Hold;
        }

        let total = set.workers.len();
        let active = set
            .workers
            .iter()
            .filter(|w| w.state.busy.load(Ordering::Acquire))
            .count();
        let sample = LoadSample {
            active,
            total,
            since_last_action: set.last_scaling.map(|t| t.elapsed()),
        };
        let decision = inner.config.scaling.decide(&sample);

        match decision {
            ScalingDecision::ScaleUp(n) => {
                let mut added = 0;
                for _ in 0..n {
                    match Self::spawn_worker(inner, &mut set) {
                        Ok(()) => added += 1,
                        Err(e) => {
                            error!(error = %e, "failed to spawn worker");
                            break;
                        }
                    }
                }
                if added > 0 {
                    set.last_scaling = Some(Instant::now());
                    inner.counters.scale_ups.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!(m::POOL_SCALE_UP_TOTAL).increment(1);
                    info!(
                        added,
                        workers = set.workers.len(),
                        load = sample.load(),
                        "scaled up worker pool"
                    );
                }
            }
            ScalingDecision::ScaleDown => {
                let idle = set
                    .workers
                    .iter()
                    .position(|w| !w.state.busy.load(Ordering::Acquire));
                match idle {
                    Some(index) => {
                        let entry = set.workers.swap_remove(index);
                        entry.state.stop.store(true, Ordering::Release);
                        set.retired.push(entry.handle);
                        set.last_scaling = Some(Instant::now());
                        inner.counters.scale_downs.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(m::POOL_SCALE_DOWN_TOTAL).increment(1);
                        info!(
                            worker = entry.state.id,
                            workers = set.workers.len(),
                            load = sample.load(),
                            "scaled down worker pool"
                        );
                    }
                    None => debug!("no idle worker to remove"),
                }
            }
            ScalingDecision::Hold => {}
        }
        metrics::gauge!(m::POOL_WORKERS).set(set.workers.len() as f64);
        decision
    }
}

/// 핸들이 끝날 때까지 `deadline`까지만 기다립니다. 끝나지 않으면 분리(detach)합니다.
fn join_until(handle: JoinHandle<()>, deadline: Instant) -> bool {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
    if handle.join().is_err() {
        error!("pool thread panicked");
    }
    true
}

fn worker_loop(inner: Arc<PoolInner>, state: Arc<WorkerState>) {
    debug!(worker = state.id, "worker started");
    while !state.stop.load(Ordering::Acquire) {
        let Some((tier, task)) = inner
            .queues
            .dequeue_highest_available(inner.config.idle_wait)
        else {
            continue;
        };

        state.busy.store(true, Ordering::Release);
        let id = task.id().to_owned();
        let report = task.run();
        if report.succeeded {
            state.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            state.failed.fetch_add(1, Ordering::Relaxed);
        }
        inner.record(&report);
        inner.in_flight.lock().remove(&id);
        inner.queues.task_done(tier);
        state.busy.store(false, Ordering::Release);
    }
    debug!(
        worker = state.id,
        completed = state.completed.load(Ordering::Relaxed),
        failed = state.failed.load(Ordering::Relaxed),
        "worker stopped"
    );
}

fn scaler_loop(inner: Arc<PoolInner>) {
    loop {
        {
            let mut stop = inner.scaler_stop.lock();
            if !*stop {
                inner
                    .scaler_wake
                    .wait_for(&mut stop, inner.config.scaling_interval);
            }
            if *stop {
                break;
            }
        }
        PoolInner::scale_tick(&inner);
    }
    debug!("scaler stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::task::TaskState;

    fn pool(initial: usize, min: usize, max: usize) -> WorkerPool {
        let config = PoolConfig::builder()
            .workers(initial, min, max)
            .scaling_interval(Duration::from_secs(3600))
            .shutdown_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        WorkerPool::new(config).unwrap()
    }

    fn noop() -> Result<TaskOutput, EngineError> {
        Ok(TaskOutput::default())
    }

    #[test]
    fn submit_before_start_is_rejected() {
        let pool = pool(1, 1, 1);
        assert!(matches!(
            pool.submit(noop, 5, None),
            Err(EngineError::NotRunning)
        ));
    }

    #[test]
    fn submitted_task_completes() {
        let pool = pool(2, 1, 2);
        pool.start().unwrap();
        let handle = pool
            .submit(|| Ok(TaskOutput { processed: 7, matched: 1 }), 5, None)
            .unwrap();
        let snap = handle.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(snap.state, TaskState::Completed);
        assert_eq!(snap.output.unwrap().processed, 7);
        pool.shutdown(true);
    }

    #[test]
    fn invalid_priority_is_rejected() {
        let pool = pool(1, 1, 1);
        pool.start().unwrap();
        assert!(matches!(
            pool.submit(noop, 11, None),
            Err(EngineError::InvalidPriority(11))
        ));
        pool.shutdown(true);
    }

    #[test]
    fn duplicate_in_flight_id_is_rejected() {
        let pool = pool(1, 1, 1);
        pool.start().unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let first = pool
            .submit(
                move || {
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                    Ok(TaskOutput::default())
                },
                5,
                Some("dup".to_owned()),
            )
            .unwrap();

        let err = pool.submit(noop, 5, Some("dup".to_owned())).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTaskId(id) if id == "dup"));

        release_tx.send(()).unwrap();
        first.wait(Duration::from_secs(5)).unwrap();
        pool.join();
        // 끝난 뒤에는 같은 ID를 다시 쓸 수 있음
        let again = pool.submit(noop, 5, Some("dup".to_owned())).unwrap();
        again.wait(Duration::from_secs(5)).unwrap();
        pool.shutdown(true);
    }

    #[test]
    fn failing_task_does_not_kill_worker() {
        let pool = pool(1, 1, 1);
        pool.start().unwrap();
        let bad = pool
            .submit(|| -> Result<TaskOutput, EngineError> { panic!("rule exploded") }, 5, None)
            .unwrap();
        assert_eq!(
            bad.wait(Duration::from_secs(5)).unwrap().state,
            TaskState::Failed
        );
        let good = pool.submit(noop, 5, None).unwrap();
        assert_eq!(
            good.wait(Duration::from_secs(5)).unwrap().state,
            TaskState::Completed
        );
        pool.join();
        let stats = pool.get_stats();
        assert_eq!(stats.tasks_failed, 1);
        assert_eq!(stats.tasks_completed, 1);
        pool.shutdown(true);
    }

    #[test]
    fn shutdown_without_drain_discards_pending() {
        let pool = pool(1, 1, 1);
        pool.start().unwrap();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let blocker = pool
            .submit(
                move || {
                    let _ = started_tx.send(());
                    let _ = release_rx.recv_timeout(Duration::from_secs(5));
                    Ok(TaskOutput::default())
                },
                10,
                None,
            )
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let queued: Vec<_> = (0..3).map(|_| pool.submit(noop, 1, None).unwrap()).collect();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = release_tx.send(());
        });
        let discarded = pool.shutdown(false);
        releaser.join().unwrap();

        assert_eq!(discarded, 3);
        for handle in queued {
            let snap = handle.snapshot();
            assert_eq!(snap.state, TaskState::Failed);
            assert_eq!(snap.error.as_deref(), Some(DISCARDED_AT_SHUTDOWN));
        }
        // 실행 중이던 태스크는 끝까지 실행됨
        assert_eq!(
            blocker.wait(Duration::from_secs(5)).unwrap().state,
            TaskState::Completed
        );
        assert_eq!(pool.get_stats().tasks_discarded, 3);
    }

    #[test]
    fn pool_is_restartable() {
        let pool = pool(2, 1, 2);
        pool.start().unwrap();
        pool.shutdown(true);
        assert_eq!(pool.worker_count(), 0);
        assert!(matches!(
            pool.submit(noop, 5, None),
            Err(EngineError::NotRunning)
        ));

        pool.start().unwrap();
        assert_eq!(pool.worker_count(), 2);
        let handle = pool.submit(noop, 5, None).unwrap();
        assert!(handle.wait(Duration::from_secs(5)).is_some());
        pool.shutdown(true);
    }

    #[test]
    fn scale_tick_on_stopped_pool_spawns_nothing() {
        let pool = pool(2, 2, 4);
        // 시작 전: 워커 0개지만 min_workers로 올리지 않음
        assert_eq!(pool.scale_tick(), ScalingDecision::Hold);
        assert_eq!(pool.worker_count(), 0);

        pool.start().unwrap();
        pool.shutdown(true);
        assert_eq!(pool.scale_tick(), ScalingDecision::Hold);
        assert_eq!(pool.worker_count(), 0);

        pool.start().unwrap();
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown(true);
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn shutdown_with_busy_scaler_leaves_pool_empty() {
        let config = PoolConfig::builder()
            .workers(1, 2, 4)
            .scaling_interval(Duration::from_millis(1))
            .shutdown_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        let pool = WorkerPool::new(config).unwrap();
        for _ in 0..50 {
            pool.start().unwrap();
            pool.shutdown(true);
            assert_eq!(pool.worker_count(), 0);
        }
        pool.start().unwrap();
        assert!(pool.worker_count() <= 4);
        pool.shutdown(true);
    }

    #[test]
    fn scale_tick_adds_workers_under_load() {
        let pool = pool(1, 1, 4);
        pool.start().unwrap();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit(
            move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(TaskOutput::default())
            },
            5,
            None,
        )
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert_eq!(pool.scale_tick(), ScalingDecision::ScaleUp(2));
        assert_eq!(pool.worker_count(), 3);
        // 쿨다운(기본 10초) 안에서는 유지
        assert_eq!(pool.scale_tick(), ScalingDecision::Hold);

        release_tx.send(()).unwrap();
        pool.shutdown(true);
        assert_eq!(pool.get_stats().scale_ups, 1);
    }

    #[test]
    fn stats_report_queue_depths_and_latency() {
        let pool = pool(1, 1, 1);
        pool.start().unwrap();
        for _ in 0..5 {
            pool.submit(
                || {
                    thread::sleep(Duration::from_millis(2));
                    Ok(TaskOutput::default())
                },
                5,
                None,
            )
            .unwrap();
        }
        pool.join();
        let stats = pool.get_stats();
        assert_eq!(stats.tasks_submitted, 5);
        assert_eq!(stats.tasks_completed, 5);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.queue_depths.total(), 0);
        assert!(stats.avg_latency_ms >= 1.0);
        pool.shutdown(true);
    }
}
