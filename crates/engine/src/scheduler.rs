//! 게이트 스케줄러: 동시 실행 수 상한을 강제하는 대안 실행기
//!
//! "동시에 N개를 넘는 룰 평가는 절대 없어야 한다"가 강한 요구사항일 때 사용합니다.
//! 처리량이 부하를 따라가야 한다면 [`WorkerPool`](crate::pool::WorkerPool)을 사용합니다.
//!
//! 하나의 우선순위 큐와 `max_concurrent_tasks`개의 슬롯을 갖습니다.
//! 스케줄러 스레드는 빈 슬롯이 생기면 깨어나 빈 슬롯 수만큼 태스크를 꺼내고,
//! 교체 가능한 prioritizer(기본: 우선순위 내림차순)로 정렬한 뒤
//! 태스크마다 짧게 사는 실행 스레드를 띄웁니다.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use arpwarden_core::metrics as m;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::EngineError;
use crate::executor::{ExecutorKind, TaskExecutor};
use crate::pool::DISCARDED_AT_SHUTDOWN;
use crate::queue::PriorityQueue;
use crate::task::{Task, TaskHandle, TaskId, TaskSnapshot, TaskState, WorkerTask, new_task_id};
use crate::tier::Tier;

/// 한 번에 허가된 태스크들의 실행 순서를 정하는 함수
pub type Prioritizer = Arc<dyn Fn(&mut [Task]) + Send + Sync>;

/// 기본 prioritizer: 우선순위 내림차순 (같으면 꺼낸 순서 유지)
pub fn priority_descending() -> Prioritizer {
    Arc::new(|tasks: &mut [Task]| tasks.sort_by_key(|t| std::cmp::Reverse(t.priority())))
}

/// 스케줄러 통계 (특정 시점 사본)
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    /// 실행 중 여부
    pub running: bool,
    /// 동시 실행 상한
    pub max_concurrent_tasks: usize,
    /// 현재 실행 중인 태스크 수
    pub active: usize,
    /// 관측된 최대 동시 실행 수
    pub peak_concurrency: usize,
    /// 대기 중인 태스크 수
    pub queued: usize,
    /// 제출된 태스크 수
    pub tasks_submitted: u64,
    /// 정상 완료된 태스크 수
    pub tasks_completed: u64,
    /// 실패한 태스크 수 (폐기 포함)
    pub tasks_failed: u64,
    /// 보관 중인 완료 이력 수
    pub history_len: usize,
}

/// 완료 이력 (오래된 것부터 제거)
#[derive(Default)]
struct History {
    entries: HashMap<TaskId, TaskSnapshot>,
    order: VecDeque<TaskId>,
}

impl History {
    fn insert(&mut self, snapshot: TaskSnapshot, limit: usize) {
        self.order.push_back(snapshot.id.clone());
        self.entries.insert(snapshot.id.clone(), snapshot);
        self.trim(limit);
    }

    fn trim(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.order.len() > limit {
            if let Some(id) = self.order.pop_front() {
                self.entries.remove(&id);
                evicted += 1;
            }
        }
        evicted
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    queue: PriorityQueue<Task>,
    accepting: AtomicBool,
    active: AtomicBool,
    slots_used: Mutex<usize>,
    slot_freed: Condvar,
    tracked: Mutex<HashMap<TaskId, TaskHandle>>,
    history: Mutex<History>,
    prioritizer: Prioritizer,
    peak: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    next_exec_id: AtomicU64,
}

/// 게이트 스케줄러
pub struct AdmissionScheduler {
    inner: Arc<SchedulerInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AdmissionScheduler {
    /// 기본 prioritizer로 스케줄러를 생성합니다.
    pub fn new(config: SchedulerConfig) -> Result<Self, EngineError> {
        Self::with_prioritizer(config, priority_descending())
    }

    /// 지정한 prioritizer로 스케줄러를 생성합니다.
    pub fn with_prioritizer(
        config: SchedulerConfig,
        prioritizer: Prioritizer,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let queue = PriorityQueue::bounded(config.queue_capacity);
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                config,
                queue,
                accepting: AtomicBool::new(false),
                active: AtomicBool::new(false),
                slots_used: Mutex::new(0),
                slot_freed: Condvar::new(),
                tracked: Mutex::new(HashMap::new()),
                history: Mutex::new(History::default()),
                prioritizer,
                peak: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                next_exec_id: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        })
    }

    /// 스케줄러 스레드를 시작합니다.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut thread_slot = self.thread.lock();
        if thread_slot.is_some() {
            warn!("admission scheduler already running");
            return Ok(());
        }
        self.inner.active.store(true, Ordering::Release);
        self.inner.accepting.store(true, Ordering::Release);
        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("arpwarden-scheduler".to_owned())
            .spawn(move || scheduler_loop(inner));
        match spawned {
            Ok(handle) => *thread_slot = Some(handle),
            Err(e) => {
                self.inner.active.store(false, Ordering::Release);
                self.inner.accepting.store(false, Ordering::Release);
                return Err(e.into());
            }
        }
        info!(
            max_concurrent_tasks = self.inner.config.max_concurrent_tasks,
            "admission scheduler started"
        );
        Ok(())
    }

    /// 스케줄러를 멈춥니다. 폐기된 태스크 수를 반환합니다.
    ///
    /// `drain`이면 대기 중인 태스크가 모두 끝날 때까지 기다립니다.
    /// 아니면 대기 중인 태스크를 실패로 기록하고, 실행 중인 태스크는
    /// `shutdown_timeout`까지만 기다립니다.
    pub fn shutdown(&self, drain: bool) -> usize {
        let inner = &self.inner;
        inner.accepting.store(false, Ordering::Release);
        if drain {
            inner.queue.join();
        }
        inner.active.store(false, Ordering::Release);
        inner.slot_freed.notify_all();

        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("scheduler thread panicked");
            }
        }

        let discarded = inner.discard_queued();
        if discarded > 0 {
            warn!(discarded, "pending tasks discarded at shutdown");
        }

        let deadline = Instant::now() + inner.config.shutdown_timeout;
        let mut used = inner.slots_used.lock();
        while *used > 0 {
            if inner.slot_freed.wait_until(&mut used, deadline).timed_out() {
                error!(running = *used, "tasks still running after shutdown timeout");
                break;
            }
        }
        drop(used);
        info!("admission scheduler stopped");
        discarded
    }

    /// 태스크 상태를 조회합니다 (대기, 실행 중, 완료 이력 순).
    pub fn task_status(&self, id: &str) -> Option<TaskSnapshot> {
        if let Some(handle) = self.inner.tracked.lock().get(id) {
            return Some(handle.snapshot());
        }
        self.inner.history.lock().entries.get(id).cloned()
    }

    /// 현재 실행 중인 태스크 ID 목록
    pub fn running_tasks(&self) -> Vec<TaskId> {
        self.inner
            .tracked
            .lock()
            .values()
            .filter(|h| h.state() == TaskState::Running)
            .map(|h| h.id().to_owned())
            .collect()
    }

    /// 완료 이력을 최근 `keep`개만 남기고 정리합니다. 제거된 수를 반환합니다.
    pub fn trim_history(&self, keep: usize) -> usize {
        self.inner.history.lock().trim(keep)
    }

    /// 모든 태스크가 끝날 때까지 블록합니다.
    pub fn join(&self) {
        self.inner.queue.join();
    }

    /// 스케줄러 설정
    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// 스케줄러 통계를 반환합니다.
    pub fn get_stats(&self) -> SchedulerStats {
        let inner = &self.inner;
        SchedulerStats {
            running: inner.accepting.load(Ordering::Acquire),
            max_concurrent_tasks: inner.config.max_concurrent_tasks,
            active: *inner.slots_used.lock(),
            peak_concurrency: inner.peak.load(Ordering::Relaxed),
            queued: inner.queue.len(),
            tasks_submitted: inner.submitted.load(Ordering::Relaxed),
            tasks_completed: inner.completed.load(Ordering::Relaxed),
            tasks_failed: inner.failed.load(Ordering::Relaxed),
            history_len: inner.history.lock().order.len(),
        }
    }
}

impl TaskExecutor for AdmissionScheduler {
    fn submit_task(
        &self,
        task: Box<dyn WorkerTask>,
        priority: i32,
        task_id: Option<TaskId>,
    ) -> Result<TaskHandle, EngineError> {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        // 범위 검증만 사용 (단일 큐)
        Tier::for_priority(priority)?;
        let id = task_id.unwrap_or_else(new_task_id);

        let mut tracked = inner.tracked.lock();
        if tracked.contains_key(&id) {
            return Err(EngineError::DuplicateTaskId(id));
        }
        let (task, handle) = Task::new(id.clone(), priority, task);
        inner.queue.put(task, priority)?;
        tracked.insert(id, handle.clone());
        drop(tracked);

        inner.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    fn outstanding(&self) -> usize {
        self.inner.queue.unfinished()
    }

    fn is_running(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Gated
    }
}

impl Drop for AdmissionScheduler {
    fn drop(&mut self) {
        if self.thread.lock().is_some() {
            self.shutdown(false);
        }
    }
}

impl SchedulerInner {
    fn finish(&self, id: &str, succeeded: bool) {
        if let Some(handle) = self.tracked.lock().remove(id) {
            self.history
                .lock()
                .insert(handle.snapshot(), self.config.history_limit);
        }
        let result = if succeeded {
            self.completed.fetch_add(1, Ordering::Relaxed);
            "completed"
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            "failed"
        };
        metrics::counter!(m::SCHEDULER_TASKS_FINISHED_TOTAL, m::LABEL_RESULT => result)
            .increment(1);
    }

    fn release_slot(&self) {
        let mut used = self.slots_used.lock();
        *used = used.saturating_sub(1);
        metrics::gauge!(m::SCHEDULER_RUNNING).set(*used as f64);
        drop(used);
        self.slot_freed.notify_all();
    }

    fn discard_queued(&self) -> usize {
        let drained = self.queue.drain();
        let count = drained.len();
        for task in drained {
            let id = task.id().to_owned();
            task.discard(DISCARDED_AT_SHUTDOWN);
            self.finish(&id, false);
            self.queue.task_done();
        }
        count
    }

    fn launch(inner: &Arc<Self>, task: Task) {
        {
            let mut used = inner.slots_used.lock();
            *used += 1;
            inner.peak.fetch_max(*used, Ordering::Relaxed);
            metrics::gauge!(m::SCHEDULER_RUNNING).set(*used as f64);
        }
        let id = task.id().to_owned();
        let exec_id = inner.next_exec_id.fetch_add(1, Ordering::Relaxed);
        let exec_inner = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(format!("arpwarden-gated-{exec_id}"))
            .spawn(move || {
                let id = task.id().to_owned();
                let report = task.run();
                exec_inner.finish(&id, report.succeeded);
                exec_inner.release_slot();
                exec_inner.queue.task_done();
            });
        if let Err(e) = spawned {
            // 클로저와 함께 버려진 Task는 Drop에서 실패로 기록됨
            error!(task_id = %id, error = %e, "failed to spawn execution thread");
            inner.finish(&id, false);
            inner.release_slot();
            inner.queue.task_done();
        }
    }
}

fn scheduler_loop(inner: Arc<SchedulerInner>) {
    let max = inner.config.max_concurrent_tasks;
    let poll = inner.config.poll_interval;
    while inner.active.load(Ordering::Acquire) {
        let free = {
            let mut used = inner.slots_used.lock();
            while *used >= max && inner.active.load(Ordering::Acquire) {
                inner.slot_freed.wait_for(&mut used, poll);
            }
            max.saturating_sub(*used)
        };
        if !inner.active.load(Ordering::Acquire) {
            break;
        }

        let Some(first) = inner.queue.get(poll) else {
            continue;
        };
        let mut admitted = vec![first];
        while admitted.len() < free {
            match inner.queue.try_get() {
                Some(task) => admitted.push(task),
                None => break,
            }
        }
        (inner.prioritizer)(&mut admitted);
        debug!(admitted = admitted.len(), free, "admitting tasks");

        for task in admitted {
            SchedulerInner::launch(&inner, task);
        }
    }
    debug!("scheduler loop stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::task::{FnTask, TaskOutput};

    fn scheduler(max: usize) -> AdmissionScheduler {
        AdmissionScheduler::new(SchedulerConfig {
            max_concurrent_tasks: max,
            poll_interval: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(2),
            ..SchedulerConfig::default()
        })
        .unwrap()
    }

    fn sleeper(ms: u64) -> Box<dyn WorkerTask> {
        Box::new(FnTask::new("sleep", move || {
            thread::sleep(Duration::from_millis(ms));
            Ok(TaskOutput::default())
        }))
    }

    #[test]
    fn never_exceeds_concurrency_ceiling() {
        let s = scheduler(2);
        s.start().unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| s.submit_task(sleeper(20), 5, None).unwrap())
            .collect();
        s.join();
        for h in handles {
            assert_eq!(h.state(), TaskState::Completed);
        }
        let stats = s.get_stats();
        assert!(stats.peak_concurrency <= 2);
        assert_eq!(stats.tasks_completed, 8);
        s.shutdown(true);
    }

    #[test]
    fn status_lookup_covers_completed_tasks() {
        let s = scheduler(1);
        s.start().unwrap();
        let handle = s
            .submit_task(sleeper(1), 7, Some("lookup".to_owned()))
            .unwrap();
        handle.wait(Duration::from_secs(5)).unwrap();
        s.join();
        let snap = s.task_status("lookup").unwrap();
        assert_eq!(snap.state, TaskState::Completed);
        assert!(s.task_status("missing").is_none());
        s.shutdown(true);
    }

    #[test]
    fn duplicate_and_stopped_submissions_are_rejected() {
        let s = scheduler(1);
        assert!(matches!(
            s.submit_task(sleeper(1), 5, None),
            Err(EngineError::NotRunning)
        ));
        s.start().unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        s.submit_task(
            Box::new(FnTask::new("block", move || {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(TaskOutput::default())
            })),
            5,
            Some("same".to_owned()),
        )
        .unwrap();
        assert!(matches!(
            s.submit_task(sleeper(1), 5, Some("same".to_owned())),
            Err(EngineError::DuplicateTaskId(_))
        ));
        release_tx.send(()).unwrap();
        s.shutdown(true);
    }

    #[test]
    fn admitted_batch_runs_highest_priority_first() {
        let s = scheduler(1);
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let order = Arc::new(Mutex::new(Vec::new()));
        s.start().unwrap();
        s.submit_task(
            Box::new(FnTask::new("gate", move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(TaskOutput::default())
            })),
            10,
            None,
        )
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for (name, priority) in [("low", 1), ("high", 9), ("mid", 5)] {
            let order = Arc::clone(&order);
            s.submit_task(
                Box::new(FnTask::new(name, move || {
                    order.lock().push(name);
                    Ok(TaskOutput::default())
                })),
                priority,
                None,
            )
            .unwrap();
        }
        release_tx.send(()).unwrap();
        s.join();
        assert_eq!(*order.lock(), vec!["high", "mid", "low"]);
        s.shutdown(true);
    }

    #[test]
    fn history_is_bounded() {
        let s = AdmissionScheduler::new(SchedulerConfig {
            max_concurrent_tasks: 2,
            history_limit: 3,
            poll_interval: Duration::from_millis(10),
            ..SchedulerConfig::default()
        })
        .unwrap();
        s.start().unwrap();
        for _ in 0..6 {
            s.submit_task(sleeper(1), 5, None).unwrap();
        }
        s.join();
        assert_eq!(s.get_stats().history_len, 3);
        assert_eq!(s.trim_history(1), 2);
        s.shutdown(true);
    }

    #[test]
    fn shutdown_without_drain_discards_queued() {
        let s = scheduler(1);
        s.start().unwrap();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        s.submit_task(
            Box::new(FnTask::new("gate", move || {
                let _ = started_tx.send(());
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
                Ok(TaskOutput::default())
            })),
            5,
            None,
        )
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let queued = s.submit_task(sleeper(1), 5, None).unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let _ = release_tx.send(());
        });
        assert_eq!(s.shutdown(false), 1);
        releaser.join().unwrap();
        assert_eq!(queued.state(), TaskState::Failed);
    }
}
