//! 태스크 추상화: 우선순위, 생명주기, 완료 신호를 갖는 작업 단위
//!
//! # 소유권
//! [`Task`]는 제출 시점에 큐로 이동하고, dequeue 시 워커로 이동하며,
//! 실행 후 소비됩니다. 작업 본체([`WorkerTask`])는 `Box<Self>`로 소비되므로
//! 같은 태스크가 두 번 실행되는 상황은 타입 수준에서 표현할 수 없습니다.
//!
//! 실행되지 못한 채 버려진 태스크는 `Drop`에서 `Failed`로 기록되어
//! 완료 신호를 기다리는 쪽이 영원히 블록되지 않습니다.
//!
//! # 상태 전이
//! ```text
//! Pending ──▶ Running ──▶ Completed
//!    │                └─▶ Failed
//!    └──────────────────▶ Failed (종료 시 폐기)
//! ```

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::warn;

use crate::error::EngineError;

/// 태스크 식별자
pub type TaskId = String;

/// 새 태스크 ID를 생성합니다 (UUID v4).
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}

/// 태스크 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// 큐에서 대기 중
    Pending,
    /// 워커에서 실행 중
    Running,
    /// 정상 완료
    Completed,
    /// 실패 또는 폐기
    Failed,
}

impl TaskState {
    /// 최종 상태인지 확인합니다.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// 태스크 실행 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskOutput {
    /// 처리한 항목 수 (패킷, 배치 원소 등)
    pub processed: usize,
    /// 매칭 수
    pub matched: usize,
}

/// 실행 가능한 작업 단위
///
/// 워커 풀과 게이트 스케줄러는 이 trait만 알고 있습니다.
pub trait WorkerTask: Send {
    /// 로그에 표시할 짧은 이름
    fn label(&self) -> &str;

    /// 작업을 실행합니다. 한 번만 호출되며 작업은 소비됩니다.
    fn execute(self: Box<Self>) -> Result<TaskOutput, EngineError>;
}

/// 클로저를 [`WorkerTask`]로 감싸는 어댑터
pub struct FnTask<F> {
    label: String,
    f: F,
}

impl<F> FnTask<F>
where
    F: FnOnce() -> Result<TaskOutput, EngineError> + Send,
{
    /// 새 클로저 태스크를 생성합니다.
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<F> WorkerTask for FnTask<F>
where
    F: FnOnce() -> Result<TaskOutput, EngineError> + Send,
{
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(self: Box<Self>) -> Result<TaskOutput, EngineError> {
        (self.f)()
    }
}

/// 태스크의 특정 시점 상태 사본
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    /// 태스크 ID
    pub id: TaskId,
    /// 작업 이름
    pub label: String,
    /// 우선순위 (0..=10)
    pub priority: i32,
    /// 현재 상태
    pub state: TaskState,
    /// 실행 결과 (완료 시)
    pub output: Option<TaskOutput>,
    /// 실패 사유 (실패 시)
    pub error: Option<String>,
    /// 제출 시각
    pub queued_at: Instant,
    /// 실행 시작 시각
    pub started_at: Option<Instant>,
    /// 종료 시각
    pub finished_at: Option<Instant>,
}

impl TaskSnapshot {
    /// 실제 실행 시간 (시작~종료)
    pub fn run_time(&self) -> Option<Duration> {
        Some(self.finished_at?.saturating_duration_since(self.started_at?))
    }

    /// 큐 대기 시간 (제출~시작)
    pub fn wait_time(&self) -> Option<Duration> {
        Some(self.started_at?.saturating_duration_since(self.queued_at))
    }
}

/// 상태 + 완료 신호
struct Completion {
    snapshot: Mutex<TaskSnapshot>,
    finished: Condvar,
}

impl Completion {
    fn mark_running(&self) {
        let mut snap = self.snapshot.lock();
        snap.state = TaskState::Running;
        snap.started_at = Some(Instant::now());
    }

    fn finish(&self, result: Result<TaskOutput, String>) {
        let mut snap = self.snapshot.lock();
        if snap.state.is_terminal() {
            return;
        }
        snap.finished_at = Some(Instant::now());
        match result {
            Ok(output) => {
                snap.state = TaskState::Completed;
                snap.output = Some(output);
            }
            Err(reason) => {
                snap.state = TaskState::Failed;
                snap.error = Some(reason);
            }
        }
        drop(snap);
        self.finished.notify_all();
    }
}

/// 제출자가 보관하는 태스크 핸들
///
/// 작업 본체는 큐와 워커가 소유하고, 핸들은 상태 조회와 완료 대기만 합니다.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    completion: Arc<Completion>,
}

impl TaskHandle {
    /// 태스크 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 현재 상태
    pub fn state(&self) -> TaskState {
        self.completion.snapshot.lock().state
    }

    /// 현재 상태 사본
    pub fn snapshot(&self) -> TaskSnapshot {
        self.completion.snapshot.lock().clone()
    }

    /// 최종 상태에 도달할 때까지 최대 `timeout` 동안 기다립니다.
    ///
    /// 시간 안에 끝나면 최종 스냅샷을, 아니면 `None`을 반환합니다.
    pub fn wait(&self, timeout: Duration) -> Option<TaskSnapshot> {
        let deadline = Instant::now() + timeout;
        let mut snap = self.completion.snapshot.lock();
        while !snap.state.is_terminal() {
            if self
                .completion
                .finished
                .wait_until(&mut snap, deadline)
                .timed_out()
            {
                break;
            }
        }
        snap.state.is_terminal().then(|| snap.clone())
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

/// 한 번의 실행 결과 요약 (풀/스케줄러 통계용)
#[derive(Debug, Clone, Copy)]
pub struct RunReport {
    /// 정상 완료 여부
    pub succeeded: bool,
    /// 실행 시간
    pub elapsed: Duration,
}

/// 큐에 들어가는 태스크
pub struct Task {
    id: TaskId,
    priority: i32,
    job: Option<Box<dyn WorkerTask>>,
    completion: Arc<Completion>,
}

impl Task {
    /// 태스크와 그 핸들을 생성합니다.
    pub fn new(id: TaskId, priority: i32, job: Box<dyn WorkerTask>) -> (Self, TaskHandle) {
        let snapshot = TaskSnapshot {
            id: id.clone(),
            label: job.label().to_owned(),
            priority,
            state: TaskState::Pending,
            output: None,
            error: None,
            queued_at: Instant::now(),
            started_at: None,
            finished_at: None,
        };
        let completion = Arc::new(Completion {
            snapshot: Mutex::new(snapshot),
            finished: Condvar::new(),
        });
        let handle = TaskHandle {
            id: id.clone(),
            completion: Arc::clone(&completion),
        };
        let task = Self {
            id,
            priority,
            job: Some(job),
            completion,
        };
        (task, handle)
    }

    /// 태스크 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 우선순위
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// 작업을 실행하고 결과를 기록합니다.
    ///
    /// 작업이 panic해도 호출한 워커 스레드는 살아남습니다.
    pub fn run(mut self) -> RunReport {
        let started = Instant::now();
        let Some(job) = self.job.take() else {
            return RunReport {
                succeeded: false,
                elapsed: Duration::ZERO,
            };
        };
        self.completion.mark_running();
        let label = job.label().to_owned();

        let result = match catch_unwind(AssertUnwindSafe(move || job.execute())) {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("task panicked: {}", panic_message(&*payload))),
        };
        let elapsed = started.elapsed();
        let succeeded = result.is_ok();
        if let Err(reason) = &result {
            warn!(task_id = %self.id, task = %label, error = %reason, "task failed");
        }
        self.completion.finish(result);
        RunReport { succeeded, elapsed }
    }

    /// 실행하지 않고 실패로 기록합니다 (강제 종료 시 큐 잔여분).
    pub fn discard(mut self, reason: &str) {
        self.job = None;
        self.completion.finish(Err(reason.to_owned()));
    }

    /// 상태 조회용 핸들을 하나 더 만듭니다.
    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id.clone(),
            completion: Arc::clone(&self.completion),
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.job.is_some() {
            self.completion
                .finish(Err("task dropped before execution".to_owned()));
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}

/// panic payload에서 메시지를 꺼냅니다.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
