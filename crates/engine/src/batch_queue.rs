//! 배치 큐: 항목을 크기/시간 제한 배치로 묶어 하위 처리기로 넘김
//!
//! 대기 목록의 길이가 `batch_size` 이상이 되거나 첫 항목 이후 `batch_timeout`이
//! 지나면(먼저 오는 쪽) 목록을 하나의 배치로 봉인해 내부 채널로 보냅니다.
//! 단일 백그라운드 소비자 스레드가 채널을 비우며, 새 항목이 없어도 최대 0.5초
//! 주기로 깨어나 타임아웃 플러시를 스스로 수행합니다.
//!
//! # 디스패치
//! - [`BatchDispatch::Inline`]: 소비자 스레드에서 핸들러를 직접 호출
//! - [`BatchDispatch::Executor`]: 배치를 [`BatchProcessingTask`]로 감싸 실행기에 제출

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::EngineError;
use crate::executor::TaskExecutor;
use crate::queue::WorkCounter;
use crate::task::{TaskOutput, WorkerTask, panic_message};

/// 배치 핸들러
pub type BatchHandler<T> = Arc<dyn Fn(Vec<T>) -> Result<TaskOutput, EngineError> + Send + Sync>;

/// 봉인된 배치를 처리하는 방식
pub enum BatchDispatch<T> {
    /// 소비자 스레드에서 직접 처리
    Inline(BatchHandler<T>),
    /// 실행기에 태스크로 제출
    Executor {
        /// 대상 실행기
        executor: Arc<dyn TaskExecutor>,
        /// 배치 핸들러
        handler: BatchHandler<T>,
        /// 제출 우선순위
        priority: i32,
    },
}

impl<T> Clone for BatchDispatch<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Inline(h) => Self::Inline(Arc::clone(h)),
            Self::Executor {
                executor,
                handler,
                priority,
            } => Self::Executor {
                executor: Arc::clone(executor),
                handler: Arc::clone(handler),
                priority: *priority,
            },
        }
    }
}

/// 배치 큐 설정
#[derive(Debug, Clone)]
pub struct BatchQueueConfig {
    /// 이 개수가 모이면 봉인
    pub batch_size: usize,
    /// 첫 항목 이후 이 시간이 지나면 봉인
    pub batch_timeout: Duration,
    /// 소비자 스레드의 최대 대기 주기
    pub poll_interval: Duration,
}

impl Default for BatchQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            batch_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// 실행기에 제출되는 배치 처리 태스크
///
/// 실행되든 버려지든 소멸 시점에 배치 항목 수만큼 미완료 카운터를 줄입니다.
pub struct BatchProcessingTask<T> {
    items: Option<Vec<T>>,
    handler: BatchHandler<T>,
    counter: Arc<WorkCounter>,
    count: usize,
}

impl<T> BatchProcessingTask<T> {
    fn new(items: Vec<T>, handler: BatchHandler<T>, counter: Arc<WorkCounter>) -> Self {
        let count = items.len();
        Self {
            items: Some(items),
            handler,
            counter,
            count,
        }
    }
}

impl<T: Send> WorkerTask for BatchProcessingTask<T> {
    fn label(&self) -> &str {
        "batch"
    }

    fn execute(mut self: Box<Self>) -> Result<TaskOutput, EngineError> {
        let items = self.items.take().unwrap_or_default();
        (self.handler)(items)
    }
}

impl<T> Drop for BatchProcessingTask<T> {
    fn drop(&mut self) {
        self.counter.done_n(self.count);
    }
}

enum Message<T> {
    /// 봉인된 배치
    Batch(Vec<T>),
    /// 빈 대기 목록에 첫 항목이 들어옴 (대기 시간 재계산)
    Wake,
}

/// 대기 목록과 송신단을 한 잠금 아래 둔다.
/// 봉인과 채널 전송이 같은 임계 구역에서 일어나므로 배치는 봉인 순서대로 도착하고,
/// `close()` 이후의 `put`은 항상 거부된다.
struct Pending<T> {
    items: Vec<T>,
    first_at: Option<Instant>,
    sender: Option<Sender<Message<T>>>,
}

impl<T> Pending<T> {
    fn take(&mut self) -> Vec<T> {
        self.first_at = None;
        std::mem::take(&mut self.items)
    }

    /// 봉인된 배치를 소비자에게 보냅니다. 실패하면 항목을 완료 처리합니다.
    fn send(&self, batch: Vec<T>, work: &WorkCounter) -> Result<(), EngineError> {
        let size = batch.len();
        let sent = match &self.sender {
            Some(tx) => tx.send(Message::Batch(batch)).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            work.done_n(size);
            Err(EngineError::NotRunning)
        }
    }
}

struct Shared<T> {
    config: BatchQueueConfig,
    pending: Mutex<Pending<T>>,
    work: Arc<WorkCounter>,
    dispatch: BatchDispatch<T>,
    batches: AtomicU64,
}

impl<T: Send + 'static> Shared<T> {
    /// 타임아웃이 지난 대기 목록을 봉인합니다.
    ///
    /// 봉인 시점에 채널에 먼저 들어와 있던 메시지 수를 함께 돌려줍니다.
    fn take_expired(&self, rx: &Receiver<Message<T>>) -> Option<(usize, Vec<T>)> {
        let mut pending = self.pending.lock();
        match pending.first_at {
            Some(at) if at.elapsed() >= self.config.batch_timeout => {
                Some((rx.len(), pending.take()))
            }
            _ => None,
        }
    }

    /// 다음 타임아웃까지 남은 시간 (최대 `poll_interval`)
    fn next_wait(&self) -> Duration {
        let pending = self.pending.lock();
        match pending.first_at {
            Some(at) => self
                .config
                .batch_timeout
                .saturating_sub(at.elapsed())
                .min(self.config.poll_interval),
            None => self.config.poll_interval,
        }
    }

    fn dispatch(&self, batch: Vec<T>) {
        if batch.is_empty() {
            return;
        }
        let size = batch.len();
        let seq = self.batches.fetch_add(1, Ordering::Relaxed);
        debug!(batch = seq, size, "dispatching batch");

        match &self.dispatch {
            BatchDispatch::Inline(handler) => {
                match catch_unwind(AssertUnwindSafe(|| handler(batch))) {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(batch = seq, size, error = %e, "batch handler failed"),
                    Err(payload) => warn!(
                        batch = seq,
                        size,
                        error = %panic_message(&*payload),
                        "batch handler panicked"
                    ),
                }
                self.work.done_n(size);
            }
            BatchDispatch::Executor {
                executor,
                handler,
                priority,
            } => {
                let task =
                    BatchProcessingTask::new(batch, Arc::clone(handler), Arc::clone(&self.work));
                if let Err(e) = executor.submit_task(Box::new(task), *priority, None) {
                    error!(batch = seq, size, error = %e, "batch rejected by executor, discarded");
                }
            }
        }
    }
}

/// 배치 큐
pub struct BatchQueue<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BatchQueue<T> {
    /// 배치 큐를 만들고 소비자 스레드를 시작합니다.
    pub fn new(config: BatchQueueConfig, dispatch: BatchDispatch<T>) -> Result<Self, EngineError> {
        if config.batch_size == 0 {
            return Err(EngineError::Config {
                field: "batch_size".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if config.batch_timeout.is_zero() || config.poll_interval.is_zero() {
            return Err(EngineError::Config {
                field: "batch_timeout".to_owned(),
                reason: "timeouts must be greater than 0".to_owned(),
            });
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            config,
            pending: Mutex::new(Pending {
                items: Vec::new(),
                first_at: None,
                sender: Some(tx),
            }),
            work: Arc::new(WorkCounter::new()),
            dispatch,
            batches: AtomicU64::new(0),
        });
        let consumer_shared = Arc::clone(&shared);
        let consumer = thread::Builder::new()
            .name("arpwarden-batch-flush".to_owned())
            .spawn(move || consumer_loop(consumer_shared, rx))?;

        Ok(Self {
            shared,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// 항목 하나를 추가합니다. 크기나 시간 조건을 만족하면 배치를 봉인합니다.
    pub fn put(&self, item: T) -> Result<(), EngineError> {
        let mut pending = self.shared.pending.lock();
        if pending.sender.is_none() {
            return Err(EngineError::NotRunning);
        }
        let now = Instant::now();
        let first = pending.first_at.is_none();
        let first_at = *pending.first_at.get_or_insert(now);
        pending.items.push(item);
        self.shared.work.add(1);

        let full = pending.items.len() >= self.shared.config.batch_size;
        let expired = now.duration_since(first_at) >= self.shared.config.batch_timeout;
        if full || expired {
            let batch = pending.take();
            return pending.send(batch, &self.shared.work);
        }
        if first {
            if let Some(tx) = &pending.sender {
                let _ = tx.send(Message::Wake);
            }
        }
        Ok(())
    }

    /// 대기 중인 부분 배치를 즉시 봉인합니다.
    pub fn flush(&self) -> Result<(), EngineError> {
        let mut pending = self.shared.pending.lock();
        let batch = pending.take();
        if batch.is_empty() {
            return Ok(());
        }
        pending.send(batch, &self.shared.work)
    }

    /// 추가된 모든 항목이 처리될 때까지 블록합니다.
    ///
    /// 부분 배치는 타임아웃이 지나야 봉인되므로 즉시 끝내려면 먼저 `flush()`를 호출합니다.
    pub fn join(&self) {
        self.shared.work.join();
    }

    /// 아직 처리되지 않은 항목 수
    pub fn outstanding(&self) -> usize {
        self.shared.work.outstanding()
    }

    /// 봉인을 기다리는 항목 수
    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().items.len()
    }

    /// 지금까지 처리된 배치 수
    pub fn batches_dispatched(&self) -> u64 {
        self.shared.batches.load(Ordering::Relaxed)
    }

    /// 부분 배치를 플러시하고 소비자 스레드를 멈춥니다. 이후의 `put`은 거부됩니다.
    pub fn close(&self) {
        {
            let mut pending = self.shared.pending.lock();
            let batch = pending.take();
            if !batch.is_empty() {
                if let Err(e) = pending.send(batch, &self.shared.work) {
                    warn!(error = %e, "final flush failed");
                }
            }
            // 마지막 송신단을 버려 소비자가 남은 메시지를 비운 뒤 끝나게 한다
            pending.sender = None;
        }
        if let Some(handle) = self.consumer.lock().take() {
            if handle.join().is_err() {
                error!("batch flush thread panicked");
            }
        }
    }
}

impl<T: Send + 'static> Drop for BatchQueue<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn consumer_loop<T: Send + 'static>(shared: Arc<Shared<T>>, rx: Receiver<Message<T>>) {
    loop {
        match rx.recv_timeout(shared.next_wait()) {
            Ok(Message::Batch(batch)) => shared.dispatch(batch),
            Ok(Message::Wake) | Err(RecvTimeoutError::Timeout) => {
                if let Some((ahead, batch)) = shared.take_expired(&rx) {
                    // 먼저 봉인된 배치부터 처리
                    for _ in 0..ahead {
                        match rx.try_recv() {
                            Ok(Message::Batch(earlier)) => shared.dispatch(earlier),
                            Ok(Message::Wake) => {}
                            Err(_) => break,
                        }
                    }
                    shared.dispatch(batch);
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("batch flush thread stopped");
}
