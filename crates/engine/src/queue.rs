//! 스레드 안전 우선순위 큐와 미완료 작업 카운터
//!
//! [`PriorityQueue`]는 `(priority 내림차순, 제출 순서 오름차순)` 키로 항목을 꺼냅니다.
//! 같은 우선순위끼리는 제출 순서(FIFO)가 보존됩니다.
//!
//! 미완료 작업 계산은 고전적인 카운터 패턴을 따릅니다:
//! `put`마다 1 증가, `task_done`마다 1 감소, `join`은 0이 될 때까지 블록합니다.
//! `join`에는 타임아웃 변형이 없으므로 상한이 필요한 쪽은 [`PriorityQueue::unfinished`]를
//! 외부에서 폴링해야 합니다.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::EngineError;

/// 미완료 작업 카운터
///
/// `add`로 증가시키고 `done`으로 감소시키며, `join`은 0이 될 때까지 기다립니다.
#[derive(Debug, Default)]
pub struct WorkCounter {
    count: Mutex<usize>,
    zero: Condvar,
}

impl WorkCounter {
    /// 새 카운터를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 미완료 작업을 `n`개 추가합니다.
    pub fn add(&self, n: usize) {
        *self.count.lock() += n;
    }

    /// 작업 하나의 완료를 기록합니다.
    pub fn done(&self) {
        self.done_n(1);
    }

    /// 작업 `n`개의 완료를 기록합니다.
    pub fn done_n(&self, n: usize) {
        let mut count = self.count.lock();
        *count = count.saturating_sub(n);
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    /// 미완료 작업 수
    pub fn outstanding(&self) -> usize {
        *self.count.lock()
    }

    /// 미완료 작업이 0이 될 때까지 블록합니다.
    pub fn join(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }
}

struct Entry<T> {
    priority: i32,
    seq: u64,
    item: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    // BinaryHeap은 최대 힙: 높은 우선순위, 그다음 작은 seq가 "큰" 값
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Heap<T> {
    entries: BinaryHeap<Entry<T>>,
    next_seq: u64,
}

/// 다중 생산자/다중 소비자 우선순위 큐
pub struct PriorityQueue<T> {
    heap: Mutex<Heap<T>>,
    not_empty: Condvar,
    capacity: Option<usize>,
    work: WorkCounter,
}

impl<T> PriorityQueue<T> {
    /// 용량 제한 없는 큐를 생성합니다.
    pub fn unbounded() -> Self {
        Self::with_capacity_limit(None)
    }

    /// 최대 `capacity`개까지 담는 큐를 생성합니다.
    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity_limit(Some(capacity))
    }

    fn with_capacity_limit(capacity: Option<usize>) -> Self {
        Self {
            heap: Mutex::new(Heap {
                entries: BinaryHeap::new(),
                next_seq: 0,
            }),
            not_empty: Condvar::new(),
            capacity,
            work: WorkCounter::new(),
        }
    }

    /// 항목을 넣습니다. 가득 찬 경우 블록하지 않고 `QueueFull`을 반환합니다.
    pub fn put(&self, item: T, priority: i32) -> Result<(), EngineError> {
        let mut heap = self.heap.lock();
        if let Some(capacity) = self.capacity {
            if heap.entries.len() >= capacity {
                return Err(EngineError::QueueFull { capacity });
            }
        }
        let seq = heap.next_seq;
        heap.next_seq += 1;
        heap.entries.push(Entry {
            priority,
            seq,
            item,
        });
        self.work.add(1);
        drop(heap);
        self.not_empty.notify_one();
        Ok(())
    }

    /// 항목이 생길 때까지 최대 `timeout` 동안 기다렸다가 꺼냅니다.
    pub fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut heap = self.heap.lock();
        loop {
            if let Some(entry) = heap.entries.pop() {
                return Some(entry.item);
            }
            if self.not_empty.wait_until(&mut heap, deadline).timed_out() {
                return heap.entries.pop().map(|e| e.item);
            }
        }
    }

    /// 기다리지 않고 꺼냅니다.
    pub fn try_get(&self) -> Option<T> {
        self.heap.lock().entries.pop().map(|e| e.item)
    }

    /// 꺼낸 항목 하나의 처리 완료를 알립니다.
    pub fn task_done(&self) {
        self.work.done();
    }

    /// 넣은 모든 항목이 `task_done` 될 때까지 블록합니다.
    pub fn join(&self) {
        self.work.join();
    }

    /// 아직 `task_done`되지 않은 항목 수 (대기 + 처리 중)
    pub fn unfinished(&self) -> usize {
        self.work.outstanding()
    }

    /// 대기 중인 항목 수
    pub fn len(&self) -> usize {
        self.heap.lock().entries.len()
    }

    /// 대기 중인 항목이 없는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 최대 용량
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// 대기 중인 항목을 우선순위 순서대로 모두 꺼냅니다.
    ///
    /// 카운터는 건드리지 않으므로 호출자가 항목마다 `task_done`을 호출해야 합니다.
    pub fn drain(&self) -> Vec<T> {
        let mut heap = self.heap.lock();
        let mut items = Vec::with_capacity(heap.entries.len());
        while let Some(entry) = heap.entries.pop() {
            items.push(entry.item);
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn higher_priority_dequeues_first() {
        let q = PriorityQueue::unbounded();
        q.put("low", 1).unwrap();
        q.put("high", 9).unwrap();
        q.put("mid", 5).unwrap();
        assert_eq!(q.try_get(), Some("high"));
        assert_eq!(q.try_get(), Some("mid"));
        assert_eq!(q.try_get(), Some("low"));
        assert_eq!(q.try_get(), None);
    }

    #[test]
    fn equal_priority_preserves_submission_order() {
        let q = PriorityQueue::unbounded();
        for i in 0..5 {
            q.put(i, 3).unwrap();
        }
        let out: Vec<_> = std::iter::from_fn(|| q.try_get()).collect();
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn bounded_queue_rejects_when_full() {
        let q = PriorityQueue::bounded(2);
        q.put(1, 0).unwrap();
        q.put(2, 0).unwrap();
        let err = q.put(3, 10).unwrap_err();
        assert!(matches!(err, EngineError::QueueFull { capacity: 2 }));
        assert_eq!(q.len(), 2);
        assert_eq!(q.unfinished(), 2);
    }

    #[test]
    fn get_times_out_on_empty_queue() {
        let q: PriorityQueue<u32> = PriorityQueue::unbounded();
        let started = Instant::now();
        assert_eq!(q.get(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn get_wakes_on_put_from_other_thread() {
        let q = Arc::new(PriorityQueue::unbounded());
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.put(42, 1).unwrap();
            })
        };
        assert_eq!(q.get(Duration::from_secs(2)), Some(42));
        producer.join().unwrap();
    }

    #[test]
    fn join_returns_after_all_task_done() {
        let q = Arc::new(PriorityQueue::unbounded());
        for i in 0..10 {
            q.put(i, i).unwrap();
        }
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    while q.get(Duration::from_millis(50)).is_some() {
                        q.task_done();
                    }
                })
            })
            .collect();
        q.join();
        assert_eq!(q.unfinished(), 0);
        assert!(q.is_empty());
        for c in consumers {
            c.join().unwrap();
        }
    }

    #[test]
    fn drain_leaves_counter_to_caller() {
        let q = PriorityQueue::unbounded();
        q.put('a', 1).unwrap();
        q.put('b', 2).unwrap();
        assert_eq!(q.drain(), vec!['b', 'a']);
        assert_eq!(q.unfinished(), 2);
        q.task_done();
        q.task_done();
        assert_eq!(q.unfinished(), 0);
    }

    #[test]
    fn work_counter_done_saturates() {
        let c = WorkCounter::new();
        c.add(1);
        c.done_n(5);
        assert_eq!(c.outstanding(), 0);
        c.join();
    }
}
