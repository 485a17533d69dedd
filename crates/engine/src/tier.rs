//! 우선순위 티어: high / normal / low 세 개의 큐
//!
//! 정수 우선순위(0..=10)는 티어로 매핑됩니다: `7..=10` High, `4..=6` Normal, `0..=3` Low.
//! 티어 사이에는 엄격한 우선순위가, 티어 안에서는 [`PriorityQueue`] 순서가 적용됩니다.

use std::fmt;
use std::time::Duration;

use arpwarden_core::config::{MAX_PRIORITY, MIN_PRIORITY};
use serde::Serialize;

use crate::error::EngineError;
use crate::queue::PriorityQueue;

/// 우선순위 티어
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// 7..=10
    High,
    /// 4..=6
    Normal,
    /// 0..=3
    Low,
}

impl Tier {
    /// 높은 티어부터의 순서
    pub const ALL: [Tier; 3] = [Tier::High, Tier::Normal, Tier::Low];

    /// 정수 우선순위를 티어로 매핑합니다.
    pub fn for_priority(priority: i32) -> Result<Self, EngineError> {
        match priority {
            7..=MAX_PRIORITY => Ok(Self::High),
            4..=6 => Ok(Self::Normal),
            MIN_PRIORITY..=3 => Ok(Self::Low),
            other => Err(EngineError::InvalidPriority(other)),
        }
    }

    /// 메트릭 레이블용 이름
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 티어별 대기 항목 수
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    /// high 티어
    pub high: usize,
    /// normal 티어
    pub normal: usize,
    /// low 티어
    pub low: usize,
}

impl QueueDepths {
    /// 전체 합
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}

/// 세 개의 독립된 티어 큐
pub struct TieredQueues<T> {
    queues: [PriorityQueue<T>; 3],
}

impl<T> TieredQueues<T> {
    /// 티어마다 `capacity` 용량을 갖는 큐 묶음을 생성합니다.
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: [
                PriorityQueue::bounded(capacity),
                PriorityQueue::bounded(capacity),
                PriorityQueue::bounded(capacity),
            ],
        }
    }

    /// 티어 큐 참조
    pub fn queue(&self, tier: Tier) -> &PriorityQueue<T> {
        &self.queues[tier.index()]
    }

    /// 우선순위에 맞는 티어 큐에 넣고 그 티어를 반환합니다.
    pub fn put(&self, item: T, priority: i32) -> Result<Tier, EngineError> {
        let tier = Tier::for_priority(priority)?;
        self.queue(tier).put(item, priority)?;
        Ok(tier)
    }

    /// 가장 높은 티어에서 항목을 꺼냅니다.
    ///
    /// high → normal → low 순서로 기다리지 않고 시도한 뒤, 모두 비어 있으면
    /// normal 큐에서 최대 `idle_wait` 동안 기다립니다.
    pub fn dequeue_highest_available(&self, idle_wait: Duration) -> Option<(Tier, T)> {
        for tier in Tier::ALL {
            if let Some(item) = self.queue(tier).try_get() {
                return Some((tier, item));
            }
        }
        self.queue(Tier::Normal)
            .get(idle_wait)
            .map(|item| (Tier::Normal, item))
    }

    /// 티어 큐에 처리 완료를 알립니다.
    pub fn task_done(&self, tier: Tier) {
        self.queue(tier).task_done();
    }

    /// 세 큐의 미완료 작업이 모두 0이 될 때까지 블록합니다.
    pub fn join_all(&self) {
        for tier in Tier::ALL {
            self.queue(tier).join();
        }
    }

    /// 세 큐의 미완료 작업 합 (대기 + 처리 중)
    pub fn unfinished(&self) -> usize {
        self.queues.iter().map(PriorityQueue::unfinished).sum()
    }

    /// 티어별 대기 항목 수
    pub fn depths(&self) -> QueueDepths {
        QueueDepths {
            high: self.queue(Tier::High).len(),
            normal: self.queue(Tier::Normal).len(),
            low: self.queue(Tier::Low).len(),
        }
    }

    /// 모든 티어의 대기 항목을 꺼냅니다 (높은 티어부터).
    pub fn drain_all(&self) -> Vec<(Tier, T)> {
        Tier::ALL
            .into_iter()
            .flat_map(|tier| {
                self.queue(tier)
                    .drain()
                    .into_iter()
                    .map(move |item| (tier, item))
            })
            .collect()
    }
}
