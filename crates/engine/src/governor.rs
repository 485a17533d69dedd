//! 메모리 거버너: 프로세스 메모리 샘플링과 배치 크기 역압
//!
//! 주기적으로 프로세스 메모리를 샘플링해 배처의 `current_batch_size`를 조정합니다.
//!
//! | 사용률 (usage / limit) | 동작 |
//! |---|---|
//! | > 0.8 | 배치 크기 25% 축소 (하한 `min_batch_size`) |
//! | < 0.5 | 배치 크기 25% 확대 (상한 `max_batch_size`) |
//! | > 0.9 | 추가로 등록된 회수 훅 실행 |
//!
//! 메모리 압박은 요청 실패로 이어지지 않고 처리량 저하로만 나타납니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use arpwarden_core::metrics as m;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use crate::batcher::PacketBatcher;
use crate::config::GovernorConfig;
use crate::error::EngineError;

/// 메모리 사용량 샘플러
pub trait MemorySampler: Send + Sync {
    /// 현재 사용량을 바이트 단위로 반환합니다.
    fn sample_bytes(&self) -> Result<u64, EngineError>;
}

/// 현재 프로세스의 RSS를 읽는 샘플러
pub struct ProcessMemorySampler {
    system: Mutex<System>,
    pid: Pid,
}

impl ProcessMemorySampler {
    /// 현재 프로세스용 샘플러를 생성합니다.
    pub fn new() -> Result<Self, EngineError> {
        let pid = sysinfo::get_current_pid().map_err(|e| EngineError::Sampler(e.to_owned()))?;
        Ok(Self {
            system: Mutex::new(System::new()),
            pid,
        })
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample_bytes(&self) -> Result<u64, EngineError> {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        system
            .process(self.pid)
            .map(|p| p.memory())
            .ok_or_else(|| EngineError::Sampler(format!("process {} not found", self.pid)))
    }
}

/// 한 번의 조정 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum BatchAdjustment {
    /// 축소
    Shrunk {
        /// 이전 크기
        from: usize,
        /// 새 크기
        to: usize,
    },
    /// 확대
    Grew {
        /// 이전 크기
        from: usize,
        /// 새 크기
        to: usize,
    },
    /// 변경 없음
    Unchanged,
}

/// 한 번의 샘플링 보고
#[derive(Debug, Clone, Serialize)]
pub struct GovernorReport {
    /// 샘플링된 사용량 (바이트)
    pub usage_bytes: u64,
    /// 사용률 (usage / limit)
    pub ratio: f64,
    /// 배치 크기 조정 결과
    pub adjustment: BatchAdjustment,
    /// 회수 훅을 실행했는지 여부
    pub reclaimed: bool,
}

type ReclaimHook = Box<dyn Fn() + Send + Sync>;

struct GovernorInner {
    config: GovernorConfig,
    sampler: Arc<dyn MemorySampler>,
    batcher: Arc<PacketBatcher>,
    hooks: Mutex<Vec<(String, ReclaimHook)>>,
    last_usage: AtomicU64,
    ticks: AtomicU64,
    stop: Mutex<bool>,
    wake: Condvar,
}

/// 메모리 거버너
pub struct MemoryGovernor {
    inner: Arc<GovernorInner>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryGovernor {
    /// 새 거버너를 생성합니다. 모니터 스레드는 `start()`에서 시작됩니다.
    pub fn new(
        config: GovernorConfig,
        sampler: Arc<dyn MemorySampler>,
        batcher: Arc<PacketBatcher>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(GovernorInner {
                config,
                sampler,
                batcher,
                hooks: Mutex::new(Vec::new()),
                last_usage: AtomicU64::new(0),
                ticks: AtomicU64::new(0),
                stop: Mutex::new(false),
                wake: Condvar::new(),
            }),
            monitor: Mutex::new(None),
        })
    }

    /// 사용률이 임계값을 넘을 때 실행할 회수 훅을 등록합니다.
    pub fn register_reclaim_hook<F>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.hooks.lock().push((name.into(), Box::new(hook)));
    }

    /// 샘플링 한 번을 수행하고 배치 크기를 조정합니다.
    pub fn tick(&self) -> Result<GovernorReport, EngineError> {
        self.inner.tick()
    }

    /// 모니터 스레드를 시작합니다.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() {
            return Ok(());
        }
        *self.inner.stop.lock() = false;
        let inner = Arc::clone(&self.inner);
        *monitor = Some(
            thread::Builder::new()
                .name("arpwarden-memory-governor".to_owned())
                .spawn(move || monitor_loop(inner))?,
        );
        info!(
            limit_bytes = self.inner.config.memory_limit_bytes,
            interval_secs = self.inner.config.check_interval.as_secs_f64(),
            "memory governor started"
        );
        Ok(())
    }

    /// 모니터 스레드를 멈춥니다.
    pub fn stop(&self) {
        *self.inner.stop.lock() = true;
        self.inner.wake.notify_all();
        if let Some(handle) = self.monitor.lock().take() {
            if handle.join().is_err() {
                error!("memory governor thread panicked");
            }
        }
    }

    /// 마지막 샘플의 사용률 (샘플 전이면 0)
    pub fn pressure(&self) -> f64 {
        self.inner.last_usage.load(Ordering::Relaxed) as f64
            / self.inner.config.memory_limit_bytes as f64
    }

    /// 마지막 샘플의 사용량 (바이트)
    pub fn last_usage_bytes(&self) -> u64 {
        self.inner.last_usage.load(Ordering::Relaxed)
    }

    /// 거버너 설정
    pub fn config(&self) -> &GovernorConfig {
        &self.inner.config
    }
}

impl Drop for MemoryGovernor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl GovernorInner {
    fn tick(&self) -> Result<GovernorReport, EngineError> {
        let usage = self.sampler.sample_bytes()?;
        self.last_usage.store(usage, Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!(m::GOVERNOR_MEMORY_USAGE_BYTES).set(usage as f64);

        let c = &self.config;
        let ratio = usage as f64 / c.memory_limit_bytes as f64;
        let current = self.batcher.current_batch_size();

        let adjustment = if ratio > c.shrink_above {
            let target = (current as f64 * (1.0 - c.adjust_factor)).floor() as usize;
            let to = self.batcher.set_current_batch_size(target);
            if to < current {
                BatchAdjustment::Shrunk { from: current, to }
            } else {
                BatchAdjustment::Unchanged
            }
        } else if ratio < c.grow_below {
            let target = (current as f64 * (1.0 + c.adjust_factor)).ceil() as usize;
            let to = self.batcher.set_current_batch_size(target);
            if to > current {
                BatchAdjustment::Grew { from: current, to }
            } else {
                BatchAdjustment::Unchanged
            }
        } else {
            BatchAdjustment::Unchanged
        };

        match adjustment {
            BatchAdjustment::Shrunk { from, to } => {
                info!(ratio, from, to, "memory pressure, batch size reduced");
            }
            BatchAdjustment::Grew { from, to } => {
                debug!(ratio, from, to, "memory headroom, batch size increased");
            }
            BatchAdjustment::Unchanged => {}
        }

        let reclaimed = ratio > c.reclaim_above;
        if reclaimed {
            let err = EngineError::ResourceExhaustion {
                usage_bytes: usage,
                limit_bytes: c.memory_limit_bytes,
            };
            let hooks = self.hooks.lock();
            warn!(error = %err, hooks = hooks.len(), "running memory reclaim hooks");
            for (name, hook) in hooks.iter() {
                debug!(hook = name.as_str(), "reclaim hook");
                hook();
            }
            metrics::counter!(m::GOVERNOR_RECLAIM_TOTAL).increment(1);
        }

        Ok(GovernorReport {
            usage_bytes: usage,
            ratio,
            adjustment,
            reclaimed,
        })
    }
}

fn monitor_loop(inner: Arc<GovernorInner>) {
    loop {
        {
            let mut stop = inner.stop.lock();
            if !*stop {
                inner.wake.wait_for(&mut stop, inner.config.check_interval);
            }
            if *stop {
                break;
            }
        }
        if let Err(e) = inner.tick() {
            warn!(error = %e, "memory sampling failed");
        }
    }
    debug!("memory governor stopped");
}
