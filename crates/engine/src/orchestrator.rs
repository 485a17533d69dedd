//! 탐지 오케스트레이터: 패킷 유입, 배칭, 룰 프로세서 제출을 연결
//!
//! # 데이터 흐름
//! ```text
//! ingest() -> PacketBatcher -> (봉인된 배치 + 컨텍스트 스냅샷) -> RuleProcessor -> TaskExecutor
//!                  ^
//!     flusher 스레드 (타임아웃 점검)
//! ```
//!
//! 공유 [`DetectionContext`]는 `ArcSwap`으로 보관합니다. 갱신은 새 값을 통째로 만들어
//! 원자적으로 교체하므로, 읽는 쪽은 락 없이 항상 완전한 스냅샷을 봅니다.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use arpwarden_core::context::DetectionContext;
use arpwarden_core::pipeline::ContextProvider;
use arpwarden_core::types::ArpPacket;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::batcher::{Batch, PacketBatcher};
use crate::config::OrchestratorConfig;
use crate::error::EngineError;
use crate::processor::RuleProcessor;

/// 오케스트레이터 통계
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    /// 유입된 패킷 수
    pub packets_ingested: u64,
    /// 룰 프로세서에 제출한 배치 수
    pub batches_submitted: u64,
    /// 제출이 거부된 배치 수
    pub batches_rejected: u64,
    /// 봉인을 기다리는 패킷 수
    pub pending_packets: usize,
    /// 현재 배치 크기 상한
    pub current_batch_size: usize,
    /// 현재 컨텍스트 세대
    pub context_generation: u64,
    /// 컨텍스트 갱신 성공 횟수
    pub context_refreshes: u64,
    /// 컨텍스트 갱신 실패 횟수
    pub context_refresh_failures: u64,
}

#[derive(Default)]
struct Counters {
    packets_ingested: AtomicU64,
    batches_submitted: AtomicU64,
    batches_rejected: AtomicU64,
    context_refreshes: AtomicU64,
    context_refresh_failures: AtomicU64,
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    provider: Arc<dyn ContextProvider>,
    context: ArcSwap<DetectionContext>,
    last_refresh: Mutex<Instant>,
    batcher: Arc<PacketBatcher>,
    processor: Arc<RuleProcessor>,
    running: AtomicBool,
    counters: Counters,
    in_transit: AtomicUsize,
    stop: Mutex<bool>,
    wake: Condvar,
}

/// 탐지 오케스트레이터
pub struct DetectionOrchestrator {
    inner: Arc<OrchestratorInner>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl DetectionOrchestrator {
    /// 새 오케스트레이터를 생성하고 첫 컨텍스트 스냅샷을 만듭니다.
    ///
    /// 첫 스냅샷에 실패하면 빈 컨텍스트로 시작하고 다음 갱신 주기에 다시 시도합니다.
    pub fn new(
        config: OrchestratorConfig,
        provider: Arc<dyn ContextProvider>,
        batcher: Arc<PacketBatcher>,
        processor: Arc<RuleProcessor>,
    ) -> Self {
        let counters = Counters::default();
        let initial = match provider.snapshot() {
            Ok(context) => {
                counters.context_refreshes.fetch_add(1, Ordering::Relaxed);
                context.with_generation(1)
            }
            Err(e) => {
                counters
                    .context_refresh_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "initial context snapshot failed, starting with empty context");
                DetectionContext::empty()
            }
        };

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                provider,
                context: ArcSwap::from_pointee(initial),
                last_refresh: Mutex::new(Instant::now()),
                batcher,
                processor,
                running: AtomicBool::new(false),
                counters,
                in_transit: AtomicUsize::new(0),
                stop: Mutex::new(false),
                wake: Condvar::new(),
            }),
            flusher: Mutex::new(None),
        }
    }

    /// 패킷 유입과 타임아웃 플러시 스레드를 시작합니다.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut flusher = self.flusher.lock();
        if flusher.is_some() {
            return Ok(());
        }
        *self.inner.stop.lock() = false;
        let inner = Arc::clone(&self.inner);
        *flusher = Some(
            thread::Builder::new()
                .name("arpwarden-batch-flusher".to_owned())
                .spawn(move || flush_loop(inner))?,
        );
        self.inner.running.store(true, Ordering::Release);
        info!("detection orchestrator started");
        Ok(())
    }

    /// 패킷 유입을 멈추고 남은 버퍼를 마지막으로 제출합니다.
    ///
    /// 제출한 배치 수를 반환합니다. 실행기는 아직 실행 중이어야 합니다.
    pub fn shutdown(&self) -> Result<usize, EngineError> {
        self.inner.running.store(false, Ordering::Release);
        *self.inner.stop.lock() = true;
        self.inner.wake.notify_all();
        if let Some(handle) = self.flusher.lock().take() {
            if handle.join().is_err() {
                error!("batch flusher thread panicked");
            }
        }
        let submitted = self.flush()?;
        info!(final_batches = submitted, "detection orchestrator stopped");
        Ok(submitted)
    }

    /// 패킷 하나를 받아들입니다. 배치가 봉인되면 바로 룰 프로세서에 제출합니다.
    pub fn ingest(&self, packet: ArpPacket) -> Result<(), EngineError> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        self.inner
            .counters
            .packets_ingested
            .fetch_add(1, Ordering::Relaxed);
        let _transit = InTransit::enter(&self.inner.in_transit);
        match self.inner.batcher.add_packet(packet) {
            Some(batch) => self.inner.submit(batch),
            None => Ok(()),
        }
    }

    /// 여러 패킷을 받아들입니다. 받아들인 수를 반환합니다.
    pub fn ingest_all<I>(&self, packets: I) -> Result<usize, EngineError>
    where
        I: IntoIterator<Item = ArpPacket>,
    {
        let mut count = 0;
        for packet in packets {
            self.ingest(packet)?;
            count += 1;
        }
        Ok(count)
    }

    /// 부분 배치를 포함해 버퍼를 모두 제출합니다. 제출한 배치 수를 반환합니다.
    pub fn flush(&self) -> Result<usize, EngineError> {
        let _transit = InTransit::enter(&self.inner.in_transit);
        let batches = self.inner.batcher.flush();
        let count = batches.len();
        for batch in batches {
            self.inner.submit(batch)?;
        }
        Ok(count)
    }

    /// 버퍼를 비우고, 하위 실행기의 남은 작업이 0이 될 때까지 기다립니다.
    ///
    /// 제한 시간 안에 끝나면 `true`를 반환합니다.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        if let Err(e) = self.flush() {
            warn!(error = %e, "flush before completion wait failed");
        }
        let executor = self.inner.processor.executor();
        loop {
            if self.inner.in_transit.load(Ordering::Acquire) == 0
                && executor.outstanding() == 0
                && self.inner.batcher.pending_len() == 0
            {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(
                    outstanding = executor.outstanding(),
                    pending = self.inner.batcher.pending_len(),
                    "completion wait timed out"
                );
                return false;
            }
            thread::sleep(
                self.inner
                    .config
                    .completion_poll_interval
                    .min(deadline - now),
            );
        }
    }

    /// 현재 컨텍스트 스냅샷
    pub fn current_context(&self) -> Arc<DetectionContext> {
        self.inner.context.load_full()
    }

    /// 갱신 간격과 무관하게 컨텍스트를 즉시 갱신합니다.
    ///
    /// 실패하면 이전 컨텍스트가 그대로 유지됩니다.
    pub fn refresh_context(&self) -> Result<Arc<DetectionContext>, EngineError> {
        self.inner.refresh()
    }

    /// 유입 중인지 확인합니다.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// 패킷 배처
    pub fn batcher(&self) -> &Arc<PacketBatcher> {
        &self.inner.batcher
    }

    /// 룰 프로세서
    pub fn processor(&self) -> &Arc<RuleProcessor> {
        &self.inner.processor
    }

    /// 오케스트레이터 통계의 현재 사본
    pub fn stats(&self) -> OrchestratorStats {
        let inner = &self.inner;
        let c = &inner.counters;
        OrchestratorStats {
            packets_ingested: c.packets_ingested.load(Ordering::Relaxed),
            batches_submitted: c.batches_submitted.load(Ordering::Relaxed),
            batches_rejected: c.batches_rejected.load(Ordering::Relaxed),
            pending_packets: inner.batcher.pending_len(),
            current_batch_size: inner.batcher.current_batch_size(),
            context_generation: inner.context.load().generation,
            context_refreshes: c.context_refreshes.load(Ordering::Relaxed),
            context_refresh_failures: c.context_refresh_failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for DetectionOrchestrator {
    fn drop(&mut self) {
        *self.inner.stop.lock() = true;
        self.inner.wake.notify_all();
        if let Some(handle) = self.flusher.lock().take() {
            let _ = handle.join();
        }
    }
}

impl OrchestratorInner {
    /// 봉인된 배치를 최신 컨텍스트와 함께 제출합니다.
    fn submit(&self, batch: Batch) -> Result<(), EngineError> {
        self.maybe_refresh();
        let context = self.context.load_full();
        match self.processor.process_packets(&batch, context) {
            Ok(_) => {
                self.counters
                    .batches_submitted
                    .fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters
                    .batches_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(batch = batch.id(), packets = batch.len(), error = %e, "batch rejected");
                Err(e)
            }
        }
    }

    /// 갱신 간격이 지났을 때만 컨텍스트를 갱신합니다.
    fn maybe_refresh(&self) {
        {
            let mut last = self.last_refresh.lock();
            if last.elapsed() < self.config.context_update_interval {
                return;
            }
            *last = Instant::now();
        }
        if let Err(e) = self.refresh() {
            warn!(error = %e, "context refresh failed, keeping previous snapshot");
        }
    }

    fn refresh(&self) -> Result<Arc<DetectionContext>, EngineError> {
        let snapshot = match self.provider.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.counters
                    .context_refresh_failures
                    .fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };
        let generation = self.context.load().generation + 1;
        let next = Arc::new(snapshot.with_generation(generation));
        self.context.store(Arc::clone(&next));
        *self.last_refresh.lock() = Instant::now();
        self.counters
            .context_refreshes
            .fetch_add(1, Ordering::Relaxed);
        debug!(generation, "detection context refreshed");
        Ok(next)
    }
}

/// 봉인된 배치가 실행기에 닿기 전 구간을 표시합니다.
struct InTransit<'a>(&'a AtomicUsize);

impl<'a> InTransit<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InTransit<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn flush_loop(inner: Arc<OrchestratorInner>) {
    loop {
        {
            let mut stop = inner.stop.lock();
            if !*stop {
                inner
                    .wake
                    .wait_for(&mut stop, inner.config.flush_poll_interval);
            }
            if *stop {
                break;
            }
        }
        let _transit = InTransit::enter(&inner.in_transit);
        for batch in inner.batcher.poll_timeout() {
            // 거부된 배치는 submit에서 기록됨
            let _ = inner.submit(batch);
        }
    }
    debug!("batch flusher stopped");
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Barrier;
    use std::sync::atomic::AtomicUsize;

    use arpwarden_core::error::DetectionError;
    use arpwarden_core::pipeline::{RuleOutcome, StaticContextProvider};
    use arpwarden_core::types::{ArpOperation, MacAddr};

    use super::*;
    use crate::config::{BatcherConfig, PoolConfig, ProcessorConfig};
    use crate::executor::TaskExecutor;
    use crate::pool::WorkerPool;

    struct CountingProvider {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl ContextProvider for CountingProvider {
        fn snapshot(&self) -> Result<DetectionContext, DetectionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(DetectionError::ContextUnavailable("offline".to_owned()));
            }
            Ok(DetectionContext::empty()
                .with_arp_entry(Ipv4Addr::new(10, 0, 0, 1), MacAddr([0, 0, 0, 0, 0, n as u8])))
        }
    }

    fn packet() -> ArpPacket {
        ArpPacket::new(
            MacAddr([2, 0, 0, 0, 0, 9]),
            Ipv4Addr::new(10, 0, 0, 9),
            MacAddr::ZERO,
            Ipv4Addr::new(10, 0, 0, 1),
            ArpOperation::Request,
        )
    }

    fn build(
        provider: Arc<dyn ContextProvider>,
        batch_size: usize,
        config: OrchestratorConfig,
    ) -> (Arc<WorkerPool>, DetectionOrchestrator) {
        let pool = Arc::new(WorkerPool::new(PoolConfig::default()).unwrap());
        pool.start().unwrap();
        let processor = Arc::new(
            RuleProcessor::new(
                ProcessorConfig::default(),
                Arc::clone(&pool) as Arc<dyn TaskExecutor>,
            )
            .unwrap(),
        );
        let batcher = Arc::new(
            PacketBatcher::new(BatcherConfig {
                initial_batch_size: batch_size,
                min_batch_size: 1,
                max_batch_size: 200,
                batch_timeout: Duration::from_secs(60),
            })
            .unwrap(),
        );
        let orchestrator = DetectionOrchestrator::new(config, provider, batcher, processor);
        (pool, orchestrator)
    }

    #[test]
    fn ingest_requires_start() {
        let (_pool, orch) = build(
            Arc::new(StaticContextProvider::default()),
            10,
            OrchestratorConfig::default(),
        );
        assert!(matches!(orch.ingest(packet()), Err(EngineError::NotRunning)));
    }

    #[test]
    fn wait_for_completion_flushes_partial_batch() {
        let (_pool, orch) = build(
            Arc::new(StaticContextProvider::default()),
            10,
            OrchestratorConfig::default(),
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        orch.processor()
            .register_rule(
                "count",
                move |_: &ArpPacket, _: &DetectionContext| -> RuleOutcome {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                },
                None,
            )
            .unwrap();
        orch.start().unwrap();
        assert_eq!(orch.ingest_all((0..4).map(|_| packet())).unwrap(), 4);
        assert_eq!(orch.batcher().pending_len(), 4);

        assert!(orch.wait_for_completion(Duration::from_secs(5)));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
        assert_eq!(orch.stats().batches_submitted, 1);
        orch.shutdown().unwrap();
    }

    #[test]
    fn context_refresh_respects_interval() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let (_pool, orch) = build(
            Arc::clone(&provider) as Arc<dyn ContextProvider>,
            1,
            OrchestratorConfig {
                context_update_interval: Duration::from_secs(3600),
                ..OrchestratorConfig::default()
            },
        );
        orch.start().unwrap();
        for _ in 0..5 {
            orch.ingest(packet()).unwrap();
        }
        // initial snapshot only
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.current_context().generation, 1);
        orch.shutdown().unwrap();
    }

    #[test]
    fn failed_refresh_keeps_previous_context() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let (_pool, orch) = build(
            Arc::clone(&provider) as Arc<dyn ContextProvider>,
            1,
            OrchestratorConfig::default(),
        );
        let before = orch.current_context();
        provider.fail.store(true, Ordering::SeqCst);
        assert!(orch.refresh_context().is_err());
        assert!(Arc::ptr_eq(&before, &orch.current_context()));

        provider.fail.store(false, Ordering::SeqCst);
        let after = orch.refresh_context().unwrap();
        assert_eq!(after.generation, before.generation + 1);
        assert_eq!(orch.stats().context_refresh_failures, 1);
    }

    #[test]
    fn running_task_keeps_context_taken_at_submission() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let (_pool, orch) = build(
            Arc::clone(&provider) as Arc<dyn ContextProvider>,
            1,
            OrchestratorConfig {
                context_update_interval: Duration::from_secs(3600),
                ..OrchestratorConfig::default()
            },
        );

        // 첫 호출만 게이트에서 두 번 멈춘다 (시작 알림, 해제 대기)
        let gate = Arc::new(Barrier::new(2));
        let gated = Arc::new(AtomicBool::new(true));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let gate = Arc::clone(&gate);
            let gated = Arc::clone(&gated);
            let seen = Arc::clone(&seen);
            orch.processor()
                .register_rule(
                    "observe",
                    move |_: &ArpPacket, ctx: &DetectionContext| -> RuleOutcome {
                        if gated.swap(false, Ordering::SeqCst) {
                            gate.wait();
                            gate.wait();
                        }
                        let mac = ctx.expected_mac(&Ipv4Addr::new(10, 0, 0, 1));
                        seen.lock().push((ctx.generation, mac.map(|m| m.0[5])));
                        Ok(None)
                    },
                    None,
                )
                .unwrap();
        }
        orch.start().unwrap();

        orch.ingest(packet()).unwrap();
        gate.wait();
        let refreshed = orch.refresh_context().unwrap();
        assert_eq!(refreshed.generation, 2);
        gate.wait();
        assert!(orch.wait_for_completion(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![(1, Some(0))]);

        orch.ingest(packet()).unwrap();
        assert!(orch.wait_for_completion(Duration::from_secs(5)));
        assert_eq!(*seen.lock(), vec![(1, Some(0)), (2, Some(1))]);
        orch.shutdown().unwrap();
    }
}
