//! 패킷 배처: 캡처된 패킷을 적응형 크기의 봉인된 배치로 묶음
//!
//! 추가할 때마다 배치 큐와 같은 규칙(크기 또는 타임아웃 중 먼저 오는 쪽)으로
//! 배치를 봉인합니다. 배치 크기 상한 `current_batch_size`는 메모리 거버너가 조정합니다.
//!
//! 봉인된 [`Batch`]는 변경할 수 없고 크기는 항상 `[1, current_batch_size]` 범위입니다.
//! 거버너가 크기를 줄인 직후 버퍼가 새 상한보다 길면, 상한만큼씩 나누어 봉인합니다.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use arpwarden_core::metrics as m;
use arpwarden_core::types::ArpPacket;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::BatcherConfig;
use crate::error::EngineError;

/// 봉인된 패킷 배치
#[derive(Debug, Clone)]
pub struct Batch {
    id: u64,
    packets: Vec<ArpPacket>,
    sealed_at: Instant,
}

impl Batch {
    /// 패킷 목록으로 배치를 만듭니다 (테스트나 리플레이 도구용).
    pub fn new(id: u64, packets: Vec<ArpPacket>) -> Self {
        Self {
            id,
            packets,
            sealed_at: Instant::now(),
        }
    }

    /// 배치 일련번호
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 배치에 담긴 패킷
    pub fn packets(&self) -> &[ArpPacket] {
        &self.packets
    }

    /// 패킷 수
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// 비어 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// 봉인 시각
    pub fn sealed_at(&self) -> Instant {
        self.sealed_at
    }
}

struct Buffer {
    packets: Vec<ArpPacket>,
    first_at: Option<Instant>,
}

/// 패킷 배처
pub struct PacketBatcher {
    config: BatcherConfig,
    buffer: Mutex<Buffer>,
    current_batch_size: AtomicUsize,
    next_batch_id: AtomicU64,
    packets_added: AtomicU64,
}

impl PacketBatcher {
    /// 새 배처를 생성합니다.
    pub fn new(config: BatcherConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let initial = config
            .initial_batch_size
            .clamp(config.min_batch_size, config.max_batch_size);
        Ok(Self {
            buffer: Mutex::new(Buffer {
                packets: Vec::with_capacity(initial),
                first_at: None,
            }),
            current_batch_size: AtomicUsize::new(initial),
            next_batch_id: AtomicU64::new(0),
            packets_added: AtomicU64::new(0),
            config,
        })
    }

    /// 패킷을 추가합니다. 크기나 시간 조건을 만족하면 봉인된 배치를 반환합니다.
    pub fn add_packet(&self, packet: ArpPacket) -> Option<Batch> {
        self.packets_added.fetch_add(1, Ordering::Relaxed);
        let limit = self.current_batch_size();
        let mut buffer = self.buffer.lock();
        let now = Instant::now();
        let first_at = *buffer.first_at.get_or_insert(now);
        buffer.packets.push(packet);

        let full = buffer.packets.len() >= limit;
        let expired = now.duration_since(first_at) >= self.config.batch_timeout;
        if full || expired {
            self.seal(&mut buffer, limit)
        } else {
            None
        }
    }

    /// 타임아웃이 지난 버퍼를 봉인합니다 (주기적 점검용).
    pub fn poll_timeout(&self) -> Vec<Batch> {
        let limit = self.current_batch_size();
        let mut buffer = self.buffer.lock();
        match buffer.first_at {
            Some(at) if at.elapsed() >= self.config.batch_timeout => {
                self.seal_all(&mut buffer, limit)
            }
            _ => Vec::new(),
        }
    }

    /// 버퍼에 남은 패킷을 모두 봉인합니다.
    pub fn flush(&self) -> Vec<Batch> {
        let limit = self.current_batch_size();
        let mut buffer = self.buffer.lock();
        self.seal_all(&mut buffer, limit)
    }

    /// 현재 배치 크기 상한
    pub fn current_batch_size(&self) -> usize {
        self.current_batch_size.load(Ordering::Acquire)
    }

    /// 배치 크기 상한을 지정합니다 (`[min_batch_size, max_batch_size]`로 보정).
    pub fn set_current_batch_size(&self, size: usize) -> usize {
        let size = size.clamp(self.config.min_batch_size, self.config.max_batch_size);
        self.current_batch_size.store(size, Ordering::Release);
        metrics::gauge!(m::BATCHER_CURRENT_BATCH_SIZE).set(size as f64);
        size
    }

    /// 버퍼에서 봉인을 기다리는 패킷 수
    pub fn pending_len(&self) -> usize {
        self.buffer.lock().packets.len()
    }

    /// 지금까지 추가된 패킷 수
    pub fn packets_added(&self) -> u64 {
        self.packets_added.load(Ordering::Relaxed)
    }

    /// 지금까지 봉인된 배치 수
    pub fn batches_sealed(&self) -> u64 {
        self.next_batch_id.load(Ordering::Relaxed)
    }

    /// 배처 설정
    pub fn config(&self) -> &BatcherConfig {
        &self.config
    }

    /// 버퍼의 여유 용량을 반환합니다 (메모리 회수 훅).
    pub fn shrink_buffer(&self) {
        let limit = self.current_batch_size();
        let mut buffer = self.buffer.lock();
        let keep = buffer.packets.len().max(limit);
        buffer.packets.shrink_to(keep);
    }

    fn seal(&self, buffer: &mut Buffer, limit: usize) -> Option<Batch> {
        if buffer.packets.is_empty() {
            buffer.first_at = None;
            return None;
        }
        let take = buffer.packets.len().min(limit);
        let rest = buffer.packets.split_off(take);
        let packets = std::mem::replace(&mut buffer.packets, rest);
        buffer.first_at = if buffer.packets.is_empty() {
            None
        } else {
            Some(Instant::now())
        };

        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(m::BATCHER_BATCHES_SEALED_TOTAL).increment(1);
        debug!(batch = id, size = packets.len(), "batch sealed");
        Some(Batch {
            id,
            packets,
            sealed_at: Instant::now(),
        })
    }

    fn seal_all(&self, buffer: &mut Buffer, limit: usize) -> Vec<Batch> {
        std::iter::from_fn(|| self.seal(buffer, limit)).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::thread;
    use std::time::Duration;

    use arpwarden_core::types::{ArpOperation, MacAddr};

    use super::*;

    fn packet(n: u8) -> ArpPacket {
        ArpPacket::new(
            MacAddr([0, 0, 0, 0, 0, n]),
            Ipv4Addr::new(10, 0, 0, n),
            MacAddr::ZERO,
            Ipv4Addr::new(10, 0, 0, 1),
            ArpOperation::Request,
        )
    }

    fn batcher(size: usize, timeout: Duration) -> PacketBatcher {
        PacketBatcher::new(BatcherConfig {
            initial_batch_size: size,
            min_batch_size: 1,
            max_batch_size: 200,
            batch_timeout: timeout,
        })
        .unwrap()
    }

    #[test]
    fn seals_when_batch_size_reached() {
        let b = batcher(3, Duration::from_secs(60));
        assert!(b.add_packet(packet(1)).is_none());
        assert!(b.add_packet(packet(2)).is_none());
        let batch = b.add_packet(packet(3)).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.packets()[0].src_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(b.pending_len(), 0);
    }

    #[test]
    fn poll_timeout_seals_stale_partial_batch() {
        let b = batcher(100, Duration::from_millis(20));
        b.add_packet(packet(1));
        assert!(b.poll_timeout().is_empty());
        thread::sleep(Duration::from_millis(30));
        let batches = b.poll_timeout();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
    }

    #[test]
    fn flush_respects_shrunk_limit() {
        let b = batcher(100, Duration::from_secs(60));
        for i in 0..25 {
            b.add_packet(packet(i));
        }
        b.set_current_batch_size(10);
        let sizes: Vec<_> = b.flush().iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert!(b.flush().is_empty());
    }

    #[test]
    fn batch_ids_are_sequential() {
        let b = batcher(1, Duration::from_secs(60));
        let first = b.add_packet(packet(1)).unwrap();
        let second = b.add_packet(packet(2)).unwrap();
        assert_eq!(second.id(), first.id() + 1);
        assert_eq!(b.batches_sealed(), 2);
    }

    #[test]
    fn batch_size_is_clamped() {
        let b = PacketBatcher::new(BatcherConfig::default()).unwrap();
        assert_eq!(b.set_current_batch_size(1), 10);
        assert_eq!(b.set_current_batch_size(10_000), 200);
    }
}
