//! 우선순위 큐 / 티어 큐 벤치마크
//!
//! 단일 스레드 put/get 처리량과 다중 생산자 경합 상황을 측정합니다.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use arpwarden_engine::{PriorityQueue, TieredQueues};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

fn bench_put_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_put_get");
    for size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let queue = PriorityQueue::unbounded();
                for i in 0..size {
                    queue.put(i, (i % 11) as i32).unwrap();
                }
                while let Some(item) = queue.try_get() {
                    black_box(item);
                    queue.task_done();
                }
            });
        });
    }
    group.finish();
}

fn bench_tiered_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiered_dequeue_highest_available");
    let size = 3_000usize;
    group.throughput(Throughput::Elements(size as u64));
    group.bench_function("mixed_priorities", |b| {
        b.iter(|| {
            let queues = TieredQueues::new(size);
            for i in 0..size {
                queues.put(i, (i % 11) as i32).unwrap();
            }
            while let Some((tier, item)) = queues.dequeue_highest_available(Duration::ZERO) {
                black_box(item);
                queues.task_done(tier);
            }
        });
    });
    group.finish();
}

fn bench_contended_producers(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority_queue_contended");
    let per_producer = 1_000usize;
    for producers in [2usize, 4, 8] {
        group.throughput(Throughput::Elements((producers * per_producer) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(producers),
            &producers,
            |b, &producers| {
                b.iter(|| {
                    let queue = Arc::new(PriorityQueue::unbounded());
                    let handles: Vec<_> = (0..producers)
                        .map(|p| {
                            let queue = Arc::clone(&queue);
                            thread::spawn(move || {
                                for i in 0..per_producer {
                                    queue.put(p * per_producer + i, (i % 11) as i32).unwrap();
                                }
                            })
                        })
                        .collect();
                    let mut received = 0;
                    while received < producers * per_producer {
                        if let Some(item) = queue.get(Duration::from_millis(10)) {
                            black_box(item);
                            queue.task_done();
                            received += 1;
                        }
                    }
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_put_get,
    bench_tiered_dequeue,
    bench_contended_producers
);
criterion_main!(benches);
