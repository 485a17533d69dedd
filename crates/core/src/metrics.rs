//! 메트릭 상수
//!
//! 모든 메트릭의 이름을 중앙에서 정의합니다.
//! 엔진은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다. 레코더(exporter)는 임베딩하는
//! 프로세스가 설치합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `arpwarden_`
//! - 모듈명: `pool_`, `scheduler_`, `batcher_`, `governor_`, `rule_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use arpwarden_core::metrics as m;
//! use metrics::counter;
//!
//! counter!(m::POOL_TASKS_SUBMITTED_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 룰 이름 레이블 키
pub const LABEL_RULE: &str = "rule";

/// 우선순위 티어 레이블 키 (high, normal, low)
pub const LABEL_TIER: &str = "tier";

/// 결과 레이블 키 (completed, failed)
pub const LABEL_RESULT: &str = "result";

// ─── Worker Pool 메트릭 ─────────────────────────────────────────────

/// Pool: 제출된 태스크 수 (counter)
pub const POOL_TASKS_SUBMITTED_TOTAL: &str = "arpwarden_pool_tasks_submitted_total";

/// Pool: 종료된 태스크 수 (counter, label: result)
pub const POOL_TASKS_FINISHED_TOTAL: &str = "arpwarden_pool_tasks_finished_total";

/// Pool: 태스크 실행 시간 (histogram, 초)
pub const POOL_TASK_DURATION_SECONDS: &str = "arpwarden_pool_task_duration_seconds";

/// Pool: 현재 워커 수 (gauge)
pub const POOL_WORKERS: &str = "arpwarden_pool_workers";

/// Pool: 티어별 큐 깊이 (gauge, label: tier)
pub const POOL_QUEUE_DEPTH: &str = "arpwarden_pool_queue_depth";

/// Pool: 스케일 업 횟수 (counter)
pub const POOL_SCALE_UP_TOTAL: &str = "arpwarden_pool_scale_up_total";

/// Pool: 스케일 다운 횟수 (counter)
pub const POOL_SCALE_DOWN_TOTAL: &str = "arpwarden_pool_scale_down_total";

// ─── Admission-Gated Scheduler 메트릭 ───────────────────────────────

/// Scheduler: 동시 실행 중인 태스크 수 (gauge)
pub const SCHEDULER_RUNNING: &str = "arpwarden_scheduler_running";

/// Scheduler: 종료된 태스크 수 (counter, label: result)
pub const SCHEDULER_TASKS_FINISHED_TOTAL: &str = "arpwarden_scheduler_tasks_finished_total";

// ─── Packet Batcher / Memory Governor 메트릭 ────────────────────────

/// Batcher: 봉인된 배치 수 (counter)
pub const BATCHER_BATCHES_SEALED_TOTAL: &str = "arpwarden_batcher_batches_sealed_total";

/// Batcher: 현재 적응형 배치 크기 (gauge)
pub const BATCHER_CURRENT_BATCH_SIZE: &str = "arpwarden_batcher_current_batch_size";

/// Governor: 샘플링된 프로세스 메모리 사용량 (gauge, 바이트)
pub const GOVERNOR_MEMORY_USAGE_BYTES: &str = "arpwarden_governor_memory_usage_bytes";

/// Governor: 회수 훅 실행 횟수 (counter)
pub const GOVERNOR_RECLAIM_TOTAL: &str = "arpwarden_governor_reclaim_total";

// ─── Rule Processor 메트릭 ──────────────────────────────────────────

/// Rule: 룰 호출 수 (counter, label: rule)
pub const RULE_INVOCATIONS_TOTAL: &str = "arpwarden_rule_invocations_total";

/// Rule: 룰 매칭 수 (counter, label: rule)
pub const RULE_MATCHES_TOTAL: &str = "arpwarden_rule_matches_total";

/// Rule: 룰 평가 에러 수 (counter, label: rule)
pub const RULE_ERRORS_TOTAL: &str = "arpwarden_rule_errors_total";

/// Rule: 알림 콜백 에러 수 (counter)
pub const RULE_CALLBACK_ERRORS_TOTAL: &str = "arpwarden_rule_callback_errors_total";
