//! # arpwarden-engine
//!
//! 캡처된 ARP 패킷 스트림을 적응형 크기의 배치로 묶고, 각 배치를 여러 탐지 룰로
//! 팬아웃하여 우선순위 순서와 메모리 역압 아래에서 실행하는 동시 룰 평가 엔진입니다.
//! 제출된 작업은 유실되거나 중복 실행되지 않습니다.
//!
//! # 모듈 구성
//!
//! - [`task`]: 태스크 추상화 (우선순위, 생명주기, 완료 신호)
//! - [`queue`]: 우선순위 큐와 미완료 작업 카운터
//! - [`tier`]: high/normal/low 세 티어 큐
//! - [`batch_queue`]: 크기/시간 기준 배치 큐
//! - [`pool`]: 적응형 워커 풀과 스케일러 스레드
//! - [`scaling`]: 스케일링 결정 순수 함수
//! - [`scheduler`]: 동시 실행 상한을 강제하는 게이트 스케줄러
//! - [`executor`]: 풀과 스케줄러의 공통 trait
//! - [`batcher`]: 패킷 배처
//! - [`governor`]: 메모리 거버너
//! - [`processor`]: 룰 프로세서 (팬아웃, 통계, 알림 콜백)
//! - [`orchestrator`]: 유입 -> 배칭 -> 룰 프로세서 연결, 컨텍스트 스냅샷 관리
//! - [`engine`]: 전체 구성 진입점
//! - [`config`]: core 설정에서 파생되는 컴포넌트별 설정
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! packets -> PacketBatcher -> DetectionOrchestrator -> RuleProcessor -> TaskExecutor
//!                 ^                  |                     |          (WorkerPool | AdmissionScheduler)
//!           MemoryGovernor     ArcSwap<Context>       stats / alert sinks
//! ```

pub mod batch_queue;
pub mod batcher;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod governor;
pub mod orchestrator;
pub mod pool;
pub mod processor;
pub mod queue;
pub mod scaling;
pub mod scheduler;
pub mod task;
pub mod tier;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{DetectionEngine, DetectionEngineBuilder, EngineStats, ExecutorStats};

// 에러
pub use error::EngineError;

// 설정
pub use config::{
    BatcherConfig, GovernorConfig, OrchestratorConfig, PoolConfig, PoolConfigBuilder,
    ProcessorConfig, SchedulerConfig,
};

// 태스크와 실행기
pub use executor::{ExecutorKind, TaskExecutor};
pub use task::{FnTask, TaskHandle, TaskId, TaskOutput, TaskSnapshot, TaskState, WorkerTask};

// 큐
pub use batch_queue::{
    BatchDispatch, BatchHandler, BatchProcessingTask, BatchQueue, BatchQueueConfig,
};
pub use queue::{PriorityQueue, WorkCounter};
pub use tier::{QueueDepths, Tier, TieredQueues};

// 풀과 스케줄러
pub use pool::{PoolStats, WorkerPool};
pub use scaling::{LoadSample, ScalingDecision, ScalingPolicy};
pub use scheduler::{AdmissionScheduler, SchedulerStats};

// 배칭과 메모리
pub use batcher::{Batch, PacketBatcher};
pub use governor::{
    BatchAdjustment, GovernorReport, MemoryGovernor, MemorySampler, ProcessMemorySampler,
};

// 룰 처리
pub use orchestrator::{DetectionOrchestrator, OrchestratorStats};
pub use processor::{RuleCheckTask, RuleProcessor, RuleStats};
