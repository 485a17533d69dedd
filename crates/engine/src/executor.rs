//! 실행기 trait: 탄력적 워커 풀과 게이트 스케줄러의 공통 이음새
//!
//! 룰 프로세서와 배치 큐는 구체 타입 대신 [`TaskExecutor`]에 태스크를 제출합니다.
//! 배포 환경은 `engine.executor` 설정으로 두 스케일링 방식 중 하나를 고릅니다.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::EngineError;
use crate::task::{TaskHandle, TaskId, WorkerTask};

/// 태스크 실행기
pub trait TaskExecutor: Send + Sync {
    /// 태스크를 제출합니다. 블록하지 않습니다.
    ///
    /// `task_id`가 `None`이면 새 ID가 생성됩니다.
    fn submit_task(
        &self,
        task: Box<dyn WorkerTask>,
        priority: i32,
        task_id: Option<TaskId>,
    ) -> Result<TaskHandle, EngineError>;

    /// 제출되었지만 아직 끝나지 않은 태스크 수 (대기 + 실행 중)
    fn outstanding(&self) -> usize;

    /// 제출을 받는 중인지 확인합니다.
    fn is_running(&self) -> bool;

    /// 실행기 종류
    fn kind(&self) -> ExecutorKind;
}

/// 실행기 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    /// 부하에 따라 워커 수가 변하는 적응형 워커 풀
    Elastic,
    /// 동시 실행 수 상한을 강제하는 게이트 스케줄러
    Gated,
}

impl FromStr for ExecutorKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elastic" => Ok(Self::Elastic),
            "gated" => Ok(Self::Gated),
            other => Err(EngineError::Config {
                field: "executor".to_owned(),
                reason: format!("unknown executor '{other}', expected elastic or gated"),
            }),
        }
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elastic => f.write_str("elastic"),
            Self::Gated => f.write_str("gated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executor_kind_parses() {
        assert_eq!("elastic".parse::<ExecutorKind>().unwrap(), ExecutorKind::Elastic);
        assert_eq!("gated".parse::<ExecutorKind>().unwrap(), ExecutorKind::Gated);
        assert!("pooled".parse::<ExecutorKind>().is_err());
    }
}
