//! 스케일링 결정 함수
//!
//! 스케일러 스레드의 제어 루프에서 결정 로직만 분리한 순수 함수입니다.
//! 실제 스레드나 타이머 없이 `(부하, 쿨다운 경과)`만으로 단위 테스트할 수 있습니다.

use std::time::Duration;

use serde::Serialize;

/// 스케일러가 한 번 샘플링한 부하
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    /// 태스크를 실행 중인 워커 수
    pub active: usize,
    /// 전체 워커 수
    pub total: usize,
    /// 마지막 스케일링 동작 이후 경과 시간 (`None`이면 동작 이력 없음)
    pub since_last_action: Option<Duration>,
}

impl LoadSample {
    /// `active / total` (워커가 없으면 0)
    pub fn load(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.active as f64 / self.total as f64
        }
    }
}

/// 스케일링 결정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalingDecision {
    /// 워커 `n`개 추가
    ScaleUp(usize),
    /// 유휴 워커 하나 제거
    ScaleDown,
    /// 유지
    Hold,
}

/// 스케일링 정책
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingPolicy {
    /// 최소 워커 수
    pub min_workers: usize,
    /// 최대 워커 수
    pub max_workers: usize,
    /// 이 부하 이상이면 스케일 업
    pub scale_up_threshold: f64,
    /// 이 부하 이하이면 스케일 다운
    pub scale_down_threshold: f64,
    /// 두 스케일링 동작 사이 최소 간격
    pub cooldown: Duration,
    /// 한 번에 추가할 최대 워커 수
    pub max_step: usize,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.3,
            cooldown: Duration::from_secs(10),
            max_step: 2,
        }
    }
}

impl ScalingPolicy {
    /// 샘플에 대한 스케일링 결정을 내립니다.
    pub fn decide(&self, sample: &LoadSample) -> ScalingDecision {
        if let Some(elapsed) = sample.since_last_action {
            if elapsed < self.cooldown {
                return ScalingDecision::Hold;
            }
        }

        if sample.total < self.min_workers {
            return ScalingDecision::ScaleUp(self.min_workers - sample.total);
        }

        let load = sample.load();
        if load >= self.scale_up_threshold && sample.total < self.max_workers {
            let room = self.max_workers - sample.total;
            return ScalingDecision::ScaleUp(self.max_step.min(room));
        }
        if load <= self.scale_down_threshold && sample.total > self.min_workers {
            return ScalingDecision::ScaleDown;
        }
        ScalingDecision::Hold
    }
}
