//! 파이프라인 trait -- 모듈 생명주기 정의

use std::future::Future;

use serde::Serialize;

use crate::error::PortwatchError;

/// 모듈 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 일부 기능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 상태인지 확인
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// 시작/정지/상태 확인 생명주기를 가진 파이프라인
///
/// 구현체는 `async fn`으로 작성할 수 있습니다.
pub trait Pipeline: Send {
    /// 파이프라인을 시작합니다. 이미 실행 중이면 에러입니다.
    fn start(&mut self) -> impl Future<Output = Result<(), PortwatchError>> + Send;

    /// 파이프라인을 정지하고 백그라운드 작업을 정리합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), PortwatchError>> + Send;

    /// 현재 상태를 보고합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
