//! portwatch 공통 크레이트
//!
//! 엔진과 데몬이 공유하는 에러 타입, `portwatch.toml` 설정, [`Pipeline`] trait,
//! 메트릭 이름을 정의합니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;

// 에러
pub use error::{AttachError, CaptureError, ConfigError, PipelineError, PortwatchError};

// 설정
pub use config::PortwatchConfig;

// 파이프라인 trait
pub use pipeline::{HealthStatus, Pipeline};
