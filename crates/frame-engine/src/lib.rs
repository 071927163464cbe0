//! portwatch 프레임 엔진
//!
//! 이더넷 프레임을 분류하고 감시 포트 목록과 대조해 트래픽을 허용/차단하거나
//! 일치한 프레임을 캡처 큐로 복사합니다.
//!
//! # 모듈 구성
//! - [`filter`]: 감시 포트 집합 (FilterRule)
//! - [`config`]: 동작 모드, 포트 룰 파일, core 설정 확장
//! - [`capture`]: 바이트 예산 기반 캡처 큐 (reserve / commit / discard)
//! - [`hook`]: 집행 훅과 관찰 훅
//! - [`diagnostics`]: 진단 싱크 (tracing + metrics)
//! - [`stats`]: 훅 카운터와 커널 PerCpuArray 합산
//! - [`engine`]: FrameEngine -- 커널 프로그램 로드/관리, Pipeline trait 구현
//!
//! # 공유 타입
//! 커널/유저스페이스 공유 파서와 레이아웃은 [`portwatch_ebpf_common`] 크레이트에
//! 정의되어 있습니다.

pub mod capture;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod filter;
pub mod hook;
pub mod stats;

#[cfg(target_os = "linux")]
mod loader;

// --- 주요 타입 re-export ---

// 엔진
pub use engine::{FrameEngine, FrameEngineBuilder};

// 설정
pub use config::{EngineConfig, EngineMode, PortRule};
pub use filter::FilterRule;

// 캡처
pub use capture::{
    CaptureConsumer, CaptureEvent, CaptureProducer, CaptureSlot, Frame, capture_queue,
};

// 훅
pub use hook::{CaptureHook, CaptureOutcome, EnforcementHook, FrameHook, RecordForwarder};

// 진단 / 통계
pub use diagnostics::{DiagnosticEvent, Diagnostics, NoopDiagnostics, TracingDiagnostics};
pub use stats::{HookStats, StatsSnapshot};

// 공유 타입 (커널/유저스페이스 공통)
pub use portwatch_ebpf_common;
