//! 프레임 엔진 -- 커널 프로그램 로드/관리 및 캡처 큐 소유
//!
//! [`FrameEngine`]은 커널 프로그램의 전체 라이프사이클을 관리합니다.
//! 빌더 패턴([`FrameEngineBuilder`])으로 생성하며, [`Pipeline`] trait을 구현합니다.
//!
//! # 아키텍처
//! ```text
//! capture 모드
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐     ┌─────────────────┐
//! │ tc_ingress / │────▶│ RingBuf     │────▶│ ring reader  │────▶│ CaptureConsumer │
//! │ tc_egress    │     │ (EVENTS)    │     │ (enqueue)    │     │ (daemon)        │
//! └──────────────┘     └─────────────┘     └──────────────┘     └─────────────────┘
//!
//! enforce 모드
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐
//! │ port_filter  │────▶│ AF_PACKET   │────▶│ CaptureHook  │────▶ CaptureConsumer
//! │ (Accept만)   │     │ raw socket  │     │ (on_frame)   │
//! └──────────────┘     └─────────────┘     └──────────────┘
//!
//! 공통: PerCpuArray (STATS) ──poll──▶ StatsSnapshot ──▶ metrics
//! ```
//!
//! # 사용 예시
//! ```ignore
//! let (mut engine, mut consumer) = FrameEngine::builder()
//!     .config(engine_config)
//!     .build()?;
//!
//! engine.start().await?;
//! while let Some(event) = consumer.recv().await {
//!     // event.length(), event.payload()
//! }
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use portwatch_core::error::{PipelineError, PortwatchError};
use portwatch_core::pipeline::{HealthStatus, Pipeline};

use crate::capture::{CaptureConsumer, CaptureProducer, capture_queue};
use crate::config::{EngineConfig, EngineMode};
use crate::diagnostics::{Diagnostics, TracingDiagnostics};
use crate::filter::FilterRule;
use crate::hook::{CaptureHook, EnforcementHook, FrameHook};
use crate::stats::{HookStats, StatsSnapshot};

/// 프레임 엔진
///
/// # Linux 전용
/// `aya::Ebpf` 핸들은 Linux에서만 사용 가능합니다.
/// 다른 플랫폼에서는 start() 시 에러를 반환합니다. 유저스페이스 훅은
/// 플랫폼과 무관하게 사용할 수 있습니다.
pub struct FrameEngine {
    config: EngineConfig,
    mode: EngineMode,
    rule: Arc<FilterRule>,
    producer: CaptureProducer,
    diagnostics: Arc<dyn Diagnostics>,
    stats: Arc<HookStats>,
    running: bool,
    tasks: Vec<JoinHandle<()>>,
    kernel_stats: Option<watch::Receiver<StatsSnapshot>>,
    /// 로드된 커널 프로그램 핸들 (Linux 전용)
    #[cfg(target_os = "linux")]
    bpf: Option<aya::Ebpf>,
}

/// 프레임 엔진 빌더
///
/// `build()`는 `(FrameEngine, CaptureConsumer)` 튜플을 반환하여
/// 유일한 소비자 핸들을 호출자에게 전달합니다.
pub struct FrameEngineBuilder {
    config: Option<EngineConfig>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
    queue_capacity: Option<usize>,
}

impl FrameEngineBuilder {
    fn new() -> Self {
        Self {
            config: None,
            diagnostics: None,
            queue_capacity: None,
        }
    }

    /// 엔진 설정을 지정합니다.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 진단 싱크를 지정합니다 (기본: [`TracingDiagnostics`]).
    pub fn diagnostics(mut self, diagnostics: Arc<dyn Diagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// 캡처 큐 용량을 지정합니다 (기본: `capture.ring_buffer_size`).
    pub fn queue_capacity(mut self, bytes: usize) -> Self {
        self.queue_capacity = Some(bytes);
        self
    }

    /// 엔진과 캡처 소비자를 생성합니다.
    ///
    /// # 에러
    /// - `PipelineError::InitFailed`: 설정 누락 또는 큐 용량 0
    /// - `ConfigError::InvalidValue`: 알 수 없는 모드, 빈 감시 포트 집합
    pub fn build(self) -> Result<(FrameEngine, CaptureConsumer), PortwatchError> {
        let config = self
            .config
            .ok_or_else(|| PipelineError::InitFailed("config is required".to_owned()))?;

        let mode = config.mode()?;
        let rule = Arc::new(config.filter_rule()?);

        let capacity = self
            .queue_capacity
            .unwrap_or(config.capture.ring_buffer_size);
        if capacity == 0 {
            return Err(
                PipelineError::InitFailed("capture queue capacity must be > 0".to_owned()).into(),
            );
        }
        let (producer, consumer) = capture_queue(capacity);

        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(TracingDiagnostics));

        let engine = FrameEngine {
            config,
            mode,
            rule,
            producer,
            diagnostics,
            stats: Arc::new(HookStats::new()),
            running: false,
            tasks: Vec::new(),
            kernel_stats: None,
            #[cfg(target_os = "linux")]
            bpf: None,
        };

        Ok((engine, consumer))
    }
}

impl FrameEngine {
    /// 빌더를 반환합니다.
    pub fn builder() -> FrameEngineBuilder {
        FrameEngineBuilder::new()
    }

    /// 현재 설정
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 동작 모드
    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// 감시 포트 집합
    pub fn filter_rule(&self) -> &Arc<FilterRule> {
        &self.rule
    }

    /// 실행 중인지 확인
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// 관찰 훅을 생성합니다. 훅은 같은 큐와 카운터를 공유합니다.
    pub fn capture_hook(&self) -> CaptureHook {
        CaptureHook::new(
            Arc::clone(&self.rule),
            self.producer.clone(),
            Arc::clone(&self.diagnostics),
            Arc::clone(&self.stats),
            self.config.capture.max_capture,
        )
    }

    /// 집행 훅을 생성합니다.
    pub fn enforcement_hook(&self) -> EnforcementHook {
        EnforcementHook::new(
            Arc::clone(&self.rule),
            Arc::clone(&self.diagnostics),
            Arc::clone(&self.stats),
        )
    }

    /// 현재 모드에 맞는 훅
    pub fn hook(&self) -> Arc<dyn FrameHook> {
        match self.mode {
            EngineMode::Capture => Arc::new(self.capture_hook()),
            EngineMode::Enforce => Arc::new(self.enforcement_hook()),
        }
    }

    /// 유저스페이스 훅 카운터
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 마지막으로 폴링한 커널 카운터 (실행 중일 때만)
    pub fn kernel_stats(&self) -> Option<StatsSnapshot> {
        self.kernel_stats.as_ref().map(|rx| *rx.borrow())
    }

    /// 커널 오브젝트를 로드하고 모드에 맞게 연결합니다.
    #[cfg(target_os = "linux")]
    fn load_and_attach(&mut self) -> Result<(), PortwatchError> {
        let attached = crate::loader::attach(crate::loader::AttachRequest {
            config: &self.config,
            mode: self.mode,
            rule: &self.rule,
            hook: self.capture_hook(),
            producer: self.producer.clone(),
            diagnostics: Arc::clone(&self.diagnostics),
        })?;

        self.bpf = Some(attached.bpf);
        self.tasks = attached.tasks;
        self.kernel_stats = Some(attached.kernel_stats);
        Ok(())
    }

    /// 커널 오브젝트를 로드합니다 (비-Linux 스텁).
    #[cfg(not(target_os = "linux"))]
    fn load_and_attach(&mut self) -> Result<(), PortwatchError> {
        Err(portwatch_core::error::AttachError::Unsupported(
            "eBPF is only supported on Linux".to_owned(),
        )
        .into())
    }

    /// 백그라운드 태스크를 취소하고 커널 프로그램을 해제합니다.
    fn detach(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.kernel_stats = None;
        #[cfg(target_os = "linux")]
        {
            // Ebpf drop 시 TC 링크와 소켓 필터가 해제됩니다.
            self.bpf = None;
        }
    }
}

impl Pipeline for FrameEngine {
    /// 커널 프로그램을 로드하고 엔진을 시작합니다.
    ///
    /// 1. 커널 오브젝트 로드
    /// 2. WATCHED_PORTS 맵 동기화
    /// 3. 모드별 attach + 리더 태스크 스폰
    /// 4. 통계 폴링 태스크 스폰
    async fn start(&mut self) -> Result<(), PortwatchError> {
        if self.running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            interface = self.config.base.interface.as_str(),
            mode = %self.mode,
            ports = ?self.rule.ports().collect::<Vec<_>>(),
            "starting frame engine"
        );

        self.load_and_attach()?;
        self.running = true;
        Ok(())
    }

    /// 엔진을 정지하고 리소스를 정리합니다.
    async fn stop(&mut self) -> Result<(), PortwatchError> {
        if !self.running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping frame engine");

        self.detach();
        self.running = false;
        Ok(())
    }

    /// 엔진의 현재 상태를 확인합니다.
    async fn health_check(&self) -> HealthStatus {
        if !self.running {
            return HealthStatus::Unhealthy("not running".to_owned());
        }
        if self.producer.is_closed() {
            return HealthStatus::Degraded("capture consumer closed".to_owned());
        }
        if self.tasks.iter().any(JoinHandle::is_finished) {
            return HealthStatus::Degraded("background task exited".to_owned());
        }
        HealthStatus::Healthy
    }
}
