//! 설정 관리 -- portwatch.toml 파싱 및 런타임 설정
//!
//! [`PortwatchConfig`]는 데몬과 엔진 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`PORTWATCH_ENGINE_INTERFACE=eth0` 형식)
//! 3. 설정 파일 (`portwatch.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), portwatch_core::error::PortwatchError> {
//! use portwatch_core::config::PortwatchConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = PortwatchConfig::load("portwatch.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = PortwatchConfig::parse("[filter]\nports = [8000, 8443]")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, PortwatchError};

/// 캡처 페이로드 상한 (바이트)
pub const MAX_CAPTURE_LIMIT: usize = 65535;

/// 감시 포트 맵 크기 상한 (유효한 포트 수)
pub const WATCH_LIST_LIMIT: usize = 65535;

/// 캡처 링 버퍼 크기 상한 (1 GiB)
pub const RING_BUFFER_SIZE_LIMIT: usize = 1 << 30;

/// portwatch 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortwatchConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 엔진(커널 프로그램 attach) 설정
    #[serde(default)]
    pub engine: EngineSection,
    /// 포트 필터 설정
    #[serde(default)]
    pub filter: FilterConfig,
    /// 캡처 큐 설정
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl PortwatchConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PortwatchError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, PortwatchError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PortwatchError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                PortwatchError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, PortwatchError> {
        toml::from_str(toml_str).map_err(|e| {
            PortwatchError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `PORTWATCH_{SECTION}_{FIELD}`
    /// 예: `PORTWATCH_FILTER_PORTS=8000,8443`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "PORTWATCH_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "PORTWATCH_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "PORTWATCH_GENERAL_PID_FILE");

        // Engine
        override_bool(&mut self.engine.enabled, "PORTWATCH_ENGINE_ENABLED");
        override_string(&mut self.engine.mode, "PORTWATCH_ENGINE_MODE");
        override_string(&mut self.engine.interface, "PORTWATCH_ENGINE_INTERFACE");
        override_string(
            &mut self.engine.program_path,
            "PORTWATCH_ENGINE_PROGRAM_PATH",
        );
        override_u64(
            &mut self.engine.stats_interval_secs,
            "PORTWATCH_ENGINE_STATS_INTERVAL_SECS",
        );
        override_usize(
            &mut self.engine.watch_list_max_entries,
            "PORTWATCH_ENGINE_WATCH_LIST_MAX_ENTRIES",
        );

        // Filter
        override_ports(&mut self.filter.ports, "PORTWATCH_FILTER_PORTS");
        override_string(&mut self.filter.rules_path, "PORTWATCH_FILTER_RULES_PATH");

        // Capture
        override_usize(
            &mut self.capture.ring_buffer_size,
            "PORTWATCH_CAPTURE_RING_BUFFER_SIZE",
        );
        override_usize(
            &mut self.capture.max_capture,
            "PORTWATCH_CAPTURE_MAX_CAPTURE",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "PORTWATCH_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "PORTWATCH_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "PORTWATCH_METRICS_PORT");
        override_string(&mut self.metrics.endpoint, "PORTWATCH_METRICS_ENDPOINT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), PortwatchError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.engine.enabled {
            let valid_modes = ["capture", "enforce"];
            if !valid_modes.contains(&self.engine.mode.as_str()) {
                return Err(invalid(
                    "engine.mode",
                    format!("must be one of: {}", valid_modes.join(", ")),
                ));
            }

            if self.engine.interface.is_empty() {
                return Err(invalid(
                    "engine.interface",
                    "interface must not be empty when engine is enabled".to_owned(),
                ));
            }

            if self.engine.program_path.is_empty() {
                return Err(invalid(
                    "engine.program_path",
                    "program path must not be empty when engine is enabled".to_owned(),
                ));
            }
        }

        if self.engine.watch_list_max_entries == 0
            || self.engine.watch_list_max_entries > WATCH_LIST_LIMIT
        {
            return Err(invalid(
                "engine.watch_list_max_entries",
                format!("must be between 1 and {WATCH_LIST_LIMIT}"),
            ));
        }

        if self.engine.stats_interval_secs == 0 {
            return Err(invalid(
                "engine.stats_interval_secs",
                "must be greater than 0".to_owned(),
            ));
        }

        if self.filter.ports.is_empty() {
            return Err(invalid(
                "filter.ports",
                "at least one port must be watched".to_owned(),
            ));
        }

        if self.filter.ports.contains(&0) {
            return Err(invalid("filter.ports", "port 0 is not valid".to_owned()));
        }

        if self.filter.ports.len() > self.engine.watch_list_max_entries {
            return Err(invalid(
                "filter.ports",
                format!(
                    "{} ports exceed engine.watch_list_max_entries ({})",
                    self.filter.ports.len(),
                    self.engine.watch_list_max_entries
                ),
            ));
        }

        if self.capture.ring_buffer_size == 0
            || self.capture.ring_buffer_size > RING_BUFFER_SIZE_LIMIT
        {
            return Err(invalid(
                "capture.ring_buffer_size",
                format!("must be between 1 and {RING_BUFFER_SIZE_LIMIT}"),
            ));
        }

        if self.capture.max_capture == 0 || self.capture.max_capture > MAX_CAPTURE_LIMIT {
            return Err(invalid(
                "capture.max_capture",
                format!("must be between 1 and {MAX_CAPTURE_LIMIT}"),
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> PortwatchError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: "/var/run/portwatch/portwatch.pid".to_owned(),
        }
    }
}

/// 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 활성화 여부
    pub enabled: bool,
    /// 동작 모드 (capture: TC 관찰, enforce: 소켓 필터 집행)
    pub mode: String,
    /// 대상 네트워크 인터페이스
    pub interface: String,
    /// 커널 오브젝트 경로
    pub program_path: String,
    /// 커널 STATS 폴링 주기 (초)
    pub stats_interval_secs: u64,
    /// WATCHED_PORTS 맵 최대 엔트리 수
    pub watch_list_max_entries: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: "capture".to_owned(),
            interface: "eth0".to_owned(),
            program_path: "target/bpfel-unknown-none/release/portwatch-ebpf".to_owned(),
            stats_interval_secs: 1,
            watch_list_max_entries: 1024,
        }
    }
}

/// 포트 필터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// 감시 포트
    pub ports: Vec<u16>,
    /// 추가 규칙 파일 경로 (TOML, 빈 문자열이면 사용 안 함)
    pub rules_path: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ports: vec![8000],
            rules_path: String::new(),
        }
    }
}

/// 캡처 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// 큐 용량 (바이트)
    pub ring_buffer_size: usize,
    /// 이벤트당 최대 캡처 바이트
    pub max_capture: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            ring_buffer_size: 256 * 1024, // 256KB
            max_capture: MAX_CAPTURE_LIMIT,
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

/// 쉼표 구분 포트 목록. 하나라도 파싱에 실패하면 전체를 무시합니다.
fn override_ports(target: &mut Vec<u16>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        let parsed: Result<Vec<u16>, _> = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse::<u16>)
            .collect();
        match parsed {
            Ok(ports) => *target = ports,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse port list from env var, ignoring"
            ),
        }
    }
}
