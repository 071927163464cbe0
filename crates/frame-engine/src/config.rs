//! 엔진 설정 -- core 설정 확장 및 포트 규칙 파일
//!
//! [`EngineConfig`]는 core의 `[engine]`, `[filter]`, `[capture]` 섹션을 묶고,
//! 규칙 파일에서 읽은 [`PortRule`]을 추가로 관리합니다.
//! 최종 감시 포트 집합은 `filter.ports`와 모든 규칙 포트의 합집합입니다.
//!
//! # 규칙 파일 예시 (TOML)
//! ```toml
//! [[rules]]
//! id = "http-alt"
//! ports = [8000, 8080]
//! description = "내부 HTTP 대체 포트"
//!
//! [[rules]]
//! id = "dns"
//! ports = [53]
//! ```

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use portwatch_core::config::{CaptureConfig, EngineSection, FilterConfig, PortwatchConfig};
use portwatch_core::error::{AttachError, ConfigError, PortwatchError};
use portwatch_ebpf_common::CaptureRecord;

use crate::filter::FilterRule;

/// 커널 링 버퍼 레코드 헤더 크기 (`BPF_RINGBUF_HDR_SZ`)
const RINGBUF_RECORD_HEADER_LEN: usize = 8;

/// 훅 동작 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// TC ingress/egress 관찰, 트래픽 불간섭
    Capture,
    /// 소켓 필터 허용 목록 집행
    Enforce,
}

impl FromStr for EngineMode {
    type Err = PortwatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capture" => Ok(Self::Capture),
            "enforce" => Ok(Self::Enforce),
            other => Err(ConfigError::InvalidValue {
                field: "engine.mode".to_owned(),
                reason: format!("unknown mode '{other}', expected capture or enforce"),
            }
            .into()),
        }
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Capture => f.write_str("capture"),
            Self::Enforce => f.write_str("enforce"),
        }
    }
}

/// 이름 붙은 감시 포트 묶음
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRule {
    /// 규칙 고유 ID
    pub id: String,
    /// 감시 포트
    pub ports: Vec<u16>,
    /// 규칙 설명
    #[serde(default)]
    pub description: String,
}

/// TOML 규칙 파일의 최상위 구조
#[derive(Debug, Clone, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<PortRule>,
}

/// 엔진 확장 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `[engine]` 섹션
    pub base: EngineSection,
    /// `[filter]` 섹션
    pub filter: FilterConfig,
    /// `[capture]` 섹션
    pub capture: CaptureConfig,
    /// 규칙 파일에서 추가된 포트 규칙
    #[serde(default)]
    pub rules: Vec<PortRule>,
}

impl EngineConfig {
    /// core 설정에서 엔진 설정을 생성합니다 (규칙 없이).
    pub fn from_core(config: &PortwatchConfig) -> Self {
        Self {
            base: config.engine.clone(),
            filter: config.filter.clone(),
            capture: config.capture.clone(),
            rules: Vec::new(),
        }
    }

    /// TOML 파일에서 포트 규칙을 로드합니다.
    ///
    /// 파일이 존재하지 않으면 빈 Vec을 반환합니다.
    pub async fn load_rules(path: impl AsRef<Path>) -> Result<Vec<PortRule>, PortwatchError> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "rules file not found, no extra rules loaded");
                return Ok(Vec::new());
            }
            Err(e) => return Err(PortwatchError::Io(e)),
        };

        let file: RulesFile = toml::from_str(&content).map_err(|e| ConfigError::ParseFailed {
            reason: format!("{}: {}", path.display(), e),
        })?;

        for rule in &file.rules {
            if rule.id.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "rules.id".to_owned(),
                    reason: "rule id must not be empty".to_owned(),
                }
                .into());
            }
            if rule.ports.is_empty() || rule.ports.contains(&0) {
                return Err(ConfigError::InvalidValue {
                    field: format!("rules[{}].ports", rule.id),
                    reason: "ports must be non-empty and non-zero".to_owned(),
                }
                .into());
            }
        }

        Ok(file.rules)
    }

    /// 규칙을 추가합니다.
    ///
    /// 동일한 ID의 규칙이 이미 존재하면 교체합니다.
    pub fn add_rule(&mut self, rule: PortRule) {
        self.rules.retain(|r| r.id != rule.id);
        self.rules.push(rule);
    }

    /// 규칙을 ID로 제거합니다.
    ///
    /// 제거된 경우 `true`, 존재하지 않으면 `false`를 반환합니다.
    pub fn remove_rule(&mut self, rule_id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != rule_id);
        self.rules.len() < before
    }

    /// 동작 모드
    pub fn mode(&self) -> Result<EngineMode, PortwatchError> {
        self.base.mode.parse()
    }

    /// `filter.ports`와 규칙 포트를 합친 감시 포트 집합을 만듭니다.
    ///
    /// # 에러
    /// - 합집합이 비었거나 포트 0을 포함
    /// - 합집합 크기가 `watch_list_max_entries` 초과
    pub fn filter_rule(&self) -> Result<FilterRule, PortwatchError> {
        let rule = FilterRule::new(
            self.filter
                .ports
                .iter()
                .chain(self.rules.iter().flat_map(|r| r.ports.iter()))
                .copied(),
        )?;

        if rule.len() > self.base.watch_list_max_entries {
            return Err(ConfigError::InvalidValue {
                field: "filter.ports".to_owned(),
                reason: format!(
                    "{} watched ports exceed watch_list_max_entries ({})",
                    rule.len(),
                    self.base.watch_list_max_entries
                ),
            }
            .into());
        }

        Ok(rule)
    }

    /// `WATCHED_PORTS` 맵의 `max_entries`
    pub fn kernel_watch_list_entries(&self) -> Result<u32, PortwatchError> {
        u32::try_from(self.base.watch_list_max_entries)
            .ok()
            .filter(|&entries| entries > 0)
            .ok_or_else(|| {
                AttachError::Map(format!(
                    "watch_list_max_entries {} does not fit a kernel map",
                    self.base.watch_list_max_entries
                ))
                .into()
            })
    }

    /// `EVENTS` 링 버퍼의 바이트 크기
    ///
    /// 커널 링 버퍼는 페이지 크기의 2의 거듭제곱 배여야 하므로,
    /// `capture.ring_buffer_size`를 최소 한 페이지, 최소 레코드 하나가 들어가는
    /// 크기로 올린 뒤 다음 2의 거듭제곱으로 맞춥니다.
    pub fn kernel_ring_buffer_size(&self, page_size: usize) -> Result<u32, PortwatchError> {
        let record = core::mem::size_of::<CaptureRecord>() + RINGBUF_RECORD_HEADER_LEN;
        self.capture
            .ring_buffer_size
            .max(page_size.max(1))
            .max(record)
            .checked_next_power_of_two()
            .and_then(|size| u32::try_from(size).ok())
            .ok_or_else(|| {
                AttachError::Map(format!(
                    "ring_buffer_size {} does not fit a kernel ring buffer",
                    self.capture.ring_buffer_size
                ))
                .into()
            })
    }

    /// 유저스페이스 캡처 상한 (`1..=MAX_CAPTURE`)
    pub fn max_capture(&self) -> usize {
        self.capture.max_capture.clamp(1, portwatch_ebpf_common::MAX_CAPTURE)
    }
}
