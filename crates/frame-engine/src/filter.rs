//! 포트 필터 -- 불변 감시 포트 집합
//!
//! 일치 조건은 `src_port ∈ set || dst_port ∈ set`입니다.
//! 생성 후에는 변경되지 않으며 훅 사이에서 `Arc`로 공유됩니다.

use std::collections::BTreeSet;

use portwatch_core::error::{ConfigError, PortwatchError};
use portwatch_ebpf_common::PortSet;
use serde::Serialize;

/// 기본 감시 포트
pub const DEFAULT_WATCHED_PORT: u16 = 8000;

/// 감시 포트 집합
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterRule {
    ports: BTreeSet<u16>,
}

impl FilterRule {
    /// 포트 목록으로 필터를 생성합니다. 중복은 제거됩니다.
    ///
    /// # 에러
    /// - 빈 목록: 아무것도 일치하지 않는 필터는 허용하지 않습니다.
    /// - 포트 0
    pub fn new(ports: impl IntoIterator<Item = u16>) -> Result<Self, PortwatchError> {
        let ports: BTreeSet<u16> = ports.into_iter().collect();
        if ports.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "filter.ports".to_owned(),
                reason: "at least one port must be watched".to_owned(),
            }
            .into());
        }
        if ports.contains(&0) {
            return Err(ConfigError::InvalidValue {
                field: "filter.ports".to_owned(),
                reason: "port 0 is not valid".to_owned(),
            }
            .into());
        }
        Ok(Self { ports })
    }

    /// 감시 포트 (오름차순)
    pub fn ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }

    /// 감시 포트 수
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// 항상 `false` (빈 필터는 생성할 수 없음)
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl Default for FilterRule {
    fn default() -> Self {
        Self {
            ports: BTreeSet::from([DEFAULT_WATCHED_PORT]),
        }
    }
}

impl PortSet for FilterRule {
    fn contains_port(&self, port: u16) -> bool {
        self.ports.contains(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_watches_8000() {
        let rule = FilterRule::default();
        assert_eq!(rule.ports().collect::<Vec<_>>(), vec![8000]);
        assert!(rule.contains_port(8000));
        assert!(!rule.contains_port(80));
    }

    #[test]
    fn duplicates_are_removed() {
        let rule = FilterRule::new([443, 80, 443, 8000, 80]).unwrap();
        assert_eq!(rule.len(), 3);
        assert_eq!(rule.ports().collect::<Vec<_>>(), vec![80, 443, 8000]);
    }

    #[test]
    fn empty_set_is_rejected() {
        let err = FilterRule::new(std::iter::empty()).unwrap_err();
        assert!(err.to_string().contains("at least one port"));
    }

    #[test]
    fn port_zero_is_rejected() {
        assert!(FilterRule::new([0, 8000]).is_err());
    }
}
