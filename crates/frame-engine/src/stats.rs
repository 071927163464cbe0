//! 통계 수집 -- 훅 원자 카운터와 커널 PerCpuArray 합산
//!
//! 두 출처 모두 `portwatch_ebpf_common::STATS_IDX_*` 인덱스를 공유합니다.
//!
//! # 데이터 흐름
//! ```text
//! CaptureHook / EnforcementHook ──increment──▶ HookStats ──snapshot──▶ StatsSnapshot
//! PerCpuArray (kernel) ──poll──▶ CPU별 값 합산 ──from_counters──▶ StatsSnapshot ──publish_kernel──▶ metrics
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use portwatch_core::metrics as m;
use portwatch_ebpf_common::{
    STATS_IDX_CAPTURED, STATS_IDX_COPY_FAILED, STATS_IDX_MATCHED, STATS_IDX_NO_MATCH,
    STATS_IDX_RESERVE_FAILED, STATS_IDX_TRUNCATED, STATS_IDX_UNSUPPORTED_LINK,
    STATS_IDX_UNSUPPORTED_TRANSPORT, STATS_LABELS, STATS_MAX_ENTRIES,
};
use serde::Serialize;

const ENTRIES: usize = STATS_MAX_ENTRIES as usize;

/// 훅 카운터
///
/// 훅 사이에서 `Arc`로 공유되며 `Relaxed` 증가만 사용합니다.
#[derive(Debug, Default)]
pub struct HookStats {
    counters: [AtomicU64; ENTRIES],
}

impl HookStats {
    /// 제로 초기화된 카운터를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// `index` 카운터를 1 증가시킵니다. 범위 밖 인덱스는 무시합니다.
    pub fn increment(&self, index: u32) {
        if let Some(counter) = self.counters.get(index as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 현재 값의 스냅샷
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut values = [0u64; ENTRIES];
        for (value, counter) in values.iter_mut().zip(&self.counters) {
            *value = counter.load(Ordering::Relaxed);
        }
        StatsSnapshot::from_counters(values)
    }
}

/// 인덱스별 누적 카운터 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// 경계 초과
    pub truncated: u64,
    /// IPv4가 아닌 EtherType
    pub unsupported_link_type: u64,
    /// TCP/UDP가 아닌 프로토콜
    pub unsupported_transport: u64,
    /// 포트 불일치
    pub no_match: u64,
    /// 포트 일치
    pub matched: u64,
    /// 캡처 커밋 성공
    pub captured: u64,
    /// 예약 실패
    pub reserve_failed: u64,
    /// 복사 실패
    pub copy_failed: u64,
}

impl StatsSnapshot {
    /// `STATS_IDX_*` 순서의 배열에서 생성합니다.
    pub fn from_counters(values: [u64; ENTRIES]) -> Self {
        Self {
            truncated: values[STATS_IDX_TRUNCATED as usize],
            unsupported_link_type: values[STATS_IDX_UNSUPPORTED_LINK as usize],
            unsupported_transport: values[STATS_IDX_UNSUPPORTED_TRANSPORT as usize],
            no_match: values[STATS_IDX_NO_MATCH as usize],
            matched: values[STATS_IDX_MATCHED as usize],
            captured: values[STATS_IDX_CAPTURED as usize],
            reserve_failed: values[STATS_IDX_RESERVE_FAILED as usize],
            copy_failed: values[STATS_IDX_COPY_FAILED as usize],
        }
    }

    /// `STATS_IDX_*` 순서의 배열로 변환합니다.
    pub fn to_counters(&self) -> [u64; ENTRIES] {
        let mut values = [0u64; ENTRIES];
        values[STATS_IDX_TRUNCATED as usize] = self.truncated;
        values[STATS_IDX_UNSUPPORTED_LINK as usize] = self.unsupported_link_type;
        values[STATS_IDX_UNSUPPORTED_TRANSPORT as usize] = self.unsupported_transport;
        values[STATS_IDX_NO_MATCH as usize] = self.no_match;
        values[STATS_IDX_MATCHED as usize] = self.matched;
        values[STATS_IDX_CAPTURED as usize] = self.captured;
        values[STATS_IDX_RESERVE_FAILED as usize] = self.reserve_failed;
        values[STATS_IDX_COPY_FAILED as usize] = self.copy_failed;
        values
    }

    /// 인덱스별 CPU 값 목록을 합산합니다.
    ///
    /// `per_index[i]`는 STATS 인덱스 `i`의 CPU별 값입니다.
    pub fn sum_per_cpu<I, C>(per_index: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: IntoIterator<Item = u64>,
    {
        let mut values = [0u64; ENTRIES];
        for (value, cpus) in values.iter_mut().zip(per_index) {
            *value = cpus.into_iter().fold(0u64, u64::saturating_add);
        }
        Self::from_counters(values)
    }

    /// 분류된 전체 프레임 수 (실패 포함)
    pub fn frames(&self) -> u64 {
        self.truncated
            .saturating_add(self.unsupported_link_type)
            .saturating_add(self.unsupported_transport)
            .saturating_add(self.no_match)
            .saturating_add(self.matched)
    }

    /// 커널 카운터를 Prometheus 메트릭으로 게시합니다.
    pub fn publish_kernel(&self) {
        for (label, value) in STATS_LABELS.iter().zip(self.to_counters()) {
            metrics::counter!(m::KERNEL_FRAMES_TOTAL, m::LABEL_OUTCOME => *label).absolute(value);
        }
    }
}
