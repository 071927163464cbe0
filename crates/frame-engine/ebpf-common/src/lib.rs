//! portwatch 커널/유저스페이스 공유 타입 및 프레임 파서
//!
//! 이 크레이트는 `#![no_std]` 환경에서 사용 가능하며, 커널 프로그램과
//! 유저스페이스 훅이 같은 파서와 같은 메모리 레이아웃(`#[repr(C)]`)을 사용하도록
//! 보장합니다.
//!
//! # 구성
//! - [`header`]: Ethernet II / IPv4 / TCP / UDP 와이어 헤더
//! - [`cursor`]: 경계 검증 프레임 커서
//! - [`classify`]: 계층 헤더 파서
//! - [`verdict`]: 포트 필터 술어와 집행 판정
//!
//! # 맵 타입 선택 근거
//! - **HashMap** (`WATCHED_PORTS`): 감시 포트 집합, 유저스페이스가 attach 시점에 동기화
//! - **PerCpuArray** (`STATS`): 분류 결과별 카운터, CPU별 독립 락 프리 증가
//! - **RingBuf** (`EVENTS`): 캡처 레코드 전달, reserve/submit/discard 프로토콜

#![no_std]

pub mod classify;
pub mod cursor;
pub mod header;
pub mod verdict;

pub use classify::{
    Classification, ClassifiedFrame, Protocol, TransportHeader, classify, classify_bytes,
};
pub use cursor::{FrameCursor, FrameSource, Truncated};
pub use header::{PROTO_TCP, PROTO_UDP, WireHeader};
pub use verdict::{PortSet, Verdict};

// =============================================================================
// 맵 / 프로그램 이름 상수
// =============================================================================

/// 감시 포트 HashMap 맵 이름
pub const MAP_WATCHED_PORTS: &str = "WATCHED_PORTS";
/// 통계 PerCpuArray 맵 이름
pub const MAP_STATS: &str = "STATS";
/// 캡처 RingBuf 맵 이름
pub const MAP_EVENTS: &str = "EVENTS";

/// 소켓 필터 프로그램 이름
pub const PROG_PORT_FILTER: &str = "port_filter";
/// TC ingress 프로그램 이름
pub const PROG_TC_INGRESS: &str = "tc_ingress";
/// TC egress 프로그램 이름
pub const PROG_TC_EGRESS: &str = "tc_egress";

/// WATCHED_PORTS 맵 기본 최대 엔트리 수
pub const WATCHED_PORTS_MAX_ENTRIES: u32 = 1024;

// =============================================================================
// Stats 맵 인덱스 (PerCpuArray)
// =============================================================================

/// Ethernet/IPv4/전송 헤더 경계 초과
pub const STATS_IDX_TRUNCATED: u32 = 0;
/// IPv4가 아닌 EtherType
pub const STATS_IDX_UNSUPPORTED_LINK: u32 = 1;
/// TCP/UDP가 아닌 프로토콜
pub const STATS_IDX_UNSUPPORTED_TRANSPORT: u32 = 2;
/// 분류 성공, 포트 불일치
pub const STATS_IDX_NO_MATCH: u32 = 3;
/// 분류 성공, 포트 일치
pub const STATS_IDX_MATCHED: u32 = 4;
/// 캡처 커밋 성공
pub const STATS_IDX_CAPTURED: u32 = 5;
/// 링 버퍼 예약 실패 (BufferFull)
pub const STATS_IDX_RESERVE_FAILED: u32 = 6;
/// 페이로드 복사 실패 (CopyFailure)
pub const STATS_IDX_COPY_FAILED: u32 = 7;
/// PerCpuArray 최대 엔트리 수
pub const STATS_MAX_ENTRIES: u32 = 8;

/// STATS 인덱스별 메트릭 레이블
pub const STATS_LABELS: [&str; STATS_MAX_ENTRIES as usize] = [
    "truncated",
    "unsupported_link_type",
    "unsupported_transport",
    "no_match",
    "matched",
    "captured",
    "reserve_failed",
    "copy_failed",
];

// =============================================================================
// 캡처 레코드 (RingBuf)
// =============================================================================

/// 캡처 페이로드 최대 길이
pub const MAX_CAPTURE: usize = 65535;

/// 레코드 앞의 길이 필드 크기
pub const CAPTURE_HEADER_LEN: usize = 4;

/// 기본 링 버퍼 크기 (256 KiB)
pub const DEFAULT_RING_BUFFER_SIZE: u32 = 256 * 1024;

/// 커널 → 유저스페이스 캡처 레코드
///
/// # 메모리 레이아웃
/// ```text
/// offset  field   size
/// 0       len     4       (네이티브 바이트 오더, 실제 프레임 길이)
/// 4       data    65535   (앞 min(len, 65535) 바이트만 유효)
/// ```
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CaptureRecord {
    /// 실제 프레임 길이 (복사 길이보다 클 수 있음)
    pub len: u32,
    /// 프레임 바이트
    pub data: [u8; MAX_CAPTURE],
}

/// 링 버퍼 샘플을 `(length, payload)`로 해석합니다.
///
/// 4 바이트 미만 샘플은 `None`입니다. 페이로드는
/// `min(length, MAX_CAPTURE, sample.len() - 4)` 바이트로 잘립니다.
pub fn decode_record(sample: &[u8]) -> Option<(u32, &[u8])> {
    let (head, data) = sample.split_first_chunk::<CAPTURE_HEADER_LEN>()?;
    let length = u32::from_ne_bytes(*head);
    let copy_len = (length as usize).min(MAX_CAPTURE).min(data.len());
    Some((length, &data[..copy_len]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_rejects_short_samples() {
        assert!(decode_record(&[]).is_none());
        assert!(decode_record(&[1, 0, 0]).is_none());
    }

    #[test]
    fn decode_trims_to_declared_length() {
        let mut sample = [0xaau8; 16];
        sample[..4].copy_from_slice(&5u32.to_ne_bytes());
        let (len, payload) = decode_record(&sample).unwrap();
        assert_eq!(len, 5);
        assert_eq!(payload.len(), 5);
    }

    #[test]
    fn decode_keeps_wire_length_when_sample_is_short() {
        let mut sample = [0u8; 10];
        sample[..4].copy_from_slice(&70000u32.to_ne_bytes());
        let (len, payload) = decode_record(&sample).unwrap();
        assert_eq!(len, 70000);
        assert_eq!(payload.len(), 6);
    }

    #[test]
    fn record_layout() {
        assert_eq!(core::mem::offset_of!(CaptureRecord, data), CAPTURE_HEADER_LEN);
        assert_eq!(STATS_LABELS.len(), STATS_MAX_ENTRIES as usize);
    }
}
