//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `portwatch_`
//! - 접미어: `_total` (counter), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use portwatch_core::metrics::{FRAMES_TOTAL, LABEL_OUTCOME};
//!
//! metrics::counter!(FRAMES_TOTAL, LABEL_OUTCOME => "truncated").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 분류 결과 레이블 키 (truncated, unsupported_link_type, ..., matched)
pub const LABEL_OUTCOME: &str = "outcome";

/// 판정 레이블 키 (accept, reject)
pub const LABEL_VERDICT: &str = "verdict";

/// 캡처 결과 레이블 키 (captured, buffer_full, copy_failed, closed)
pub const LABEL_RESULT: &str = "result";

/// 프로토콜 레이블 키 (tcp, udp)
pub const LABEL_PROTOCOL: &str = "protocol";

// ─── 유저스페이스 훅 메트릭 ────────────────────────────────────────

/// 훅: 분류 결과별 프레임 수 (counter, label: outcome)
pub const FRAMES_TOTAL: &str = "portwatch_frames_total";

/// 훅: 판정별 프레임 수 (counter, label: verdict)
pub const VERDICTS_TOTAL: &str = "portwatch_verdicts_total";

/// 훅: 캡처 결과별 수 (counter, label: result)
pub const CAPTURES_TOTAL: &str = "portwatch_captures_total";

/// 소비자: 처리한 캡처 이벤트 수 (counter, label: protocol)
pub const EVENTS_CONSUMED_TOTAL: &str = "portwatch_events_consumed_total";

// ─── 커널 프로그램 메트릭 ──────────────────────────────────────────

/// 커널: STATS 맵 인덱스별 누적 카운터 (counter, label: outcome)
pub const KERNEL_FRAMES_TOTAL: &str = "portwatch_kernel_frames_total";

/// 커널: 형식이 잘못된 링 버퍼 샘플 수 (counter)
pub const KERNEL_MALFORMED_SAMPLES_TOTAL: &str = "portwatch_kernel_malformed_samples_total";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 빌드 정보 (gauge, 항상 1, labels: version)
pub const DAEMON_BUILD_INFO: &str = "portwatch_daemon_build_info";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `portwatch-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(
        FRAMES_TOTAL,
        "Frames seen by userspace hooks, by classification outcome"
    );
    describe_counter!(
        VERDICTS_TOTAL,
        "Enforcement verdicts issued, by verdict"
    );
    describe_counter!(
        CAPTURES_TOTAL,
        "Capture attempts for matching frames, by result"
    );
    describe_counter!(
        EVENTS_CONSUMED_TOTAL,
        "Capture events drained by the consumer, by protocol"
    );
    describe_counter!(
        KERNEL_FRAMES_TOTAL,
        "Kernel program counters summed over all CPUs, by outcome"
    );
    describe_counter!(
        KERNEL_MALFORMED_SAMPLES_TOTAL,
        "Ring buffer samples shorter than the record header"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
