//! 진단 싱크 -- 일치/실패 이벤트의 구조화 로그
//!
//! [`Diagnostics::record`]는 호출자를 막거나 실패시키지 않으며 제어 흐름에
//! 영향을 주지 않습니다.

use tracing::{debug, info, trace, warn};

use portwatch_core::error::CaptureError;
use portwatch_core::metrics as m;
use portwatch_ebpf_common::{Classification, ClassifiedFrame, Verdict};

/// 진단 이벤트
#[derive(Debug, Clone, Copy)]
pub enum DiagnosticEvent<'a> {
    /// 분류 실패 (Truncated / UnsupportedLinkType / UnsupportedTransport)
    Unclassified {
        classification: &'a Classification,
        length: u32,
    },
    /// 분류 성공, 포트 불일치
    NoMatch { frame: &'a ClassifiedFrame },
    /// 분류 성공, 포트 일치
    Matched {
        frame: &'a ClassifiedFrame,
        length: u32,
    },
    /// 집행 판정
    Verdict { verdict: Verdict },
    /// 캡처 커밋 성공
    Captured { length: u32, captured: usize },
    /// 예약/복사/커밋 실패
    CaptureFailed { error: &'a CaptureError },
    /// 길이 필드보다 짧은 링 버퍼 샘플
    MalformedSample { sample_len: usize },
}

/// 진단 싱크
pub trait Diagnostics: Send + Sync {
    /// 이벤트 하나를 기록합니다.
    fn record(&self, event: DiagnosticEvent<'_>);
}

/// `tracing` 이벤트와 `metrics` 카운터로 기록합니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record(&self, event: DiagnosticEvent<'_>) {
        match event {
            DiagnosticEvent::Unclassified {
                classification,
                length,
            } => {
                debug!(
                    outcome = classification.as_str(),
                    length, "frame not classified"
                );
                metrics::counter!(m::FRAMES_TOTAL, m::LABEL_OUTCOME => classification.as_str())
                    .increment(1);
            }
            DiagnosticEvent::NoMatch { frame } => {
                trace!(
                    protocol = frame.protocol().as_str(),
                    src_port = frame.src_port(),
                    dst_port = frame.dst_port(),
                    "frame did not match watched ports"
                );
                metrics::counter!(m::FRAMES_TOTAL, m::LABEL_OUTCOME => "no_match").increment(1);
            }
            DiagnosticEvent::Matched { frame, length } => {
                info!(
                    protocol = frame.protocol().as_str(),
                    src_addr = %frame.src_addr,
                    dst_addr = %frame.dst_addr,
                    src_port = frame.src_port(),
                    dst_port = frame.dst_port(),
                    length,
                    "watched port matched"
                );
                metrics::counter!(m::FRAMES_TOTAL, m::LABEL_OUTCOME => "matched").increment(1);
            }
            DiagnosticEvent::Verdict { verdict } => {
                metrics::counter!(m::VERDICTS_TOTAL, m::LABEL_VERDICT => verdict.as_str())
                    .increment(1);
            }
            DiagnosticEvent::Captured { length, captured } => {
                trace!(length, captured, "frame captured");
                metrics::counter!(m::CAPTURES_TOTAL, m::LABEL_RESULT => "captured").increment(1);
            }
            DiagnosticEvent::CaptureFailed { error } => {
                let result = match error {
                    CaptureError::BufferFull { .. } => "buffer_full",
                    CaptureError::CopyFailure { .. } => "copy_failed",
                    CaptureError::Closed => "closed",
                };
                warn!(error = %error, "capture dropped");
                metrics::counter!(m::CAPTURES_TOTAL, m::LABEL_RESULT => result).increment(1);
            }
            DiagnosticEvent::MalformedSample { sample_len } => {
                warn!(sample_len, "ring buffer sample shorter than record header");
                metrics::counter!(m::KERNEL_MALFORMED_SAMPLES_TOTAL).increment(1);
            }
        }
    }
}

/// 아무것도 기록하지 않습니다.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDiagnostics;

impl Diagnostics for NoopDiagnostics {
    fn record(&self, _event: DiagnosticEvent<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_diagnostics_without_recorder_does_not_panic() {
        let diag = TracingDiagnostics;
        diag.record(DiagnosticEvent::Unclassified {
            classification: &Classification::Truncated,
            length: 30,
        });
        diag.record(DiagnosticEvent::CaptureFailed {
            error: &CaptureError::Closed,
        });
        diag.record(DiagnosticEvent::Verdict {
            verdict: Verdict::Reject,
        });
        diag.record(DiagnosticEvent::MalformedSample { sample_len: 2 });
    }

    #[test]
    fn noop_accepts_everything() {
        NoopDiagnostics.record(DiagnosticEvent::Captured {
            length: 54,
            captured: 54,
        });
    }
}
