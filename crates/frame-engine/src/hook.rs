//! 프레임 훅 -- 분류 결과를 집행 판정 또는 캡처로 연결
//!
//! 트래픽 전달 계층은 프레임마다 [`FrameHook::handle`]을 한 번 호출합니다.
//!
//! ```text
//!              classify(FrameCursor)
//! Frame ──────────────────────────────▶ Classification ──PortSet──▶ matched?
//!                                                                  │
//!              ┌───────────────────────────────────────────────────┤
//!              ▼                                                   ▼
//!   EnforcementHook: Accept / Reject            CaptureHook: reserve → fill → commit
//!                                                (반환값은 항상 Accept)
//! ```
//!
//! 훅은 불변 상태(`Arc<FilterRule>`), 생산자 핸들, 진단 싱크, 원자 카운터만
//! 가지므로 `Send + Sync`이며 여러 스레드에서 동시에 호출할 수 있습니다.

use std::sync::Arc;

use portwatch_core::error::CaptureError;
use portwatch_ebpf_common::{
    CAPTURE_HEADER_LEN, Classification, ClassifiedFrame, FrameCursor, MAX_CAPTURE,
    STATS_IDX_CAPTURED, STATS_IDX_COPY_FAILED, STATS_IDX_MATCHED, STATS_IDX_NO_MATCH,
    STATS_IDX_RESERVE_FAILED, Verdict, classify, decode_record,
};

use crate::capture::{CaptureProducer, Frame};
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::filter::FilterRule;
use crate::stats::HookStats;

/// 프레임 단위 훅
pub trait FrameHook: Send + Sync {
    /// 프레임 하나를 처리하고 트래픽 판정을 반환합니다.
    fn handle(&self, frame: &Frame<'_>) -> Verdict;
}

/// 분류 + 필터 공통 단계
///
/// 통계와 진단을 기록하고, 일치한 경우에만 요약을 반환합니다.
fn classify_and_match(
    frame: &Frame<'_>,
    rule: &FilterRule,
    diagnostics: &dyn Diagnostics,
    stats: &HookStats,
) -> (Classification, Option<ClassifiedFrame>) {
    // 선언된 길이 밖은 읽지 않음 (스냅으로 잘린 경우는 읽은 바이트까지)
    let end = usize::try_from(frame.len()).unwrap_or(usize::MAX);
    let classification = classify(FrameCursor::with_end(frame.data(), end));

    let matched = match &classification {
        Classification::Classified(classified) if classified.matches(rule) => {
            stats.increment(STATS_IDX_MATCHED);
            diagnostics.record(DiagnosticEvent::Matched {
                frame: classified,
                length: frame.len(),
            });
            Some(*classified)
        }
        Classification::Classified(classified) => {
            stats.increment(STATS_IDX_NO_MATCH);
            diagnostics.record(DiagnosticEvent::NoMatch { frame: classified });
            None
        }
        failed => {
            if let Some(index) = failed.stats_index() {
                stats.increment(index);
            }
            diagnostics.record(DiagnosticEvent::Unclassified {
                classification: failed,
                length: frame.len(),
            });
            None
        }
    };

    (classification, matched)
}

// =============================================================================
// 집행
// =============================================================================

/// 허용 목록 집행 훅
///
/// 분류 성공 + 필터 일치일 때만 `Accept`, 나머지는 모두 `Reject`.
pub struct EnforcementHook {
    rule: Arc<FilterRule>,
    diagnostics: Arc<dyn Diagnostics>,
    stats: Arc<HookStats>,
}

impl EnforcementHook {
    /// 새 집행 훅을 생성합니다.
    pub fn new(
        rule: Arc<FilterRule>,
        diagnostics: Arc<dyn Diagnostics>,
        stats: Arc<HookStats>,
    ) -> Self {
        Self {
            rule,
            diagnostics,
            stats,
        }
    }
}

impl FrameHook for EnforcementHook {
    fn handle(&self, frame: &Frame<'_>) -> Verdict {
        let (_, matched) = classify_and_match(frame, &self.rule, &*self.diagnostics, &self.stats);
        let verdict = if matched.is_some() {
            Verdict::Accept
        } else {
            Verdict::Reject
        };
        self.diagnostics.record(DiagnosticEvent::Verdict { verdict });
        verdict
    }
}

// =============================================================================
// 관찰
// =============================================================================

/// 캡처 시도 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// 분류 실패 또는 포트 불일치
    Skipped(Classification),
    /// 커밋 완료
    Captured { length: u32, captured: usize },
    /// 예약/복사/커밋 실패 (트래픽에는 영향 없음)
    Dropped(CaptureError),
}

/// 관찰 훅
///
/// 일치한 프레임을 캡처 큐에 복사하며, 트래픽 판정은 항상 `Accept`입니다.
pub struct CaptureHook {
    rule: Arc<FilterRule>,
    producer: CaptureProducer,
    diagnostics: Arc<dyn Diagnostics>,
    stats: Arc<HookStats>,
    max_capture: usize,
}

impl CaptureHook {
    /// 새 관찰 훅을 생성합니다.
    ///
    /// `max_capture`는 `1..=MAX_CAPTURE` 범위로 잘립니다.
    pub fn new(
        rule: Arc<FilterRule>,
        producer: CaptureProducer,
        diagnostics: Arc<dyn Diagnostics>,
        stats: Arc<HookStats>,
        max_capture: usize,
    ) -> Self {
        Self {
            rule,
            producer,
            diagnostics,
            stats,
            max_capture: max_capture.clamp(1, MAX_CAPTURE),
        }
    }

    /// 프레임 하나를 분류하고, 일치하면 캡처합니다.
    pub fn on_frame(&self, frame: &Frame<'_>) -> CaptureOutcome {
        let (classification, matched) =
            classify_and_match(frame, &self.rule, &*self.diagnostics, &self.stats);
        if matched.is_none() {
            return CaptureOutcome::Skipped(classification);
        }

        let length = frame.len();
        let copy_len = (length as usize).min(self.max_capture);

        let mut slot = match self.producer.reserve(CAPTURE_HEADER_LEN + copy_len) {
            Ok(slot) => slot,
            Err(error) => {
                self.stats.increment(STATS_IDX_RESERVE_FAILED);
                return self.dropped(error);
            }
        };

        if copy_len > 0 {
            let data = frame.data();
            let Some(bytes) = data.get(..copy_len) else {
                slot.discard();
                self.stats.increment(STATS_IDX_COPY_FAILED);
                return self.dropped(CaptureError::CopyFailure {
                    needed: copy_len,
                    available: data.len(),
                });
            };
            if let Err(error) = slot.fill(length, bytes) {
                slot.discard();
                self.stats.increment(STATS_IDX_COPY_FAILED);
                return self.dropped(error);
            }
        } else if let Err(error) = slot.fill(length, &[]) {
            slot.discard();
            return self.dropped(error);
        }

        match slot.commit() {
            Ok(()) => {
                self.stats.increment(STATS_IDX_CAPTURED);
                self.diagnostics.record(DiagnosticEvent::Captured {
                    length,
                    captured: copy_len,
                });
                CaptureOutcome::Captured {
                    length,
                    captured: copy_len,
                }
            }
            Err(error) => self.dropped(error),
        }
    }

    fn dropped(&self, error: CaptureError) -> CaptureOutcome {
        self.diagnostics
            .record(DiagnosticEvent::CaptureFailed { error: &error });
        CaptureOutcome::Dropped(error)
    }
}

impl FrameHook for CaptureHook {
    fn handle(&self, frame: &Frame<'_>) -> Verdict {
        self.on_frame(frame);
        Verdict::Accept
    }
}

// =============================================================================
// 커널 레코드 전달
// =============================================================================

/// 커널 링 버퍼 샘플을 캡처 큐로 옮기는 단계
///
/// 커널은 항상 `min(len, MAX_CAPTURE)` 바이트를 복사하므로, 설정된
/// `max_capture` 상한은 여기서 적용합니다.
pub struct RecordForwarder {
    producer: CaptureProducer,
    diagnostics: Arc<dyn Diagnostics>,
    max_capture: usize,
}

impl RecordForwarder {
    /// `max_capture`는 `1..=MAX_CAPTURE` 범위로 잘립니다.
    pub fn new(
        producer: CaptureProducer,
        diagnostics: Arc<dyn Diagnostics>,
        max_capture: usize,
    ) -> Self {
        Self {
            producer,
            diagnostics,
            max_capture: max_capture.clamp(1, MAX_CAPTURE),
        }
    }

    /// 샘플 하나를 디코드해 큐에 넣습니다.
    ///
    /// 소비자가 닫혔으면 `Err(Closed)`. 잘못된 샘플과 그 외 큐 실패는
    /// 진단으로만 기록하고 `Ok`를 반환합니다.
    pub fn forward(&self, sample: &[u8]) -> Result<(), CaptureError> {
        let Some((length, payload)) = decode_record(sample) else {
            self.diagnostics.record(DiagnosticEvent::MalformedSample {
                sample_len: sample.len(),
            });
            return Ok(());
        };
        let payload = &payload[..payload.len().min(self.max_capture)];

        match self.producer.enqueue(length, payload) {
            Ok(()) => {
                self.diagnostics.record(DiagnosticEvent::Captured {
                    length,
                    captured: payload.len(),
                });
                Ok(())
            }
            Err(CaptureError::Closed) => Err(CaptureError::Closed),
            Err(error) => {
                self.diagnostics
                    .record(DiagnosticEvent::CaptureFailed { error: &error });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::capture_queue;
    use crate::diagnostics::NoopDiagnostics;

    fn tcp_frame(src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 54];
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        frame[14] = 0x45;
        frame[23] = 6;
        frame[34..36].copy_from_slice(&src_port.to_be_bytes());
        frame[36..38].copy_from_slice(&dst_port.to_be_bytes());
        frame
    }

    #[test]
    fn zero_length_capture_runs_no_copy() {
        // 와이어 길이 0이면 분류 단계에서 Truncated로 끝나므로 큐는 비어 있어야 합니다.
        let (producer, mut consumer) = capture_queue(1024);
        let hook = CaptureHook::new(
            Arc::new(FilterRule::default()),
            producer,
            Arc::new(NoopDiagnostics),
            Arc::new(HookStats::new()),
            MAX_CAPTURE,
        );
        let outcome = hook.on_frame(&Frame::new(&[]));
        assert_eq!(outcome, CaptureOutcome::Skipped(Classification::Truncated));
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn snap_truncated_frame_is_copy_failure() {
        let (producer, mut consumer) = capture_queue(1 << 20);
        let stats = Arc::new(HookStats::new());
        let hook = CaptureHook::new(
            Arc::new(FilterRule::default()),
            producer.clone(),
            Arc::new(NoopDiagnostics),
            Arc::clone(&stats),
            MAX_CAPTURE,
        );
        let data = tcp_frame(12345, 8000);
        let outcome = hook.on_frame(&Frame::with_len(&data, 1500));

        assert_eq!(
            outcome,
            CaptureOutcome::Dropped(CaptureError::CopyFailure {
                needed: 1500,
                available: 54
            })
        );
        assert!(consumer.try_recv().is_none());
        assert_eq!(producer.available(), producer.capacity());
        assert_eq!(stats.snapshot().copy_failed, 1);
    }

    #[test]
    fn max_capture_limits_copy() {
        let (producer, mut consumer) = capture_queue(1 << 20);
        let hook = CaptureHook::new(
            Arc::new(FilterRule::default()),
            producer,
            Arc::new(NoopDiagnostics),
            Arc::new(HookStats::new()),
            40,
        );
        let data = tcp_frame(8000, 5555);
        let outcome = hook.on_frame(&Frame::new(&data));
        assert_eq!(
            outcome,
            CaptureOutcome::Captured {
                length: 54,
                captured: 40
            }
        );
        let event = consumer.try_recv().unwrap();
        assert_eq!(event.length(), 54);
        assert_eq!(event.payload().as_ref(), &data[..40]);
    }

    fn kernel_sample(len: u32, data: &[u8]) -> Vec<u8> {
        let mut sample = len.to_ne_bytes().to_vec();
        sample.extend_from_slice(data);
        sample
    }

    #[test]
    fn forwarder_applies_max_capture() {
        let (producer, mut consumer) = capture_queue(1 << 20);
        let forwarder = RecordForwarder::new(producer, Arc::new(NoopDiagnostics), 64);
        let data = vec![0x5a; 1500];

        forwarder.forward(&kernel_sample(1500, &data)).unwrap();

        let event = consumer.try_recv().unwrap();
        assert_eq!(event.length(), 1500);
        assert_eq!(event.payload().len(), 64);
        assert_eq!(event.payload().as_ref(), &data[..64]);
    }

    #[test]
    fn forwarder_keeps_short_records_whole() {
        let (producer, mut consumer) = capture_queue(1 << 20);
        let forwarder = RecordForwarder::new(producer, Arc::new(NoopDiagnostics), 64);

        forwarder.forward(&kernel_sample(20, &[7u8; 20])).unwrap();

        let event = consumer.try_recv().unwrap();
        assert_eq!(event.length(), 20);
        assert_eq!(event.payload().len(), 20);
    }

    #[test]
    fn forwarder_skips_malformed_samples() {
        let (producer, mut consumer) = capture_queue(1 << 20);
        let forwarder = RecordForwarder::new(producer, Arc::new(NoopDiagnostics), MAX_CAPTURE);

        forwarder.forward(&[1, 2]).unwrap();
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn forwarder_reports_closed_consumer() {
        let (producer, mut consumer) = capture_queue(1 << 20);
        let forwarder = RecordForwarder::new(producer, Arc::new(NoopDiagnostics), MAX_CAPTURE);
        consumer.close();

        assert_eq!(
            forwarder.forward(&kernel_sample(4, &[1, 2, 3, 4])),
            Err(CaptureError::Closed)
        );
    }

    #[test]
    fn forwarder_survives_full_queue() {
        let (producer, mut consumer) = capture_queue(16);
        let forwarder = RecordForwarder::new(producer, Arc::new(NoopDiagnostics), MAX_CAPTURE);

        forwarder.forward(&kernel_sample(100, &[0u8; 100])).unwrap();
        assert!(consumer.try_recv().is_none());
    }
}
