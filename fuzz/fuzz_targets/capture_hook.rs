#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use portwatch_engine::{
    CaptureHook, CaptureOutcome, FilterRule, Frame, HookStats, NoopDiagnostics, capture_queue,
};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 큐 용량 (바이트)
    capacity: u16,
    /// 캡처 상한
    max_capture: u16,
    /// 프레임들 (최대 16개)
    frames: Vec<Vec<u8>>,
}

fuzz_target!(|input: FuzzInput| {
    let (producer, mut consumer) = capture_queue(usize::from(input.capacity).max(1));
    let hook = CaptureHook::new(
        Arc::new(FilterRule::default()),
        producer,
        Arc::new(NoopDiagnostics),
        Arc::new(HookStats::new()),
        usize::from(input.max_capture),
    );

    let mut captured = 0usize;
    for frame in input.frames.iter().take(16) {
        if let CaptureOutcome::Captured { length, captured: copied } =
            hook.on_frame(&Frame::new(frame))
        {
            assert_eq!(length as usize, frame.len());
            assert!(copied <= frame.len());
            captured += 1;
        }
    }

    // 커밋된 레코드만, 커밋 순서대로 전달되어야 함
    let mut delivered = 0usize;
    while let Some(event) = consumer.try_recv() {
        assert!(event.payload().len() <= event.length() as usize);
        delivered += 1;
    }
    assert_eq!(delivered, captured);
});
