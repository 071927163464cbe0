#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use portwatch_ebpf_common::classify_bytes;
use portwatch_engine::{EnforcementHook, FilterRule, Frame, FrameHook, HookStats, NoopDiagnostics};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    /// 감시 포트 (최대 64개로 제한)
    ports: Vec<u16>,
    /// 원시 프레임
    frame: Vec<u8>,
}

fuzz_target!(|input: FuzzInput| {
    let ports: Vec<u16> = input.ports.into_iter().take(64).collect();
    let Ok(rule) = FilterRule::new(ports.iter().copied()) else {
        return;
    };

    let hook = EnforcementHook::new(
        Arc::new(rule),
        Arc::new(NoopDiagnostics),
        Arc::new(HookStats::new()),
    );
    let verdict = hook.handle(&Frame::new(&input.frame));

    // 훅 판정은 순수 분류 + 포트 집합 판정과 같아야 함
    let expected = classify_bytes(&input.frame).enforce(ports.as_slice());
    assert_eq!(verdict, expected);
});
