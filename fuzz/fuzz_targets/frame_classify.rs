#![no_main]

use libfuzzer_sys::fuzz_target;
use portwatch_ebpf_common::{Classification, classify_bytes};

fuzz_target!(|data: &[u8]| {
    // 임의 바이트에서도 패닉 없이 분류되어야 함
    if let Classification::Classified(frame) = classify_bytes(data) {
        // 전송 헤더는 항상 프레임 안에 있어야 함
        assert!(frame.transport_offset >= 34);
        assert!(frame.transport_offset <= 74);
        assert!(frame.transport_offset + 8 <= data.len());
    }
});
