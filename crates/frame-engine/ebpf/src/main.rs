#![no_std]
#![no_main]

use aya_ebpf::{
    EbpfContext,
    bindings::TC_ACT_OK,
    macros::{classifier, map, socket_filter},
    maps::{HashMap, PerCpuArray, RingBuf},
    programs::{SkBuffContext, TcContext},
};
use aya_log_ebpf::{debug, info, warn};
use portwatch_ebpf_common::{
    CaptureRecord, Classification, DEFAULT_RING_BUFFER_SIZE, FrameCursor, FrameSource,
    MAX_CAPTURE, PortSet, STATS_IDX_CAPTURED, STATS_IDX_COPY_FAILED, STATS_IDX_MATCHED,
    STATS_IDX_NO_MATCH, STATS_IDX_RESERVE_FAILED, STATS_MAX_ENTRIES, Verdict,
    WATCHED_PORTS_MAX_ENTRIES, WireHeader, classify,
};

/// 감시 포트 (값은 사용하지 않음)
#[map(name = "WATCHED_PORTS")]
static WATCHED_PORTS: HashMap<u16, u8> = HashMap::with_max_entries(WATCHED_PORTS_MAX_ENTRIES, 0);

/// 결과별 CPU 카운터
#[map(name = "STATS")]
static STATS: PerCpuArray<u64> = PerCpuArray::with_max_entries(STATS_MAX_ENTRIES, 0);

/// 캡처 레코드 링 버퍼
#[map(name = "EVENTS")]
static EVENTS: RingBuf = RingBuf::with_byte_size(DEFAULT_RING_BUFFER_SIZE, 0);

// =============================================================================
// 프레임 공급자 / 포트 집합
// =============================================================================

/// TC 컨텍스트 위의 프레임
struct TcFrame<'a>(&'a TcContext);

impl FrameSource for TcFrame<'_> {
    #[inline(always)]
    fn end(&self) -> usize {
        self.0.len() as usize
    }

    #[inline(always)]
    fn load<T: WireHeader>(&self, offset: usize) -> Option<T> {
        self.0.load::<T>(offset).ok()
    }
}

/// 소켓 버퍼 위의 프레임
struct SkbFrame<'a>(&'a SkBuffContext);

impl FrameSource for SkbFrame<'_> {
    #[inline(always)]
    fn end(&self) -> usize {
        self.0.len() as usize
    }

    #[inline(always)]
    fn load<T: WireHeader>(&self, offset: usize) -> Option<T> {
        self.0.load::<T>(offset).ok()
    }
}

/// WATCHED_PORTS 맵 조회
struct WatchedPorts;

impl PortSet for WatchedPorts {
    #[inline(always)]
    fn contains_port(&self, port: u16) -> bool {
        // SAFETY: 값 참조를 보관하지 않고 존재 여부만 확인합니다.
        unsafe { WATCHED_PORTS.get(&port) }.is_some()
    }
}

#[inline(always)]
fn bump(index: u32) {
    if let Some(counter) = STATS.get_ptr_mut(index) {
        // SAFETY: CPU별 슬롯이므로 다른 실행 주체와 공유되지 않습니다.
        unsafe { *counter += 1 };
    }
}

/// 분류 + 필터, 결과별 카운터 기록
#[inline(always)]
fn classify_and_match<C: EbpfContext, S: FrameSource>(ctx: &C, source: &S) -> bool {
    match classify(FrameCursor::new(source)) {
        Classification::Classified(frame) => {
            if frame.matches(&WatchedPorts) {
                bump(STATS_IDX_MATCHED);
                info!(
                    ctx,
                    "match proto={} {:i}:{} -> {:i}:{}",
                    frame.protocol().number(),
                    u32::from(frame.src_addr),
                    frame.src_port(),
                    u32::from(frame.dst_addr),
                    frame.dst_port()
                );
                true
            } else {
                bump(STATS_IDX_NO_MATCH);
                false
            }
        }
        failed => {
            if let Some(index) = failed.stats_index() {
                bump(index);
            }
            false
        }
    }
}

// =============================================================================
// 집행: 소켓 필터
// =============================================================================

/// 허용 목록 소켓 필터
///
/// 일치한 프레임만 전체 길이로 소켓에 전달하고, 나머지는 버립니다.
#[socket_filter]
pub fn port_filter(ctx: SkBuffContext) -> i64 {
    let verdict = if classify_and_match(&ctx, &SkbFrame(&ctx)) {
        Verdict::Accept
    } else {
        Verdict::Reject
    };
    verdict.socket_filter_code()
}

// =============================================================================
// 관찰: TC ingress / egress
// =============================================================================

#[classifier]
pub fn tc_ingress(ctx: TcContext) -> i32 {
    observe(&ctx);
    TC_ACT_OK
}

#[classifier]
pub fn tc_egress(ctx: TcContext) -> i32 {
    observe(&ctx);
    TC_ACT_OK
}

/// 일치한 프레임을 EVENTS에 복사합니다. 트래픽 판정에는 영향이 없습니다.
#[inline(always)]
fn observe(ctx: &TcContext) {
    if !classify_and_match(ctx, &TcFrame(ctx)) {
        return;
    }

    let len = ctx.len();
    let copy_len = (len as usize).min(MAX_CAPTURE);

    let Some(mut entry) = EVENTS.reserve::<CaptureRecord>(0) else {
        bump(STATS_IDX_RESERVE_FAILED);
        warn!(ctx, "capture ring buffer full, len={}", len);
        return;
    };

    let record = entry.as_mut_ptr();
    // SAFETY: 예약된 레코드는 CaptureRecord 크기만큼 쓰기 가능하며,
    // copy_len은 MAX_CAPTURE 이하입니다.
    let copied = unsafe {
        (*record).len = len;
        if copy_len == 0 {
            Ok(0)
        } else {
            ctx.load_bytes(0, &mut (*record).data[..copy_len])
        }
    };

    match copied {
        Ok(_) => {
            entry.submit(0);
            bump(STATS_IDX_CAPTURED);
            debug!(ctx, "captured frame len={} copied={}", len, copy_len);
        }
        Err(_) => {
            entry.discard(0);
            bump(STATS_IDX_COPY_FAILED);
            warn!(ctx, "capture copy failed, len={} copy_len={}", len, copy_len);
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
