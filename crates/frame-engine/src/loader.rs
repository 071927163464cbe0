//! 커널 프로그램 로드 및 attach (Linux 전용)
//!
//! `FrameEngine::start()`에서 호출됩니다. 성공하면 로드된 `Ebpf` 핸들과
//! 백그라운드 태스크(링 버퍼 리더 또는 소켓 리더, 통계 폴러)를 돌려줍니다.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

use aya::{Ebpf, EbpfLoader};
use aya::maps::{HashMap as BpfHashMap, MapData, PerCpuArray, RingBuf};
use aya::programs::{SchedClassifier, SocketFilter, TcAttachType, tc};
use tokio::io::unix::AsyncFd;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use portwatch_core::error::{AttachError, CaptureError, PortwatchError};
use portwatch_ebpf_common::{
    MAP_EVENTS, MAP_STATS, MAP_WATCHED_PORTS, MAX_CAPTURE, PROG_PORT_FILTER, PROG_TC_EGRESS,
    PROG_TC_INGRESS, STATS_MAX_ENTRIES,
};

use crate::capture::{CaptureProducer, Frame};
use crate::config::{EngineConfig, EngineMode};
use crate::diagnostics::Diagnostics;
use crate::filter::FilterRule;
use crate::hook::{CaptureHook, RecordForwarder};
use crate::stats::StatsSnapshot;

/// attach에 필요한 엔진 상태
pub(crate) struct AttachRequest<'a> {
    pub config: &'a EngineConfig,
    pub mode: EngineMode,
    pub rule: &'a FilterRule,
    pub hook: CaptureHook,
    pub producer: CaptureProducer,
    pub diagnostics: Arc<dyn Diagnostics>,
}

/// attach 결과
pub(crate) struct Attached {
    pub bpf: Ebpf,
    pub tasks: Vec<JoinHandle<()>>,
    pub kernel_stats: watch::Receiver<StatsSnapshot>,
}

/// 커널 오브젝트를 로드하고 모드별로 연결합니다.
pub(crate) fn attach(request: AttachRequest<'_>) -> Result<Attached, PortwatchError> {
    let AttachRequest {
        config,
        mode,
        rule,
        hook,
        producer,
        diagnostics,
    } = request;
    let interface = config.base.interface.as_str();
    let program_path = config.base.program_path.as_str();

    let watch_entries = config.kernel_watch_list_entries()?;
    let ring_size = config.kernel_ring_buffer_size(page_size())?;

    let mut bpf = EbpfLoader::new()
        .set_max_entries(MAP_WATCHED_PORTS, watch_entries)
        .set_max_entries(MAP_EVENTS, ring_size)
        .load_file(program_path)
        .map_err(|e| AttachError::ProgramLoad(format!("{program_path}: {e}")))?;
    debug!(watch_entries, ring_size, "kernel maps sized from config");

    if let Err(e) = aya_log::EbpfLogger::init(&mut bpf) {
        warn!(error = %e, "failed to initialize eBPF logger");
    }

    sync_watched_ports(&mut bpf, rule)?;

    let mut tasks = Vec::with_capacity(2);
    match mode {
        EngineMode::Capture => {
            attach_tc(&mut bpf, interface)?;
            let ring = take_ring_buffer(&mut bpf)?;
            let forwarder = RecordForwarder::new(producer, diagnostics, config.max_capture());
            tasks.push(tokio::spawn(read_ring_buffer(ring, forwarder)));
        }
        EngineMode::Enforce => {
            let socket = open_packet_socket(interface)?;
            attach_socket_filter(&mut bpf, &socket)?;
            tasks.push(tokio::spawn(read_packet_socket(socket, hook)));
        }
    }

    let stats = take_stats(&mut bpf)?;
    let (tx, rx) = watch::channel(StatsSnapshot::default());
    let interval = Duration::from_secs(config.base.stats_interval_secs.max(1));
    tasks.push(tokio::spawn(poll_kernel_stats(stats, interval, tx)));

    info!(interface, mode = %mode, "frame engine attached");

    Ok(Attached {
        bpf,
        tasks,
        kernel_stats: rx,
    })
}

// =============================================================================
// 맵
// =============================================================================

fn page_size() -> usize {
    // SAFETY: 인자 없는 조회이며 실패 시 -1을 반환합니다.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).unwrap_or(4096)
}

/// 감시 포트 집합을 WATCHED_PORTS 맵에 기록합니다.
fn sync_watched_ports(bpf: &mut Ebpf, rule: &FilterRule) -> Result<(), AttachError> {
    let map = bpf
        .map_mut(MAP_WATCHED_PORTS)
        .ok_or_else(|| AttachError::Map(format!("map '{MAP_WATCHED_PORTS}' not found")))?;
    let mut ports: BpfHashMap<_, u16, u8> = BpfHashMap::try_from(map)
        .map_err(|e| AttachError::Map(format!("{MAP_WATCHED_PORTS}: {e}")))?;

    for port in rule.ports() {
        ports
            .insert(port, 1, 0)
            .map_err(|e| AttachError::Map(format!("insert port {port}: {e}")))?;
    }

    debug!(count = rule.len(), "watched ports synced to kernel");
    Ok(())
}

fn take_ring_buffer(bpf: &mut Ebpf) -> Result<RingBuf<MapData>, AttachError> {
    let map = bpf
        .take_map(MAP_EVENTS)
        .ok_or_else(|| AttachError::Map(format!("map '{MAP_EVENTS}' not found")))?;
    RingBuf::try_from(map).map_err(|e| AttachError::Map(format!("{MAP_EVENTS}: {e}")))
}

fn take_stats(bpf: &mut Ebpf) -> Result<PerCpuArray<MapData, u64>, AttachError> {
    let map = bpf
        .take_map(MAP_STATS)
        .ok_or_else(|| AttachError::Map(format!("map '{MAP_STATS}' not found")))?;
    PerCpuArray::try_from(map).map_err(|e| AttachError::Map(format!("{MAP_STATS}: {e}")))
}

// =============================================================================
// 프로그램
// =============================================================================

/// tc_ingress / tc_egress를 clsact에 연결합니다.
fn attach_tc(bpf: &mut Ebpf, interface: &str) -> Result<(), AttachError> {
    if let Err(e) = tc::qdisc_add_clsact(interface) {
        debug!(interface, error = %e, "clsact qdisc not added (may already exist)");
    }

    for (name, attach_type) in [
        (PROG_TC_INGRESS, TcAttachType::Ingress),
        (PROG_TC_EGRESS, TcAttachType::Egress),
    ] {
        let program: &mut SchedClassifier = bpf
            .program_mut(name)
            .ok_or_else(|| AttachError::ProgramLoad(format!("program '{name}' not found")))?
            .try_into()
            .map_err(|e| AttachError::ProgramLoad(format!("{name}: {e}")))?;
        program
            .load()
            .map_err(|e| AttachError::ProgramLoad(format!("load {name}: {e}")))?;
        program
            .attach(interface, attach_type)
            .map_err(|e| AttachError::ProgramLoad(format!("attach {name} to {interface}: {e}")))?;
        debug!(program = name, interface, "tc program attached");
    }
    Ok(())
}

/// port_filter를 raw 소켓에 연결합니다.
fn attach_socket_filter(bpf: &mut Ebpf, socket: &OwnedFd) -> Result<(), AttachError> {
    let program: &mut SocketFilter = bpf
        .program_mut(PROG_PORT_FILTER)
        .ok_or_else(|| {
            AttachError::ProgramLoad(format!("program '{PROG_PORT_FILTER}' not found"))
        })?
        .try_into()
        .map_err(|e| AttachError::ProgramLoad(format!("{PROG_PORT_FILTER}: {e}")))?;
    program
        .load()
        .map_err(|e| AttachError::ProgramLoad(format!("load {PROG_PORT_FILTER}: {e}")))?;
    program
        .attach(socket)
        .map_err(|e| AttachError::Socket(format!("attach {PROG_PORT_FILTER}: {e}")))?;
    Ok(())
}

/// 인터페이스에 바인드된 AF_PACKET raw 소켓을 엽니다.
fn open_packet_socket(interface: &str) -> Result<OwnedFd, AttachError> {
    let protocol = (libc::ETH_P_ALL as u16).to_be();

    // SAFETY: 인자는 모두 상수이며 반환값은 바로 검사합니다.
    let raw = unsafe {
        libc::socket(
            libc::AF_PACKET,
            libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            i32::from(protocol),
        )
    };
    if raw < 0 {
        return Err(AttachError::Socket(format!(
            "socket(AF_PACKET): {}",
            io::Error::last_os_error()
        )));
    }
    // SAFETY: 방금 생성한 fd이며 다른 소유자가 없습니다.
    let socket = unsafe { OwnedFd::from_raw_fd(raw) };

    let name = CString::new(interface)
        .map_err(|_| AttachError::Socket(format!("invalid interface name '{interface}'")))?;
    // SAFETY: name은 NUL로 끝나는 C 문자열입니다.
    let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if ifindex == 0 {
        return Err(AttachError::Socket(format!(
            "interface '{interface}': {}",
            io::Error::last_os_error()
        )));
    }
    let ifindex = i32::try_from(ifindex)
        .map_err(|_| AttachError::Socket(format!("interface index {ifindex} out of range")))?;

    // SAFETY: sockaddr_ll은 정수 필드만 가진 구조체입니다.
    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = protocol;
    addr.sll_ifindex = ifindex;

    // SAFETY: addr는 유효한 sockaddr_ll이고 길이는 그 크기와 같습니다.
    let rc = unsafe {
        libc::bind(
            socket.as_raw_fd(),
            (&raw const addr).cast::<libc::sockaddr>(),
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(AttachError::Socket(format!(
            "bind to '{interface}': {}",
            io::Error::last_os_error()
        )));
    }

    debug!(interface, ifindex, "packet socket bound");
    Ok(socket)
}

// =============================================================================
// 백그라운드 태스크
// =============================================================================

/// EVENTS 링 버퍼를 읽어 캡처 큐로 옮깁니다.
async fn read_ring_buffer(mut ring: RingBuf<MapData>, forwarder: RecordForwarder) {
    let async_fd = match AsyncFd::new(ring.as_raw_fd()) {
        Ok(fd) => fd,
        Err(e) => {
            warn!(error = %e, "failed to register ring buffer fd");
            return;
        }
    };

    loop {
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "ring buffer poll failed");
                return;
            }
        };

        while let Some(sample) = ring.next() {
            if let Err(CaptureError::Closed) = forwarder.forward(&sample) {
                debug!("capture consumer closed, ring buffer reader exiting");
                return;
            }
        }

        guard.clear_ready();
    }
}

/// 소켓 필터를 통과한 프레임을 받아 관찰 훅에 넘깁니다.
async fn read_packet_socket(socket: OwnedFd, hook: CaptureHook) {
    let async_fd = match AsyncFd::new(socket) {
        Ok(fd) => fd,
        Err(e) => {
            warn!(error = %e, "failed to register packet socket");
            return;
        }
    };
    let mut buf = vec![0u8; MAX_CAPTURE];

    loop {
        let mut guard = match async_fd.readable().await {
            Ok(guard) => guard,
            Err(e) => {
                warn!(error = %e, "packet socket poll failed");
                return;
            }
        };

        match guard.try_io(|fd| recv_frame(fd.get_ref(), &mut buf)) {
            Ok(Ok(wire_len)) => {
                let readable = wire_len.min(buf.len());
                let length = u32::try_from(wire_len).unwrap_or(u32::MAX);
                hook.on_frame(&Frame::with_len(&buf[..readable], length));
            }
            Ok(Err(e)) => warn!(error = %e, "packet socket recv failed"),
            Err(_would_block) => continue,
        }
    }
}

/// `MSG_TRUNC`로 잘리기 전 와이어 길이를 돌려받습니다.
fn recv_frame(socket: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: buf는 len 바이트 쓰기가 가능한 유효한 버퍼입니다.
    let n = unsafe {
        libc::recv(
            socket.as_raw_fd(),
            buf.as_mut_ptr().cast(),
            buf.len(),
            libc::MSG_TRUNC,
        )
    };
    usize::try_from(n).map_err(|_| io::Error::last_os_error())
}

/// STATS PerCpuArray를 주기적으로 합산해 게시합니다.
async fn poll_kernel_stats(
    stats: PerCpuArray<MapData, u64>,
    interval: Duration,
    tx: watch::Sender<StatsSnapshot>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;

        let mut per_index = Vec::with_capacity(STATS_MAX_ENTRIES as usize);
        for index in 0..STATS_MAX_ENTRIES {
            match stats.get(&index, 0) {
                Ok(values) => per_index.push(values.iter().copied().collect::<Vec<u64>>()),
                Err(e) => {
                    warn!(index, error = %e, "failed to read kernel stats");
                    per_index.push(Vec::new());
                }
            }
        }

        let snapshot = StatsSnapshot::sum_per_cpu(per_index);
        snapshot.publish_kernel();
        tx.send_replace(snapshot);
    }
}
