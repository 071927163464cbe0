//! 와이어 헤더 -- Ethernet II / IPv4 / TCP / UDP 고정 길이 레이아웃
//!
//! 모든 필드는 네트워크 바이트 오더 그대로 `[u8; N]`로 보관하고,
//! 접근자 메서드에서 호스트 바이트 오더로 변환합니다.
//! 정렬이 1이므로 프레임 어느 위치에서든 `read_unaligned`로 읽을 수 있습니다.

use core::net::Ipv4Addr;

/// 바이트 단위 필드로만 구성된 와이어 헤더 표식
///
/// [`FrameCursor::read`](crate::cursor::FrameCursor::read)는 이 trait을 구현한
/// 타입만 읽습니다. `LEN`만큼 커서가 전진합니다.
///
/// # Safety
/// 구현 타입은 `#[repr(C)]`이고 모든 필드가 `u8` 또는 `[u8; N]`이어야 합니다.
/// 즉 정렬이 1이고, 임의의 바이트 패턴이 모두 유효한 값이어야 합니다.
pub unsafe trait WireHeader: Copy {
    /// 헤더 길이 (바이트)
    const LEN: usize = core::mem::size_of::<Self>();
}

// =============================================================================
// Ethernet II
// =============================================================================

/// Ethernet II 헤더 길이
pub const ETH_HDR_LEN: usize = 14;

/// IPv4 EtherType
pub const ETHER_TYPE_IPV4: u16 = 0x0800;

/// Ethernet II 헤더 (14 바이트)
///
/// ```text
/// offset  field       size
/// 0       dst_addr    6
/// 6       src_addr    6
/// 12      ether_type  2
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHdr {
    /// 목적지 MAC 주소
    pub dst_addr: [u8; 6],
    /// 출발지 MAC 주소
    pub src_addr: [u8; 6],
    /// 상위 프로토콜 (네트워크 바이트 오더)
    pub ether_type: [u8; 2],
}

impl EthHdr {
    /// EtherType을 호스트 바이트 오더로 반환합니다.
    #[inline(always)]
    pub fn ether_type(&self) -> u16 {
        u16::from_be_bytes(self.ether_type)
    }
}

// SAFETY: #[repr(C)], 바이트 배열 필드만 존재합니다.
unsafe impl WireHeader for EthHdr {}

// =============================================================================
// IPv4
// =============================================================================

/// 옵션 없는 IPv4 헤더 길이
pub const IPV4_HDR_LEN: usize = 20;

/// IHL 최솟값 (32비트 워드 단위)
pub const IPV4_MIN_IHL: u8 = 5;

/// TCP 프로토콜 번호
pub const PROTO_TCP: u8 = 6;
/// UDP 프로토콜 번호
pub const PROTO_UDP: u8 = 17;

/// IPv4 헤더 최소 형태 (20 바이트, 옵션 제외)
///
/// 옵션 길이는 `ihl()`로만 반영하며, 옵션 내용은 해석하지 않습니다.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Hdr {
    /// 상위 4비트 버전, 하위 4비트 IHL
    pub vihl: u8,
    /// DSCP + ECN
    pub tos: u8,
    /// 전체 길이
    pub tot_len: [u8; 2],
    /// 식별자
    pub id: [u8; 2],
    /// 플래그 + 단편 오프셋
    pub frag_off: [u8; 2],
    /// TTL
    pub ttl: u8,
    /// 상위 프로토콜 번호
    pub proto: u8,
    /// 헤더 체크섬
    pub check: [u8; 2],
    /// 출발지 주소
    pub src_addr: [u8; 4],
    /// 목적지 주소
    pub dst_addr: [u8; 4],
}

impl Ipv4Hdr {
    /// IP 버전 (4비트)
    #[inline(always)]
    pub fn version(&self) -> u8 {
        self.vihl >> 4
    }

    /// 헤더 길이 필드 (32비트 워드 단위, 4비트)
    #[inline(always)]
    pub fn ihl(&self) -> u8 {
        self.vihl & 0x0f
    }

    /// 옵션을 포함한 헤더 길이 (바이트)
    #[inline(always)]
    pub fn header_len(&self) -> usize {
        self.ihl() as usize * 4
    }

    /// 전체 길이 필드
    #[inline(always)]
    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes(self.tot_len)
    }

    /// 출발지 주소
    #[inline(always)]
    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_addr)
    }

    /// 목적지 주소
    #[inline(always)]
    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_addr)
    }
}

// SAFETY: #[repr(C)], u8 / 바이트 배열 필드만 존재합니다.
unsafe impl WireHeader for Ipv4Hdr {}

// =============================================================================
// TCP / UDP
// =============================================================================

/// 옵션 없는 TCP 헤더 길이
pub const TCP_HDR_LEN: usize = 20;
/// UDP 헤더 길이
pub const UDP_HDR_LEN: usize = 8;

/// TCP 헤더 (20 바이트, 옵션 제외)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpHdr {
    /// 출발지 포트
    pub source: [u8; 2],
    /// 목적지 포트
    pub dest: [u8; 2],
    /// 시퀀스 번호
    pub seq: [u8; 4],
    /// 확인 응답 번호
    pub ack_seq: [u8; 4],
    /// 상위 4비트 데이터 오프셋
    pub doff_res: u8,
    /// 플래그 (CWR..FIN)
    pub flags: u8,
    /// 윈도 크기
    pub window: [u8; 2],
    /// 체크섬
    pub check: [u8; 2],
    /// 긴급 포인터
    pub urg_ptr: [u8; 2],
}

impl TcpHdr {
    /// 출발지 포트 (호스트 바이트 오더)
    #[inline(always)]
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.source)
    }

    /// 목적지 포트 (호스트 바이트 오더)
    #[inline(always)]
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dest)
    }

    /// 옵션을 포함한 헤더 길이 (바이트)
    #[inline(always)]
    pub fn header_len(&self) -> usize {
        (self.doff_res >> 4) as usize * 4
    }
}

// SAFETY: #[repr(C)], u8 / 바이트 배열 필드만 존재합니다.
unsafe impl WireHeader for TcpHdr {}

/// UDP 헤더 (8 바이트)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpHdr {
    /// 출발지 포트
    pub source: [u8; 2],
    /// 목적지 포트
    pub dest: [u8; 2],
    /// 헤더 + 페이로드 길이
    pub len: [u8; 2],
    /// 체크섬
    pub check: [u8; 2],
}

impl UdpHdr {
    /// 출발지 포트 (호스트 바이트 오더)
    #[inline(always)]
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes(self.source)
    }

    /// 목적지 포트 (호스트 바이트 오더)
    #[inline(always)]
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes(self.dest)
    }
}

// SAFETY: #[repr(C)], 바이트 배열 필드만 존재합니다.
unsafe impl WireHeader for UdpHdr {}

const _: () = assert!(core::mem::size_of::<EthHdr>() == ETH_HDR_LEN);
const _: () = assert!(core::mem::size_of::<Ipv4Hdr>() == IPV4_HDR_LEN);
const _: () = assert!(core::mem::size_of::<TcpHdr>() == TCP_HDR_LEN);
const _: () = assert!(core::mem::size_of::<UdpHdr>() == UDP_HDR_LEN);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_vihl_splits_version_and_ihl() {
        let mut hdr = Ipv4Hdr {
            vihl: 0x46,
            tos: 0,
            tot_len: [0, 44],
            id: [0; 2],
            frag_off: [0; 2],
            ttl: 64,
            proto: PROTO_UDP,
            check: [0; 2],
            src_addr: [10, 0, 0, 1],
            dst_addr: [10, 0, 0, 2],
        };
        assert_eq!(hdr.version(), 4);
        assert_eq!(hdr.ihl(), 6);
        assert_eq!(hdr.header_len(), 24);
        assert_eq!(hdr.total_len(), 44);
        assert_eq!(hdr.src_addr(), Ipv4Addr::new(10, 0, 0, 1));

        hdr.vihl = 0x4f;
        assert_eq!(hdr.header_len(), 60);
    }

    #[test]
    fn ports_decode_from_network_order() {
        let tcp = TcpHdr {
            source: 12345u16.to_be_bytes(),
            dest: 8000u16.to_be_bytes(),
            seq: [0; 4],
            ack_seq: [0; 4],
            doff_res: 0x50,
            flags: 0x02,
            window: [0; 2],
            check: [0; 2],
            urg_ptr: [0; 2],
        };
        assert_eq!(tcp.src_port(), 12345);
        assert_eq!(tcp.dst_port(), 8000);
        assert_eq!(tcp.header_len(), 20);
    }

    #[test]
    fn wire_header_len_matches_layout() {
        assert_eq!(EthHdr::LEN, 14);
        assert_eq!(Ipv4Hdr::LEN, 20);
        assert_eq!(TcpHdr::LEN, 20);
        assert_eq!(UdpHdr::LEN, 8);
    }
}
