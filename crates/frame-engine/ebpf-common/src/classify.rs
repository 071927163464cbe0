//! 계층 헤더 파서 -- Ethernet → IPv4 → (TCP | UDP)
//!
//! 되돌아가지 않는 순차 상태 기계입니다. 처음으로 유효하지 않거나 지원하지 않는
//! 계층에서 멈추며, 부분 분류 결과는 절대 반환하지 않습니다.
//!
//! ```text
//! Start ──read EthHdr──▶ Ethernet ──ether_type == 0x0800──▶ IPv4 gate
//!   │ fail                  │ otherwise                        │ read Ipv4Hdr
//!   ▼                       ▼                                  ▼
//! Truncated        UnsupportedLinkType                 IHL >= 5 ? ──no──▶ Truncated
//!                                                              │
//!                         transport offset = 14 + IHL * 4 ◀────┘
//!                                     │
//!              proto == TCP ──seek + read TcpHdr──▶ Classified
//!              proto == UDP ──seek + read UdpHdr──▶ Classified
//!              otherwise ─────────────────────────▶ UnsupportedTransport
//! ```
//!
//! 전송 계층 오프셋은 항상 IHL로 계산합니다. 20 바이트 고정 가정은 옵션이 있는
//! 헤더에서 포트를 잘못 읽으므로 사용하지 않습니다.

use core::net::Ipv4Addr;

use crate::cursor::{FrameCursor, FrameSource};
use crate::header::{
    ETHER_TYPE_IPV4, EthHdr, IPV4_MIN_IHL, Ipv4Hdr, PROTO_TCP, PROTO_UDP, TcpHdr, UdpHdr,
};
use crate::{STATS_IDX_TRUNCATED, STATS_IDX_UNSUPPORTED_LINK, STATS_IDX_UNSUPPORTED_TRANSPORT};

/// 전송 계층 프로토콜
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// TCP (6)
    Tcp,
    /// UDP (17)
    Udp,
}

impl Protocol {
    /// IP 프로토콜 번호
    pub const fn number(self) -> u8 {
        match self {
            Self::Tcp => PROTO_TCP,
            Self::Udp => PROTO_UDP,
        }
    }

    /// 로그/메트릭 레이블용 이름
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl core::fmt::Display for Protocol {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 디코드된 전송 계층 헤더 (포트는 호스트 바이트 오더)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader {
    /// TCP 포트 쌍
    Tcp { src_port: u16, dst_port: u16 },
    /// UDP 포트 쌍
    Udp { src_port: u16, dst_port: u16 },
}

impl TransportHeader {
    /// 프로토콜
    pub const fn protocol(&self) -> Protocol {
        match self {
            Self::Tcp { .. } => Protocol::Tcp,
            Self::Udp { .. } => Protocol::Udp,
        }
    }

    /// 출발지 포트
    pub const fn src_port(&self) -> u16 {
        match *self {
            Self::Tcp { src_port, .. } | Self::Udp { src_port, .. } => src_port,
        }
    }

    /// 목적지 포트
    pub const fn dst_port(&self) -> u16 {
        match *self {
            Self::Tcp { dst_port, .. } | Self::Udp { dst_port, .. } => dst_port,
        }
    }
}

/// 분류에 성공한 프레임의 요약
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedFrame {
    /// 출발지 IPv4 주소
    pub src_addr: Ipv4Addr,
    /// 목적지 IPv4 주소
    pub dst_addr: Ipv4Addr,
    /// 전송 계층 헤더
    pub transport: TransportHeader,
    /// 프레임 시작 기준 전송 계층 헤더 오프셋 (`14 + IHL * 4`)
    pub transport_offset: usize,
}

impl ClassifiedFrame {
    /// 프로토콜
    pub const fn protocol(&self) -> Protocol {
        self.transport.protocol()
    }

    /// 출발지 포트
    pub const fn src_port(&self) -> u16 {
        self.transport.src_port()
    }

    /// 목적지 포트
    pub const fn dst_port(&self) -> u16 {
        self.transport.dst_port()
    }
}

/// 프레임 단위 분류 결과
///
/// 프레임마다 새로 계산되며 저장되지 않습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// 헤더 읽기가 프레임 끝을 넘었거나 IPv4 IHL이 5 미만
    Truncated,
    /// EtherType이 IPv4가 아님
    UnsupportedLinkType,
    /// IPv4 프로토콜이 TCP/UDP가 아님
    UnsupportedTransport,
    /// 분류 성공
    Classified(ClassifiedFrame),
}

impl Classification {
    /// 분류 성공 시 요약을 반환합니다.
    pub const fn classified(&self) -> Option<&ClassifiedFrame> {
        match self {
            Self::Classified(frame) => Some(frame),
            _ => None,
        }
    }

    /// 로그/메트릭 레이블용 이름
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Truncated => "truncated",
            Self::UnsupportedLinkType => "unsupported_link_type",
            Self::UnsupportedTransport => "unsupported_transport",
            Self::Classified(_) => "classified",
        }
    }

    /// 실패 분류의 STATS 맵 인덱스. `Classified`는 필터 결과에 따라 정해지므로 `None`.
    pub const fn stats_index(&self) -> Option<u32> {
        match self {
            Self::Truncated => Some(STATS_IDX_TRUNCATED),
            Self::UnsupportedLinkType => Some(STATS_IDX_UNSUPPORTED_LINK),
            Self::UnsupportedTransport => Some(STATS_IDX_UNSUPPORTED_TRANSPORT),
            Self::Classified(_) => None,
        }
    }
}

/// 새 커서로 프레임 하나를 분류합니다.
///
/// I/O가 없는 순수 함수이며, 최대 세 번의 헤더 읽기로 끝납니다.
#[inline(always)]
pub fn classify<S: FrameSource + ?Sized>(mut cursor: FrameCursor<'_, S>) -> Classification {
    let Ok(eth) = cursor.read::<EthHdr>() else {
        return Classification::Truncated;
    };
    if eth.ether_type() != ETHER_TYPE_IPV4 {
        return Classification::UnsupportedLinkType;
    }

    let ip_offset = cursor.offset();
    let Ok(ip) = cursor.read::<Ipv4Hdr>() else {
        return Classification::Truncated;
    };
    if ip.ihl() < IPV4_MIN_IHL {
        return Classification::Truncated;
    }
    let Some(transport_offset) = ip_offset.checked_add(ip.header_len()) else {
        return Classification::Truncated;
    };

    let transport = match ip.proto {
        PROTO_TCP => {
            if cursor.seek(transport_offset).is_err() {
                return Classification::Truncated;
            }
            let Ok(tcp) = cursor.read::<TcpHdr>() else {
                return Classification::Truncated;
            };
            TransportHeader::Tcp {
                src_port: tcp.src_port(),
                dst_port: tcp.dst_port(),
            }
        }
        PROTO_UDP => {
            if cursor.seek(transport_offset).is_err() {
                return Classification::Truncated;
            }
            let Ok(udp) = cursor.read::<UdpHdr>() else {
                return Classification::Truncated;
            };
            TransportHeader::Udp {
                src_port: udp.src_port(),
                dst_port: udp.dst_port(),
            }
        }
        _ => return Classification::UnsupportedTransport,
    };

    Classification::Classified(ClassifiedFrame {
        src_addr: ip.src_addr(),
        dst_addr: ip.dst_addr(),
        transport,
        transport_offset,
    })
}

/// 바이트 슬라이스 전체를 프레임으로 분류합니다.
pub fn classify_bytes(frame: &[u8]) -> Classification {
    classify(FrameCursor::new(frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ETH_IPV4: [u8; 14] = [
        0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst
        0x02, 0x00, 0x00, 0x00, 0x00, 0x01, // src
        0x08, 0x00,
    ];

    /// Ethernet + IPv4(IHL) + 전송 계층 헤더를 조립합니다.
    fn frame(ihl: u8, proto: u8, src_port: u16, dst_port: u16, transport_len: usize) -> ([u8; 128], usize) {
        let mut buf = [0u8; 128];
        buf[..14].copy_from_slice(&ETH_IPV4);
        buf[14] = 0x40 | ihl;
        buf[14 + 8] = 64;
        buf[14 + 9] = proto;
        buf[14 + 12..14 + 16].copy_from_slice(&[192, 168, 0, 10]);
        buf[14 + 16..14 + 20].copy_from_slice(&[192, 168, 0, 20]);
        let t = 14 + ihl as usize * 4;
        buf[t..t + 2].copy_from_slice(&src_port.to_be_bytes());
        buf[t + 2..t + 4].copy_from_slice(&dst_port.to_be_bytes());
        (buf, t + transport_len)
    }

    #[test]
    fn empty_and_short_frames_are_truncated() {
        assert_eq!(classify_bytes(&[]), Classification::Truncated);
        assert_eq!(classify_bytes(&ETH_IPV4[..13]), Classification::Truncated);
    }

    #[test]
    fn non_ipv4_ether_type_is_unsupported_link() {
        let mut eth = ETH_IPV4;
        eth[12..14].copy_from_slice(&0x86ddu16.to_be_bytes());
        assert_eq!(classify_bytes(&eth), Classification::UnsupportedLinkType);
    }

    #[test]
    fn ethernet_only_ipv4_frame_is_truncated() {
        assert_eq!(classify_bytes(&ETH_IPV4), Classification::Truncated);
    }

    #[test]
    fn icmp_is_unsupported_transport() {
        let (buf, len) = frame(5, 1, 0, 0, 8);
        assert_eq!(classify_bytes(&buf[..len]), Classification::UnsupportedTransport);
    }

    #[test]
    fn unsupported_transport_ignores_offset_past_end() {
        let (buf, _) = frame(15, 47, 0, 0, 0);
        assert_eq!(classify_bytes(&buf[..34]), Classification::UnsupportedTransport);
    }

    #[test]
    fn ihl_below_minimum_is_truncated() {
        for ihl in 0..IPV4_MIN_IHL {
            let (buf, _) = frame(5, PROTO_TCP, 1, 2, 20);
            let mut buf = buf;
            buf[14] = 0x40 | ihl;
            assert_eq!(classify_bytes(&buf[..54]), Classification::Truncated, "ihl={ihl}");
        }
    }

    #[test]
    fn tcp_ports_and_addresses_extracted() {
        let (buf, len) = frame(5, PROTO_TCP, 12345, 8000, 20);
        assert_eq!(len, 54);
        let Classification::Classified(c) = classify_bytes(&buf[..len]) else {
            panic!("expected classified");
        };
        assert_eq!(c.protocol(), Protocol::Tcp);
        assert_eq!(c.src_port(), 12345);
        assert_eq!(c.dst_port(), 8000);
        assert_eq!(c.src_addr, Ipv4Addr::new(192, 168, 0, 10));
        assert_eq!(c.dst_addr, Ipv4Addr::new(192, 168, 0, 20));
        assert_eq!(c.transport_offset, 34);
    }

    #[test]
    fn udp_classified_with_eight_byte_header() {
        let (buf, len) = frame(5, PROTO_UDP, 53, 40000, 8);
        assert_eq!(len, 42);
        let c = *classify_bytes(&buf[..len]).classified().unwrap();
        assert_eq!(c.transport, TransportHeader::Udp { src_port: 53, dst_port: 40000 });
        assert_eq!(classify_bytes(&buf[..41]), Classification::Truncated);
    }

    #[test]
    fn transport_offset_follows_ihl() {
        for ihl in IPV4_MIN_IHL..=15 {
            let (buf, len) = frame(ihl, PROTO_TCP, 1000 + ihl as u16, 8000, 20);
            let c = *classify_bytes(&buf[..len]).classified().unwrap();
            assert_eq!(c.transport_offset, 14 + ihl as usize * 4);
            assert_eq!(c.src_port(), 1000 + ihl as u16);
            assert_eq!(classify_bytes(&buf[..len - 1]), Classification::Truncated);
        }
    }

    #[test]
    fn thirty_byte_ipv4_buffer_is_truncated() {
        let (buf, _) = frame(5, PROTO_TCP, 12345, 8000, 20);
        assert_eq!(classify_bytes(&buf[..30]), Classification::Truncated);
    }

    #[test]
    fn stats_index_only_for_failures() {
        assert_eq!(Classification::Truncated.stats_index(), Some(STATS_IDX_TRUNCATED));
        let (buf, len) = frame(5, PROTO_UDP, 1, 2, 8);
        assert_eq!(classify_bytes(&buf[..len]).stats_index(), None);
    }
}
