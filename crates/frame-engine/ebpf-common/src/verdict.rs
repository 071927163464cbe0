//! 포트 필터 술어와 집행 판정

use crate::classify::{Classification, ClassifiedFrame};

/// 감시 포트 집합
///
/// 유저스페이스에서는 `FilterRule`, 커널에서는 `WATCHED_PORTS` 맵이 구현합니다.
pub trait PortSet {
    /// `port`가 감시 대상이면 `true`
    fn contains_port(&self, port: u16) -> bool;
}

impl PortSet for [u16] {
    fn contains_port(&self, port: u16) -> bool {
        self.contains(&port)
    }
}

impl<const N: usize> PortSet for [u16; N] {
    fn contains_port(&self, port: u16) -> bool {
        self.contains(&port)
    }
}

impl ClassifiedFrame {
    /// `src_port ∈ ports || dst_port ∈ ports`
    #[inline(always)]
    pub fn matches<P: PortSet + ?Sized>(&self, ports: &P) -> bool {
        ports.contains_port(self.src_port()) || ports.contains_port(self.dst_port())
    }
}

/// 집행 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// 프레임을 소비 소켓까지 전달
    Accept,
    /// 프레임 폐기
    Reject,
}

impl Verdict {
    /// 소켓 필터 반환값: `Accept`는 프레임 전체 유지(-1), `Reject`는 0.
    #[inline(always)]
    pub const fn socket_filter_code(self) -> i64 {
        match self {
            Self::Accept => -1,
            Self::Reject => 0,
        }
    }

    /// 메트릭 레이블용 이름
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }
}

impl Classification {
    /// 필터와 일치하는 분류 결과만 반환합니다.
    #[inline(always)]
    pub fn matched<P: PortSet + ?Sized>(&self, ports: &P) -> Option<&ClassifiedFrame> {
        self.classified().filter(|frame| frame.matches(ports))
    }

    /// 허용 목록 판정: 분류 성공 + 필터 일치일 때만 `Accept`.
    #[inline(always)]
    pub fn enforce<P: PortSet + ?Sized>(&self, ports: &P) -> Verdict {
        if self.matched(ports).is_some() {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }
}
