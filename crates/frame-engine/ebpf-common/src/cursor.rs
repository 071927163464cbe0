//! 프레임 커서 -- 선언된 끝을 넘지 않는 순차 헤더 읽기
//!
//! 모든 읽기는 수행 전에 `offset + T::LEN <= end`를 검증합니다.
//! 검증에 실패하면 아무것도 읽지 않고 [`Truncated`]를 반환합니다.
//!
//! ```text
//! 0            offset                 end
//! |------------|=====T::LEN=====|------|
//!              ^ read::<T>() 후 offset += T::LEN
//! ```
//!
//! 바이트 공급자는 [`FrameSource`]로 추상화되어 있어 유저스페이스에서는 `[u8]`,
//! 커널에서는 `bpf_skb_load_bytes` 기반 컨텍스트 래퍼가 같은 커서를 사용합니다.

use crate::header::WireHeader;

/// 경계 검증 실패 -- 요청한 읽기가 프레임 끝을 넘습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncated;

/// 프레임 바이트 공급자
pub trait FrameSource {
    /// 읽을 수 있는 바이트 수 (커서의 `end` 상한)
    fn end(&self) -> usize;

    /// `offset` 위치에서 `T`를 읽습니다.
    ///
    /// 공급자 자체의 검증에 실패하면 `None`을 반환합니다.
    /// 커서는 이 메서드를 호출하기 전에 이미 범위를 검증합니다.
    fn load<T: WireHeader>(&self, offset: usize) -> Option<T>;
}

impl FrameSource for [u8] {
    #[inline(always)]
    fn end(&self) -> usize {
        self.len()
    }

    #[inline(always)]
    fn load<T: WireHeader>(&self, offset: usize) -> Option<T> {
        let bytes = self.get(offset..offset.checked_add(T::LEN)?)?;
        // SAFETY: `bytes`는 정확히 T::LEN 바이트이고, WireHeader 구현 타입은
        // 정렬 1에 모든 비트 패턴이 유효합니다.
        Some(unsafe { core::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) })
    }
}

/// 프레임 위의 경계 추적 커서
///
/// 불변식: 항상 `0 <= offset <= end`.
pub struct FrameCursor<'a, S: FrameSource + ?Sized> {
    source: &'a S,
    offset: usize,
    end: usize,
}

impl<'a, S: FrameSource + ?Sized> FrameCursor<'a, S> {
    /// 공급자 전체를 범위로 하는 커서를 생성합니다.
    pub fn new(source: &'a S) -> Self {
        let end = source.end();
        Self {
            source,
            offset: 0,
            end,
        }
    }

    /// 끝을 `end`로 제한한 커서를 생성합니다.
    ///
    /// `end`가 공급자 길이보다 크면 공급자 길이로 잘립니다.
    pub fn with_end(source: &'a S, end: usize) -> Self {
        let end = end.min(source.end());
        Self {
            source,
            offset: 0,
            end,
        }
    }

    /// 현재 위치에서 `T`를 읽고 `T::LEN`만큼 전진합니다.
    ///
    /// 실패 시 위치는 변하지 않습니다.
    #[inline(always)]
    pub fn read<T: WireHeader>(&mut self) -> Result<T, Truncated> {
        let next = self.offset.checked_add(T::LEN).ok_or(Truncated)?;
        if next > self.end {
            return Err(Truncated);
        }
        let value = self.source.load::<T>(self.offset).ok_or(Truncated)?;
        self.offset = next;
        Ok(value)
    }

    /// 절대 위치로 이동합니다. `offset > end`이면 실패합니다.
    #[inline(always)]
    pub fn seek(&mut self, offset: usize) -> Result<(), Truncated> {
        if offset > self.end {
            return Err(Truncated);
        }
        self.offset = offset;
        Ok(())
    }

    /// 현재 위치
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 커서의 끝
    #[inline(always)]
    pub fn end(&self) -> usize {
        self.end
    }

    /// 남은 바이트 수
    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.end - self.offset
    }
}
