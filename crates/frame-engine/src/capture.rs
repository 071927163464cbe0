//! 캡처 싱크 -- 바이트 예산 기반 다중 생산자 / 단일 소비자 큐
//!
//! 생산자는 절대 대기하지 않습니다. `reserve(size)`는 예산에서 `size` 바이트를
//! 즉시 가져오거나 `BufferFull`로 실패합니다.
//!
//! ```text
//! CaptureProducer ──reserve──▶ CaptureSlot ──fill──▶ commit ──▶ CaptureConsumer
//!  (Clone, N개)                  │                     (1개, 커밋된 이벤트만 관찰)
//!                                └──discard / drop──▶ 예산 반환, 전달 안 됨
//! ```
//!
//! 예약한 바이트는 이벤트가 소비자에게서 drop될 때 예산으로 돌아갑니다.
//! 커밋된 이벤트는 정확히 한 번 전달되고, 폐기된 예약은 전달되지 않습니다.
//! 한 생산자가 연속으로 커밋한 이벤트의 순서는 보존됩니다.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, mpsc};

use portwatch_core::error::CaptureError;
use portwatch_ebpf_common::CAPTURE_HEADER_LEN;

/// 트래픽 전달 계층이 넘겨주는 프레임
///
/// `data`는 읽을 수 있는 바이트, `len`은 실제 와이어 길이입니다.
/// 스냅 길이로 잘린 프레임은 `len > data.len()`입니다.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    data: &'a [u8],
    len: u32,
}

impl<'a> Frame<'a> {
    /// 읽은 바이트 전체가 실제 프레임인 경우
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            len: u32::try_from(data.len()).unwrap_or(u32::MAX),
        }
    }

    /// 실제 와이어 길이를 따로 지정합니다.
    pub fn with_len(data: &'a [u8], len: u32) -> Self {
        Self { data, len }
    }

    /// 읽을 수 있는 바이트
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// 실제 와이어 길이
    pub fn len(&self) -> u32 {
        self.len
    }

    /// 와이어 길이가 0인지 확인
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// 소비자가 받는 캡처 이벤트
///
/// `length`는 실제 프레임 길이이며 `payload.len()`보다 클 수 있습니다.
pub struct CaptureEvent {
    length: u32,
    payload: Bytes,
    _permit: OwnedSemaphorePermit,
}

impl CaptureEvent {
    /// 실제 프레임 길이
    pub fn length(&self) -> u32 {
        self.length
    }

    /// 캡처된 바이트 (`min(length, max_capture)`)
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl fmt::Debug for CaptureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureEvent")
            .field("length", &self.length)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// 용량 `capacity` 바이트의 캡처 큐를 생성합니다.
pub fn capture_queue(capacity: usize) -> (CaptureProducer, CaptureConsumer) {
    let capacity = capacity.min(Semaphore::MAX_PERMITS);
    let budget = Arc::new(Semaphore::new(capacity));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        CaptureProducer {
            budget: Arc::clone(&budget),
            capacity,
            tx,
        },
        CaptureConsumer { budget, rx },
    )
}

/// 캡처 큐 생산자 핸들
#[derive(Clone)]
pub struct CaptureProducer {
    budget: Arc<Semaphore>,
    capacity: usize,
    tx: mpsc::UnboundedSender<CaptureEvent>,
}

impl CaptureProducer {
    /// `size` 바이트를 예약합니다. 대기하지 않습니다.
    ///
    /// # 에러
    /// - `BufferFull`: 남은 예산 부족 (또는 `size`가 전체 용량 초과)
    /// - `Closed`: 소비자가 종료됨
    pub fn reserve(&self, size: usize) -> Result<CaptureSlot, CaptureError> {
        let full = || CaptureError::BufferFull {
            requested: size,
            available: self.budget.available_permits(),
        };

        if size > self.capacity {
            return Err(full());
        }
        let permits = u32::try_from(size).map_err(|_| full())?;

        let permit = match Arc::clone(&self.budget).try_acquire_many_owned(permits) {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Err(full()),
            Err(TryAcquireError::Closed) => return Err(CaptureError::Closed),
        };

        Ok(CaptureSlot {
            permit,
            tx: self.tx.clone(),
            reserved: size,
            length: 0,
            payload: BytesMut::new(),
        })
    }

    /// 예약 → 채우기 → 커밋을 한 번에 수행합니다.
    pub fn enqueue(&self, length: u32, payload: &[u8]) -> Result<(), CaptureError> {
        let mut slot = self.reserve(CAPTURE_HEADER_LEN + payload.len())?;
        slot.fill(length, payload)?;
        slot.commit()
    }

    /// 전체 용량 (바이트)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 현재 남은 예산 (바이트)
    pub fn available(&self) -> usize {
        self.budget.available_permits()
    }

    /// 소비자가 종료되었는지 확인
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for CaptureProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureProducer")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// 예약된 캡처 슬롯
///
/// `commit()`이나 `discard()` 없이 drop되면 폐기됩니다.
#[must_use = "a reserved slot is discarded unless committed"]
pub struct CaptureSlot {
    permit: OwnedSemaphorePermit,
    tx: mpsc::UnboundedSender<CaptureEvent>,
    reserved: usize,
    length: u32,
    payload: BytesMut,
}

impl CaptureSlot {
    /// 예약 크기 (길이 필드 포함)
    pub fn reserved(&self) -> usize {
        self.reserved
    }

    /// 실제 길이와 페이로드를 기록합니다.
    ///
    /// # 에러
    /// `CAPTURE_HEADER_LEN + payload.len()`이 예약 크기를 넘으면 `CopyFailure`.
    pub fn fill(&mut self, length: u32, payload: &[u8]) -> Result<(), CaptureError> {
        let room = self.reserved.saturating_sub(CAPTURE_HEADER_LEN);
        if payload.len() > room {
            return Err(CaptureError::CopyFailure {
                needed: payload.len(),
                available: room,
            });
        }
        self.length = length;
        self.payload.clear();
        self.payload.extend_from_slice(payload);
        Ok(())
    }

    /// 이벤트를 소비자에게 원자적으로 공개합니다.
    ///
    /// 소비자가 이미 종료되었으면 `Closed`를 반환하고 예약은 해제됩니다.
    pub fn commit(self) -> Result<(), CaptureError> {
        let Self {
            permit,
            tx,
            length,
            payload,
            ..
        } = self;
        let event = CaptureEvent {
            length,
            payload: payload.freeze(),
            _permit: permit,
        };
        tx.send(event).map_err(|_| CaptureError::Closed)
    }

    /// 공개하지 않고 예약을 해제합니다.
    pub fn discard(self) {
        drop(self);
    }
}

impl fmt::Debug for CaptureSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureSlot")
            .field("reserved", &self.reserved)
            .field("length", &self.length)
            .finish()
    }
}

/// 캡처 큐 소비자 핸들 (복제 불가)
pub struct CaptureConsumer {
    budget: Arc<Semaphore>,
    rx: mpsc::UnboundedReceiver<CaptureEvent>,
}

impl CaptureConsumer {
    /// 다음 이벤트를 기다립니다. 모든 생산자가 사라지면 `None`.
    pub async fn recv(&mut self) -> Option<CaptureEvent> {
        self.rx.recv().await
    }

    /// 대기 없이 다음 이벤트를 가져옵니다.
    pub fn try_recv(&mut self) -> Option<CaptureEvent> {
        self.rx.try_recv().ok()
    }

    /// 새 예약과 커밋을 막습니다. 이미 커밋된 이벤트는 계속 받을 수 있습니다.
    pub fn close(&mut self) {
        self.budget.close();
        self.rx.close();
    }
}

impl Drop for CaptureConsumer {
    fn drop(&mut self) {
        self.budget.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_len_defaults_to_data_len() {
        let data = [0u8; 54];
        let frame = Frame::new(&data);
        assert_eq!(frame.len(), 54);
        assert_eq!(frame.data().len(), 54);

        let snapped = Frame::with_len(&data[..20], 1500);
        assert_eq!(snapped.len(), 1500);
        assert_eq!(snapped.data().len(), 20);
    }

    #[test]
    fn commit_delivers_exactly_once() {
        let (producer, mut consumer) = capture_queue(1024);
        let mut slot = producer.reserve(8).unwrap();
        slot.fill(4, &[1, 2, 3, 4]).unwrap();
        slot.commit().unwrap();

        let event = consumer.try_recv().unwrap();
        assert_eq!(event.length(), 4);
        assert_eq!(event.payload().as_ref(), &[1, 2, 3, 4]);
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn discard_and_drop_are_never_delivered() {
        let (producer, mut consumer) = capture_queue(1024);

        let slot = producer.reserve(16).unwrap();
        slot.discard();
        {
            let _slot = producer.reserve(16).unwrap();
        }

        assert!(consumer.try_recv().is_none());
        assert_eq!(producer.available(), 1024);
    }

    #[test]
    fn reserve_fails_fast_when_budget_exhausted() {
        let (producer, mut consumer) = capture_queue(100);
        producer.enqueue(60, &[0u8; 60]).unwrap();
        assert_eq!(producer.available(), 36);

        let err = producer.reserve(64).unwrap_err();
        assert_eq!(
            err,
            CaptureError::BufferFull {
                requested: 64,
                available: 36
            }
        );

        // 소비 후 예산 반환
        drop(consumer.try_recv().unwrap());
        assert_eq!(producer.available(), 100);
        assert!(producer.reserve(64).is_ok());
    }

    #[test]
    fn reserve_larger_than_capacity_is_buffer_full() {
        let (producer, _consumer) = capture_queue(64);
        assert!(matches!(
            producer.reserve(65),
            Err(CaptureError::BufferFull { requested: 65, .. })
        ));
    }

    #[test]
    fn fill_beyond_reservation_is_copy_failure() {
        let (producer, _consumer) = capture_queue(64);
        let mut slot = producer.reserve(8).unwrap();
        assert_eq!(
            slot.fill(10, &[0u8; 10]),
            Err(CaptureError::CopyFailure {
                needed: 10,
                available: 4
            })
        );
    }

    #[test]
    fn commit_after_consumer_dropped_is_closed() {
        let (producer, consumer) = capture_queue(64);
        let slot = producer.reserve(8).unwrap();
        drop(consumer);

        assert_eq!(slot.commit(), Err(CaptureError::Closed));
        assert_eq!(producer.reserve(8).err(), Some(CaptureError::Closed));
        assert!(producer.is_closed());
    }

    #[test]
    fn producer_order_is_preserved() {
        let (producer, mut consumer) = capture_queue(4096);
        for i in 0..10u32 {
            producer.enqueue(i, &[i as u8]).unwrap();
        }
        for i in 0..10u32 {
            assert_eq!(consumer.try_recv().unwrap().length(), i);
        }
    }

    #[tokio::test]
    async fn concurrent_producers_deliver_every_commit() {
        let (producer, mut consumer) = capture_queue(1 << 20);
        let mut handles = Vec::new();
        for worker in 0..4u8 {
            let producer = producer.clone();
            handles.push(tokio::spawn(async move {
                for seq in 0..100u8 {
                    producer.enqueue(u32::from(worker), &[worker, seq]).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(producer);

        let mut last_seq = [None::<u8>; 4];
        let mut total = 0;
        while let Some(event) = consumer.recv().await {
            let [worker, seq] = [event.payload()[0], event.payload()[1]];
            if let Some(prev) = last_seq[worker as usize] {
                assert!(seq > prev, "per-producer order must hold");
            }
            last_seq[worker as usize] = Some(seq);
            total += 1;
        }
        assert_eq!(total, 400);
    }
}
