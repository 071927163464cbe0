//! Capture consumer -- drains `CaptureEvent`s and logs one line per frame.
//!
//! Each payload is re-classified with the same parser the hooks use, so the
//! log line carries protocol, addresses and ports without trusting any
//! producer-side state.
//!
//! ```text
//! CaptureConsumer --recv--> summarize() --> tracing::info! + events_consumed_total
//!        ^
//!        +-- shutdown: close(), drain already committed events, exit
//! ```

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use portwatch_core::metrics as m;
use portwatch_engine::portwatch_ebpf_common::header::{TCP_HDR_LEN, TcpHdr, UDP_HDR_LEN};
use portwatch_engine::portwatch_ebpf_common::{
    Classification, ClassifiedFrame, FrameCursor, Protocol, classify_bytes,
};
use portwatch_engine::{CaptureConsumer, CaptureEvent};

/// What the consumer learned from one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSummary {
    /// Wire length of the frame.
    pub length: u32,
    /// Bytes actually captured.
    pub captured: usize,
    /// Re-classification of the captured bytes.
    pub classification: Classification,
    /// Application bytes past the transport header, by wire length.
    pub payload_len: Option<usize>,
}

/// Re-classify a captured event.
pub fn summarize(event: &CaptureEvent) -> EventSummary {
    let payload = event.payload().as_ref();
    let classification = classify_bytes(payload);
    let payload_len = classification.classified().map(|frame| {
        let header_end = frame.transport_offset + transport_header_len(payload, frame);
        (event.length() as usize).saturating_sub(header_end)
    });

    EventSummary {
        length: event.length(),
        captured: payload.len(),
        classification,
        payload_len,
    }
}

/// TCP data offset when readable, fixed header size otherwise.
fn transport_header_len(payload: &[u8], frame: &ClassifiedFrame) -> usize {
    match frame.protocol() {
        Protocol::Udp => UDP_HDR_LEN,
        Protocol::Tcp => {
            let mut cursor = FrameCursor::new(payload);
            cursor
                .seek(frame.transport_offset)
                .ok()
                .and_then(|()| cursor.read::<TcpHdr>().ok())
                .map_or(TCP_HDR_LEN, |tcp| tcp.header_len().max(TCP_HDR_LEN))
        }
    }
}

fn log_event(summary: &EventSummary) {
    match summary.classification {
        Classification::Classified(frame) => {
            tracing::info!(
                protocol = frame.protocol().as_str(),
                src_addr = %frame.src_addr,
                dst_addr = %frame.dst_addr,
                src_port = frame.src_port(),
                dst_port = frame.dst_port(),
                length = summary.length,
                captured = summary.captured,
                payload_len = summary.payload_len.unwrap_or(0),
                "captured frame"
            );
            metrics::counter!(m::EVENTS_CONSUMED_TOTAL, m::LABEL_PROTOCOL => frame.protocol().as_str())
                .increment(1);
        }
        other => {
            // max_capture shorter than the headers leaves nothing to parse
            tracing::debug!(
                outcome = other.as_str(),
                length = summary.length,
                captured = summary.captured,
                "captured frame not re-classifiable"
            );
            metrics::counter!(m::EVENTS_CONSUMED_TOTAL, m::LABEL_PROTOCOL => "unknown")
                .increment(1);
        }
    }
}

fn handle(event: &CaptureEvent) {
    log_event(&summarize(event));
}

/// Spawn the consumer task.
///
/// Returns the number of events consumed when the task exits. The task
/// exits when every producer is gone, or on shutdown after draining what
/// was already committed.
pub fn spawn_capture_consumer(
    mut consumer: CaptureConsumer,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut consumed = 0u64;
        loop {
            tokio::select! {
                event = consumer.recv() => match event {
                    Some(event) => {
                        handle(&event);
                        consumed += 1;
                    }
                    None => {
                        tracing::debug!("all capture producers gone, consumer exiting");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    consumer.close();
                    while let Some(event) = consumer.try_recv() {
                        handle(&event);
                        consumed += 1;
                    }
                    tracing::debug!(consumed, "capture consumer drained");
                    break;
                }
            }
        }
        consumed
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use portwatch_engine::capture_queue;

    fn tcp_frame(doff_words: u8, total: usize) -> Vec<u8> {
        let mut frame = vec![0u8; total];
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        frame[14] = 0x45;
        frame[23] = 6;
        frame[26..30].copy_from_slice(&[192, 168, 0, 1]);
        frame[30..34].copy_from_slice(&[192, 168, 0, 2]);
        frame[34..36].copy_from_slice(&12345u16.to_be_bytes());
        frame[36..38].copy_from_slice(&8000u16.to_be_bytes());
        frame[46] = doff_words << 4;
        frame
    }

    #[test]
    fn summary_counts_bytes_past_tcp_options() {
        let (producer, mut consumer) = capture_queue(4096);
        // 14 + 20 + 32 (doff 8) + 100 payload
        let frame = tcp_frame(8, 166);
        producer.enqueue(166, &frame).unwrap();

        let summary = summarize(&consumer.try_recv().unwrap());
        assert_eq!(summary.length, 166);
        assert_eq!(summary.captured, 166);
        assert_eq!(summary.payload_len, Some(100));
        let classified = summary.classification.classified().unwrap();
        assert_eq!(classified.dst_port(), 8000);
    }

    #[test]
    fn summary_uses_wire_length_for_truncated_capture() {
        let (producer, mut consumer) = capture_queue(4096);
        let frame = tcp_frame(5, 64);
        producer.enqueue(1514, &frame).unwrap();

        let summary = summarize(&consumer.try_recv().unwrap());
        assert_eq!(summary.captured, 64);
        assert_eq!(summary.payload_len, Some(1514 - 54));
    }

    #[test]
    fn headerless_capture_is_not_classified() {
        let (producer, mut consumer) = capture_queue(4096);
        let frame = tcp_frame(5, 54);
        producer.enqueue(54, &frame[..20]).unwrap();

        let summary = summarize(&consumer.try_recv().unwrap());
        assert_eq!(summary.classification, Classification::Truncated);
        assert_eq!(summary.payload_len, None);
    }

    #[tokio::test]
    async fn shutdown_drains_committed_events() {
        let (producer, consumer) = capture_queue(4096);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let frame = tcp_frame(5, 54);
        producer.enqueue(54, &frame).unwrap();
        producer.enqueue(54, &frame).unwrap();

        let _ = shutdown_tx.send(());
        let task = spawn_capture_consumer(consumer, shutdown_rx);
        let consumed = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(consumed, 2);
        assert!(producer.is_closed());
    }

    #[tokio::test]
    async fn consumer_exits_when_producers_drop() {
        let (producer, consumer) = capture_queue(4096);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_capture_consumer(consumer, shutdown_rx);

        producer.enqueue(3, b"abc").unwrap();
        drop(producer);

        let consumed = tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(consumed, 1);
    }
}
