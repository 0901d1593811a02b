//! # Frame Buffer Management
//!
//! Bounded per-session frame queue with a drop-oldest eviction policy. Live
//! animation frames lose all value the moment a newer one exists, so when the
//! buffer is full the oldest frame is discarded to make room. Recency wins
//! over completeness.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One rendered frame as carried over the session transport.
///
/// The pixel payload travels base64-encoded inside the JSON envelope, so a
/// frame can be pushed down the same text channel as the control messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FramePayload {
    /// Encoded image bytes (typically a JPEG or PNG of the render surface)
    #[serde(
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub data: Vec<u8>,

    /// Frame geometry at capture time
    pub width: u32,
    pub height: u32,

    /// Capture timestamp in milliseconds relative to stream start
    pub timestamp_ms: u64,
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    STANDARD.encode(bytes).serialize(serializer)
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    STANDARD.decode(&s).map_err(serde::de::Error::custom)
}

/// Bounded frame queue owned by a single session.
///
/// ## Thread Safety:
/// Uses Arc<Mutex<VecDeque>> so the buffering path and the drain path can
/// run from different tasks without the session holding a lock across either.
///
/// ## Memory Management:
/// The queue never exceeds its configured capacity. Overflow evicts from the
/// front (oldest) before appending at the back (newest).
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    frames: Arc<Mutex<VecDeque<FramePayload>>>,
    capacity: usize,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames. A zero capacity is
    /// bumped to one so a session can always stage its latest frame.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append a frame, evicting the oldest entry first when full.
    ///
    /// ## Returns:
    /// The number of frames evicted to make room (0 or 1).
    pub fn push(&self, frame: FramePayload) -> usize {
        let mut frames = self.frames.lock().unwrap();

        let mut evicted = 0;
        while frames.len() >= self.capacity {
            frames.pop_front();
            evicted += 1;
        }

        frames.push_back(frame);
        evicted
    }

    /// Remove and return the oldest buffered frame.
    pub fn pop(&self) -> Option<FramePayload> {
        self.frames.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().unwrap().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Called when a session ends so buffered state never outlives it.
    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }

    /// Timestamps of the buffered frames, oldest first. Test and diagnostics
    /// helper; the hot path never walks the queue.
    pub fn timestamps(&self) -> Vec<u64> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .map(|f| f.timestamp_ms)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ts: u64) -> FramePayload {
        FramePayload {
            data: vec![0xAB, 0xCD],
            width: 512,
            height: 512,
            timestamp_ms: ts,
        }
    }

    #[test]
    fn test_drop_oldest_on_overflow() {
        let buffer = FrameBuffer::new(3);
        for ts in [1, 2, 3, 4] {
            buffer.push(frame(ts));
        }

        // Capacity 3, pushed 4: frame 1 is gone, 2..4 remain in order
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.timestamps(), vec![2, 3, 4]);
    }

    #[test]
    fn test_push_reports_eviction() {
        let buffer = FrameBuffer::new(2);
        assert_eq!(buffer.push(frame(1)), 0);
        assert_eq!(buffer.push(frame(2)), 0);
        assert_eq!(buffer.push(frame(3)), 1);
    }

    #[test]
    fn test_pop_returns_oldest() {
        let buffer = FrameBuffer::new(4);
        buffer.push(frame(10));
        buffer.push(frame(20));

        assert_eq!(buffer.pop().unwrap().timestamp_ms, 10);
        assert_eq!(buffer.pop().unwrap().timestamp_ms, 20);
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let buffer = FrameBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push(frame(1));
        buffer.push(frame(2));
        assert_eq!(buffer.timestamps(), vec![2]);
    }

    #[test]
    fn test_payload_base64_round_trip() {
        let original = frame(42);
        let json = serde_json::to_string(&original).unwrap();
        // Raw bytes never appear in the JSON text
        assert!(json.contains(&STANDARD.encode([0xABu8, 0xCD])));

        let parsed: FramePayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }
}
