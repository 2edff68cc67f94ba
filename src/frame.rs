//! Captured frames and the double-buffered frame store

use bytes::Bytes;
use std::time::Instant;

/// JPEG start-of-image marker
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// One compressed image as delivered by the camera.
///
/// The payload is immutable and reference counted: cloning a `Frame` hands out
/// a private view that no later store can modify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    captured_at: Instant,
}

impl Frame {
    pub fn new(data: Bytes, captured_at: Instant) -> Self {
        Self { data, captured_at }
    }

    /// Copies a driver-owned buffer into a new frame
    pub fn copy_from_slice(data: &[u8], captured_at: Instant) -> Self {
        Self::new(Bytes::copy_from_slice(data), captured_at)
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}

/// True if `data` begins with the JPEG start-of-image marker
pub fn has_jpeg_marker(data: &[u8]) -> bool {
    data.starts_with(&JPEG_SOI)
}

/// Copies of the stored frames, safe to use after the store moved on
#[derive(Debug, Clone, Default)]
pub struct FrameSnapshot {
    pub current: Option<Frame>,
    pub previous: Option<Frame>,
}

/// Holds the most recent frame and the one it displaced.
///
/// The store itself is not synchronized; it lives inside the pipeline's single
/// lock (see [`crate::pipeline::SharedPipeline`]).
#[derive(Debug, Default)]
pub struct FrameStore {
    current: Option<Frame>,
    previous: Option<Frame>,
    frame_available: bool,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shifts current into previous, then stores `frame` as current
    pub fn store(&mut self, frame: Frame) {
        self.previous = self.current.replace(frame);
        self.frame_available = true;
    }

    pub fn snapshot(&self) -> FrameSnapshot {
        FrameSnapshot {
            current: self.current.clone(),
            previous: self.previous.clone(),
        }
    }

    pub fn current(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// True if a frame was stored since the publisher last took one
    pub fn frame_available(&self) -> bool {
        self.frame_available && self.current.is_some()
    }

    /// Clones the current frame for sending and clears the availability flag
    pub fn take_for_send(&mut self) -> Option<Frame> {
        if !self.frame_available {
            return None;
        }
        let frame = self.current.clone()?;
        self.frame_available = false;
        Some(frame)
    }

    /// Forgets both frames; used on session transitions
    pub fn clear(&mut self) {
        self.current = None;
        self.previous = None;
        self.frame_available = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &[u8]) -> Frame {
        Frame::copy_from_slice(bytes, Instant::now())
    }

    #[test]
    fn test_store_shifts_current_into_previous() {
        let mut store = FrameStore::new();
        store.store(frame(b"first"));
        assert!(!store.has_previous());

        store.store(frame(b"second"));
        let snap = store.snapshot();
        assert_eq!(snap.current.unwrap().data().as_ref(), b"second");
        assert_eq!(snap.previous.unwrap().data().as_ref(), b"first");
    }

    #[test]
    fn test_take_for_send_clears_flag() {
        let mut store = FrameStore::new();
        assert!(store.take_for_send().is_none());

        store.store(frame(b"abc"));
        assert!(store.frame_available());
        assert!(store.take_for_send().is_some());
        assert!(!store.frame_available());
        assert!(store.take_for_send().is_none());

        // current stays readable for analysis
        assert!(store.current().is_some());
    }

    #[test]
    fn test_snapshot_unaffected_by_later_store() {
        let mut store = FrameStore::new();
        store.store(frame(b"one"));
        let snap = store.snapshot();
        store.store(frame(b"two"));
        store.store(frame(b"three"));
        assert_eq!(snap.current.unwrap().data().as_ref(), b"one");
    }

    #[test]
    fn test_clear_drops_previous() {
        let mut store = FrameStore::new();
        store.store(frame(b"a"));
        store.store(frame(b"b"));
        store.clear();
        assert!(!store.has_previous());
        assert!(!store.frame_available());
        assert!(store.snapshot().current.is_none());
    }

    #[test]
    fn test_jpeg_marker() {
        assert!(has_jpeg_marker(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(!has_jpeg_marker(&[0x00, 0xD8]));
        assert!(!has_jpeg_marker(&[0xFF]));
    }
}
