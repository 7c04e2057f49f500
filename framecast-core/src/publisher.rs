//! Frame publishing into a shared slot.
//!
//! `publish` copies the frame into the slot's back plane, then swaps planes
//! inside a seqlock critical section that covers nothing but the swap. The
//! producer therefore never waits for consumers: a reader overlapping the
//! swap simply retries or drops its copy.
//!
//! A frame that does not match the slot (wrong dimensions or format) is a
//! *dropped frame*: logged and counted, not fatal. Only a run of consecutive
//! drops escalates to `PublisherDegraded`, which the host can treat as a
//! soft alarm.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::warn;

use crate::error::FramecastError;
use crate::frame::Frame;
use crate::slot::ring::SlotHandle;

/// Consecutive dropped frames before `publish` starts reporting
/// `PublisherDegraded`.
pub const DEFAULT_DEGRADED_THRESHOLD: u32 = 30;

/// Publisher for shared slots.
///
/// Stateless apart from diagnostics counters; one publisher can serve any
/// number of slot handles.
pub struct Publisher {
    degraded_threshold: u32,
    consecutive_drops: AtomicU32,
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Publisher {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_DEGRADED_THRESHOLD)
    }

    /// Publisher that degrades after `threshold` consecutive drops.
    pub fn with_threshold(threshold: u32) -> Self {
        Self {
            degraded_threshold: threshold.max(1),
            consecutive_drops: AtomicU32::new(0),
            frames_published: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Copy `frame` into the slot and advance the generation counter.
    ///
    /// Returns `Ok(())` for a successful publish *and* for an isolated
    /// dropped frame; `PublisherDegraded` once the consecutive-drop
    /// threshold is crossed; `NotFound` on a closed slot.
    pub fn publish(&self, handle: &SlotHandle, frame: &Frame<'_>) -> Result<(), FramecastError> {
        let shared = &handle.shared;
        if shared.is_closed() {
            return Err(FramecastError::NotFound(shared.name.clone()));
        }

        let data = shared.data.lock().expect("slot data poisoned");
        if frame.width != data.width || frame.height != data.height || frame.format != data.format
        {
            drop(data);
            return self.dropped_frame(handle, "frame does not match slot dimensions/format");
        }
        debug_assert_eq!(frame.pixels.len(), data.plane_len);

        let header = shared.header();
        let back = header.back_plane();

        // Write the shadow plane while consumers keep reading the front one.
        // SAFETY: the data region holds two planes of plane_len bytes and
        // `back` is 0 or 1; only the producer writes planes.
        unsafe {
            std::ptr::copy_nonoverlapping(
                frame.pixels.as_ptr(),
                data.region.as_ptr().add(back as usize * data.plane_len),
                data.plane_len,
            );
        }

        header.begin_publish();
        header.end_publish(back);
        drop(data);

        self.consecutive_drops.store(0, Ordering::Relaxed);
        self.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn dropped_frame(
        &self,
        handle: &SlotHandle,
        reason: &'static str,
    ) -> Result<(), FramecastError> {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(slot = handle.name(), consecutive, "dropped frame: {reason}");

        if consecutive >= self.degraded_threshold {
            Err(FramecastError::PublisherDegraded { consecutive })
        } else {
            Ok(())
        }
    }

    /// Total frames copied into slots since construction.
    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }

    /// Total frames dropped since construction.
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::slot::ring::SlotRing;
    use crate::slot::shm_unix::ShmBackend;
    use std::sync::Arc;

    fn setup() -> (tempfile::TempDir, SlotRing, SlotHandle) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ShmBackend::new(dir.path()).unwrap());
        let ring = SlotRing::new(backend, 4);
        let handle = ring.open("cam1", 4, 4, PixelFormat::Bgra8).unwrap();
        (dir, ring, handle)
    }

    #[test]
    fn publish_advances_generation() {
        let (_dir, _ring, handle) = setup();
        let publisher = Publisher::new();
        let pixels = vec![0x11u8; 4 * 4 * 4];
        let frame = Frame::new(4, 4, PixelFormat::Bgra8, &pixels).unwrap();

        assert_eq!(handle.generation(), 0);
        publisher.publish(&handle, &frame).unwrap();
        assert_eq!(handle.generation(), 1);
        publisher.publish(&handle, &frame).unwrap();
        assert_eq!(handle.generation(), 2);
        assert_eq!(publisher.frames_published(), 2);
    }

    #[test]
    fn mismatched_frame_is_soft_dropped() {
        let (_dir, _ring, handle) = setup();
        let publisher = Publisher::new();
        let pixels = vec![0u8; 8 * 8 * 4];
        let frame = Frame::new(8, 8, PixelFormat::Bgra8, &pixels).unwrap();

        // Single mismatch: absorbed.
        assert!(publisher.publish(&handle, &frame).is_ok());
        assert_eq!(publisher.frames_dropped(), 1);
        assert_eq!(handle.generation(), 0);
    }

    #[test]
    fn repeated_drops_escalate_to_degraded() {
        let (_dir, _ring, handle) = setup();
        let publisher = Publisher::with_threshold(3);
        let pixels = vec![0u8; 8 * 8 * 4];
        let frame = Frame::new(8, 8, PixelFormat::Bgra8, &pixels).unwrap();

        assert!(publisher.publish(&handle, &frame).is_ok());
        assert!(publisher.publish(&handle, &frame).is_ok());
        assert!(matches!(
            publisher.publish(&handle, &frame),
            Err(FramecastError::PublisherDegraded { consecutive: 3 })
        ));

        // A good frame resets the run.
        let good = vec![0u8; 4 * 4 * 4];
        let good = Frame::new(4, 4, PixelFormat::Bgra8, &good).unwrap();
        publisher.publish(&handle, &good).unwrap();
        assert!(publisher.publish(&handle, &frame).is_ok());
    }

    #[test]
    fn publish_to_closed_slot_is_not_found() {
        let (_dir, ring, handle) = setup();
        ring.close(&handle).unwrap();
        let publisher = Publisher::new();
        let pixels = vec![0u8; 4 * 4 * 4];
        let frame = Frame::new(4, 4, PixelFormat::Bgra8, &pixels).unwrap();
        assert!(matches!(
            publisher.publish(&handle, &frame),
            Err(FramecastError::NotFound(_))
        ));
    }
}
