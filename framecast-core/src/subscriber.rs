//! Consumer-side slot attachment and frame polling.
//!
//! A [`Subscription`] maps a named slot read-write (the header atomics are
//! shared; the planes are only read) and hands out seqlock-validated copies
//! of the latest complete frame. Nothing here ever blocks on the producer
//! except the explicitly bounded [`wait_for_frame`](Subscription::wait_for_frame).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::FramecastError;
use crate::frame::{FrameRef, PixelFormat};
use crate::slot::backend::{SlotBackend, SlotRegion};
use crate::slot::layout::{SlotFlags, SlotHeader, plane_len};
use crate::slot::ring::data_region_name;

/// Heartbeat age beyond which the (syscall-priced) liveness probe runs.
pub const DEFAULT_HEARTBEAT_STALENESS: Duration = Duration::from_secs(2);

/// Seqlock copy retries per poll before giving up for this round.
const READ_RETRIES: usize = 4;

/// Poll interval used by `wait_for_frame`.
const WAIT_POLL_INTERVAL: Duration = Duration::from_micros(500);

// ── Subscriber ───────────────────────────────────────────────────

/// Factory for slot subscriptions.
pub struct Subscriber {
    backend: Arc<dyn SlotBackend>,
    heartbeat_staleness: Duration,
}

impl Subscriber {
    pub fn new(backend: Arc<dyn SlotBackend>) -> Self {
        Self {
            backend,
            heartbeat_staleness: DEFAULT_HEARTBEAT_STALENESS,
        }
    }

    /// Override how long the producer may go quiet before every poll pays
    /// for an authoritative liveness probe.
    pub fn with_heartbeat_staleness(mut self, staleness: Duration) -> Self {
        self.heartbeat_staleness = staleness;
        self
    }

    /// Resolve `name` and map it for reading.
    ///
    /// Fails with `NotFound` when the slot does not exist or its producer is
    /// gone. Attaching *before* a publisher exists is an expected, retryable
    /// condition.
    pub fn attach(&self, name: &str) -> Result<Subscription, FramecastError> {
        let header_region = self.backend.map(name)?;
        // SAFETY: mapped region of at least HEADER_REGION_LEN bytes; attach
        // validates magic and layout version.
        let header = unsafe { SlotHeader::attach(header_region.as_ptr()) }?;

        if !header.flags().contains(SlotFlags::PRODUCER_ATTACHED)
            || !self.backend.producer_alive(name)
        {
            return Err(FramecastError::NotFound(name.to_string()));
        }

        let mut subscription = Subscription {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
            header_region,
            data: None,
            last_generation: 0,
            dropped_frames: 0,
            heartbeat_staleness: self.heartbeat_staleness,
        };
        subscription.remap()?;
        debug!(slot = name, "subscription attached");
        Ok(subscription)
    }
}

// ── Subscription ─────────────────────────────────────────────────

/// Consumer-side mapping of the data region for one epoch.
struct MappedPlanes {
    region: Box<dyn SlotRegion>,
    epoch: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    plane_len: usize,
}

/// A live attachment to a named slot.
pub struct Subscription {
    name: String,
    backend: Arc<dyn SlotBackend>,
    header_region: Box<dyn SlotRegion>,
    data: Option<MappedPlanes>,
    last_generation: u64,
    /// Frames skipped over between successful polls (diagnostics only).
    dropped_frames: u64,
    heartbeat_staleness: Duration,
}

impl Subscription {
    /// Raw header pointer, so callers can hold the header view across
    /// mutations of other fields. The mapping lives as long as `self`.
    fn header_ptr(&self) -> *const SlotHeader {
        self.header_region.as_ptr() as *const SlotHeader
    }

    fn header(&self) -> &SlotHeader {
        // SAFETY: validated at attach; mapping lives as long as self.
        unsafe { &*self.header_ptr() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generation of the last frame returned by `poll`.
    pub fn last_generation(&self) -> u64 {
        self.last_generation
    }

    /// Frames published but never observed by this subscription. Only the
    /// latest frame matters for correctness; this is a diagnostic.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Return a copy of the latest complete frame if the generation counter
    /// advanced since the last poll. Never blocks.
    pub fn poll(&mut self) -> Result<Option<FrameRef>, FramecastError> {
        self.check_producer()?;

        // SAFETY: see header_ptr; detached from the &self borrow so the
        // bookkeeping fields below stay writable.
        let header = unsafe { &*self.header_ptr() };
        let current_epoch = header.epoch();
        let data = match &self.data {
            Some(data) if data.epoch == current_epoch => data,
            Some(data) => {
                return Err(FramecastError::SlotInvalidated {
                    mapped: data.epoch,
                    current: current_epoch,
                });
            }
            None => {
                return Err(FramecastError::SlotInvalidated {
                    mapped: 0,
                    current: current_epoch,
                });
            }
        };

        if header.generation() <= self.last_generation {
            return Ok(None);
        }

        for _ in 0..READ_RETRIES {
            let Some((seq, front)) = header.read_enter() else {
                std::hint::spin_loop();
                continue;
            };

            // SAFETY: the data region holds two planes of plane_len bytes
            // and `front` is 0 or 1. A torn read is detected below and the
            // buffer discarded.
            let pixels = unsafe {
                std::slice::from_raw_parts(
                    data.region.as_ptr().add(front as usize * data.plane_len),
                    data.plane_len,
                )
                .to_vec()
            };

            if !header.read_valid(seq) {
                continue;
            }

            let generation = seq >> 1;
            if generation <= self.last_generation {
                return Ok(None);
            }
            if generation > self.last_generation + 1 && self.last_generation > 0 {
                self.dropped_frames += generation - self.last_generation - 1;
            }
            self.last_generation = generation;

            return Ok(Some(FrameRef {
                width: data.width,
                height: data.height,
                format: data.format,
                generation,
                pixels,
            }));
        }

        // Publisher kept winning the race this round; try again next poll.
        Ok(None)
    }

    /// Blocking variant of `poll`, bounded by `timeout`.
    pub fn wait_for_frame(&mut self, timeout: Duration) -> Result<FrameRef, FramecastError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.poll()? {
                return Ok(frame);
            }
            if Instant::now() >= deadline {
                return Err(FramecastError::Timeout(timeout));
            }
            std::thread::sleep(WAIT_POLL_INTERVAL);
        }
    }

    /// Re-map the data region after a resize invalidated the old mapping.
    pub fn remap(&mut self) -> Result<(), FramecastError> {
        // SAFETY: see header_ptr.
        let header = unsafe { &*self.header_ptr() };
        // Dimensions and epoch are published by the producer in that order;
        // re-read until they agree so we never cache new dims under an old
        // epoch or vice versa.
        for _ in 0..READ_RETRIES {
            let epoch = header.epoch();
            let width = header.width();
            let height = header.height();
            let format = header.format()?;
            if header.epoch() != epoch {
                continue;
            }

            let region = self.backend.map(&data_region_name(&self.name, epoch))?;
            self.data = Some(MappedPlanes {
                region,
                epoch,
                width,
                height,
                format,
                plane_len: plane_len(width, height, format),
            });
            return Ok(());
        }
        Err(FramecastError::Backend(
            "slot kept resizing during remap".into(),
        ))
    }

    /// `NotFound` once the producer has closed the slot or died.
    fn check_producer(&self) -> Result<(), FramecastError> {
        let header = self.header();
        if !header.flags().contains(SlotFlags::PRODUCER_ATTACHED) {
            return Err(FramecastError::NotFound(self.name.clone()));
        }
        // Cheap path: a fresh heartbeat is proof of life without a syscall.
        if header.heartbeat_age_us() < self.heartbeat_staleness.as_micros() as u64 {
            return Ok(());
        }
        if self.backend.producer_alive(&self.name) {
            Ok(())
        } else {
            Err(FramecastError::NotFound(self.name.clone()))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::publisher::Publisher;
    use crate::slot::ring::SlotRing;
    use crate::slot::shm_unix::ShmBackend;

    fn setup() -> (tempfile::TempDir, Arc<ShmBackend>, SlotRing) {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(ShmBackend::new(dir.path()).unwrap());
        let ring = SlotRing::new(Arc::clone(&backend) as Arc<dyn SlotBackend>, 4);
        (dir, backend, ring)
    }

    fn fill(w: u32, h: u32, value: u8) -> Vec<u8> {
        vec![value; (w * h * 4) as usize]
    }

    #[test]
    fn attach_before_publisher_is_not_found_then_succeeds() {
        let (_dir, backend, ring) = setup();
        let subscriber = Subscriber::new(backend);

        assert!(matches!(
            subscriber.attach("cam1"),
            Err(FramecastError::NotFound(_))
        ));

        let _handle = ring.open("cam1", 4, 4, PixelFormat::Bgra8).unwrap();
        assert!(subscriber.attach("cam1").is_ok());
    }

    #[test]
    fn poll_sees_latest_frame_with_nondecreasing_generations() {
        let (_dir, backend, ring) = setup();
        let handle = ring.open("cam1", 4, 4, PixelFormat::Bgra8).unwrap();
        let publisher = Publisher::new();
        let mut sub = Subscriber::new(backend).attach("cam1").unwrap();

        // Nothing published yet.
        assert!(sub.poll().unwrap().is_none());

        let mut last_seen = 0;
        for i in 1..=10u8 {
            let pixels = fill(4, 4, i);
            let frame = Frame::new(4, 4, PixelFormat::Bgra8, &pixels).unwrap();
            publisher.publish(&handle, &frame).unwrap();

            if let Some(frame) = sub.poll().unwrap() {
                assert!(frame.generation > last_seen);
                last_seen = frame.generation;
                assert_eq!(frame.pixels[0], i);
            }
        }
        assert_eq!(last_seen, 10);

        // Same generation again: nothing new.
        assert!(sub.poll().unwrap().is_none());
    }

    #[test]
    fn generation_jump_counts_dropped_frames() {
        let (_dir, backend, ring) = setup();
        let handle = ring.open("cam1", 4, 4, PixelFormat::Bgra8).unwrap();
        let publisher = Publisher::new();
        let mut sub = Subscriber::new(backend).attach("cam1").unwrap();

        let pixels = fill(4, 4, 1);
        let frame = Frame::new(4, 4, PixelFormat::Bgra8, &pixels).unwrap();

        publisher.publish(&handle, &frame).unwrap();
        sub.poll().unwrap().unwrap();

        for _ in 0..5 {
            publisher.publish(&handle, &frame).unwrap();
        }
        sub.poll().unwrap().unwrap();
        assert_eq!(sub.dropped_frames(), 4);
    }

    #[test]
    fn resize_invalidates_until_remap() {
        let (_dir, backend, ring) = setup();
        let handle = ring.open("cam1", 4, 4, PixelFormat::Bgra8).unwrap();
        let publisher = Publisher::new();
        let mut sub = Subscriber::new(backend).attach("cam1").unwrap();

        ring.resize(&handle, 8, 8).unwrap();

        assert!(matches!(
            sub.poll(),
            Err(FramecastError::SlotInvalidated { mapped: 1, current: 2 })
        ));

        sub.remap().unwrap();
        let pixels = fill(8, 8, 9);
        let frame = Frame::new(8, 8, PixelFormat::Bgra8, &pixels).unwrap();
        publisher.publish(&handle, &frame).unwrap();

        let got = sub.wait_for_frame(Duration::from_secs(1)).unwrap();
        assert_eq!((got.width, got.height), (8, 8));
        assert_eq!(got.pixels.len(), 8 * 8 * 4);
        assert_eq!(got.pixels[0], 9);
    }

    #[test]
    fn wait_for_frame_times_out() {
        let (_dir, backend, ring) = setup();
        let _handle = ring.open("cam1", 4, 4, PixelFormat::Bgra8).unwrap();
        let mut sub = Subscriber::new(backend).attach("cam1").unwrap();

        let err = sub.wait_for_frame(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, FramecastError::Timeout(_)));
    }

    #[test]
    fn closed_slot_surfaces_not_found_on_poll() {
        let (_dir, backend, ring) = setup();
        let handle = ring.open("cam1", 4, 4, PixelFormat::Bgra8).unwrap();
        let mut sub = Subscriber::new(backend).attach("cam1").unwrap();

        ring.close(&handle).unwrap();
        assert!(matches!(sub.poll(), Err(FramecastError::NotFound(_))));
    }
}
