//! In-memory layout of a shared slot.
//!
//! A slot is two named shared regions:
//!
//! - a fixed-size **header region** holding one [`SlotHeader`] at offset 0,
//!   which is the only state both sides touch concurrently;
//! - a per-epoch **data region** holding two tightly packed pixel planes
//!   (front + back), replaced wholesale on resize.
//!
//! All cross-process fields are atomics. The producer publishes through a
//! seqlock: the sequence word is odd while a plane swap is in flight, and the
//! frame generation is `seq >> 1`. Consumers copy the front plane out and
//! validate the sequence afterwards; a changed sequence means the copy may be
//! torn and is discarded.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bitflags::bitflags;

use crate::error::FramecastError;
use crate::frame::PixelFormat;

/// Identifies a framecast slot header region.
pub const SLOT_MAGIC: u32 = u32::from_le_bytes(*b"FCS1");

/// Current header layout version.
pub const LAYOUT_VERSION: u32 = 1;

/// Size of the header region. One page is plenty.
pub const HEADER_REGION_LEN: usize = 4096;

/// Number of pixel planes per data region (front + back).
pub const PLANE_COUNT: usize = 2;

bitflags! {
    /// Cross-process slot status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotFlags: u32 {
        /// A producer currently owns this slot.
        const PRODUCER_ATTACHED = 0b0001;
    }
}

// ── SlotHeader ───────────────────────────────────────────────────

/// Shared slot header, placed at offset 0 of the header region.
///
/// Field order is part of the cross-process contract; bump
/// [`LAYOUT_VERSION`] on any change.
#[repr(C)]
pub struct SlotHeader {
    magic: u32,
    layout_version: u32,
    width: AtomicU32,
    height: AtomicU32,
    format: AtomicU32,
    flags: AtomicU32,
    /// Seqlock word. Odd = publish in flight. Frame generation = `seq >> 1`.
    seq: AtomicU64,
    /// Mapping epoch, bumped on every resize. Consumers holding a data
    /// region for a stale epoch must re-map before reading.
    epoch: AtomicU64,
    /// Index of the plane holding the latest complete frame.
    front_plane: AtomicU32,
    producer_pid: AtomicU32,
    /// Microseconds since UNIX epoch of the producer's last publish.
    heartbeat_us: AtomicU64,
}

impl SlotHeader {
    /// Initialise a header in place for a freshly created slot.
    ///
    /// # Safety
    ///
    /// `ptr` must point at writable memory of at least
    /// `size_of::<SlotHeader>()` bytes, aligned for `SlotHeader`.
    pub unsafe fn init<'a>(
        ptr: *mut u8,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> &'a SlotHeader {
        let header = ptr as *mut SlotHeader;
        unsafe {
            (*header).magic = SLOT_MAGIC;
            (*header).layout_version = LAYOUT_VERSION;
            (*header).width = AtomicU32::new(width);
            (*header).height = AtomicU32::new(height);
            (*header).format = AtomicU32::new(format as u32);
            (*header).flags = AtomicU32::new(SlotFlags::PRODUCER_ATTACHED.bits());
            (*header).seq = AtomicU64::new(0);
            (*header).epoch = AtomicU64::new(1);
            (*header).front_plane = AtomicU32::new(0);
            (*header).producer_pid = AtomicU32::new(std::process::id());
            (*header).heartbeat_us = AtomicU64::new(now_us());
            &*header
        }
    }

    /// View an existing header, validating magic and layout version.
    ///
    /// # Safety
    ///
    /// `ptr` must point at readable memory of at least
    /// `size_of::<SlotHeader>()` bytes, aligned for `SlotHeader`, that lives
    /// as long as the returned reference is used.
    pub unsafe fn attach<'a>(ptr: *const u8) -> Result<&'a SlotHeader, FramecastError> {
        let header = unsafe { &*(ptr as *const SlotHeader) };
        if header.magic != SLOT_MAGIC {
            return Err(FramecastError::Backend(
                "slot region has invalid magic".into(),
            ));
        }
        if header.layout_version != LAYOUT_VERSION {
            return Err(FramecastError::UnknownVariant {
                type_name: "slot layout version",
                value: header.layout_version as u64,
            });
        }
        Ok(header)
    }

    // ── Dimensions ───────────────────────────────────────────────

    pub fn width(&self) -> u32 {
        self.width.load(Ordering::Acquire)
    }

    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    pub fn format(&self) -> Result<PixelFormat, FramecastError> {
        PixelFormat::try_from(self.format.load(Ordering::Acquire))
    }

    /// Store new dimensions. Producer-only; called during resize before the
    /// epoch bump so consumers never observe new dims under an old epoch.
    pub fn set_dimensions(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Release);
        self.height.store(height, Ordering::Release);
    }

    // ── Seqlock ──────────────────────────────────────────────────

    /// Frame generation counter: number of completed publishes (plus
    /// resizes, which also advance it).
    pub fn generation(&self) -> u64 {
        self.seq.load(Ordering::Acquire) >> 1
    }

    /// The plane index the producer should write into next. Only the
    /// producer swaps planes, so this is stable between publishes.
    pub fn back_plane(&self) -> u32 {
        1 - self.front_plane.load(Ordering::Acquire)
    }

    /// Enter the publish critical section. The caller must have finished
    /// writing the back plane already; the critical section only covers
    /// the swap.
    pub fn begin_publish(&self) {
        self.seq.fetch_add(1, Ordering::AcqRel);
    }

    /// Complete a publish: expose `new_front` and close the seqlock.
    pub fn end_publish(&self, new_front: u32) {
        self.front_plane.store(new_front, Ordering::Release);
        self.seq.fetch_add(1, Ordering::Release);
        self.heartbeat_us.store(now_us(), Ordering::Release);
    }

    /// The plane a consumer should read, or `None` while a swap is in
    /// flight. Returns `(seq, front_plane)`; the caller re-checks `seq`
    /// with [`read_valid`](Self::read_valid) after copying.
    pub fn read_enter(&self) -> Option<(u64, u32)> {
        let seq = self.seq.load(Ordering::Acquire);
        if seq & 1 == 1 {
            return None;
        }
        Some((seq, self.front_plane.load(Ordering::Acquire)))
    }

    /// True if no publish completed or started since `seq` was observed.
    pub fn read_valid(&self, seq: u64) -> bool {
        std::sync::atomic::fence(Ordering::Acquire);
        self.seq.load(Ordering::Acquire) == seq
    }

    // ── Epoch / liveness ─────────────────────────────────────────

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Bump the mapping epoch after a resize. Also advances the generation
    /// so pollers notice the change.
    pub fn bump_epoch(&self) -> u64 {
        self.seq.fetch_add(2, Ordering::AcqRel);
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn flags(&self) -> SlotFlags {
        SlotFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn set_producer_attached(&self, attached: bool) {
        let mut flags = self.flags();
        flags.set(SlotFlags::PRODUCER_ATTACHED, attached);
        self.flags.store(flags.bits(), Ordering::Release);
        if attached {
            self.producer_pid
                .store(std::process::id(), Ordering::Release);
        }
    }

    pub fn producer_pid(&self) -> u32 {
        self.producer_pid.load(Ordering::Acquire)
    }

    /// Microseconds since the producer last published.
    pub fn heartbeat_age_us(&self) -> u64 {
        now_us().saturating_sub(self.heartbeat_us.load(Ordering::Acquire))
    }
}

/// Byte length of one tightly packed pixel plane.
pub fn plane_len(width: u32, height: u32, format: PixelFormat) -> usize {
    width as usize * height as usize * format.bytes_per_pixel()
}

/// Byte length of a data region (both planes).
pub fn data_region_len(width: u32, height: u32, format: PixelFormat) -> usize {
    plane_len(width, height, format) * PLANE_COUNT
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_header(buf: &mut Vec<u64>) -> &'static SlotHeader {
        // u64 storage guarantees alignment.
        buf.resize(HEADER_REGION_LEN / 8, 0);
        unsafe { SlotHeader::init(buf.as_mut_ptr() as *mut u8, 64, 48, PixelFormat::Bgra8) }
    }

    #[test]
    fn init_and_attach() {
        let mut buf = Vec::new();
        let header = fresh_header(&mut buf);
        assert_eq!(header.width(), 64);
        assert_eq!(header.height(), 48);
        assert_eq!(header.format().unwrap(), PixelFormat::Bgra8);
        assert_eq!(header.generation(), 0);
        assert_eq!(header.epoch(), 1);
        assert!(header.flags().contains(SlotFlags::PRODUCER_ATTACHED));

        let again = unsafe { SlotHeader::attach(buf.as_ptr() as *const u8) }.unwrap();
        assert_eq!(again.width(), 64);
    }

    #[test]
    fn attach_rejects_bad_magic() {
        let buf = vec![0u64; HEADER_REGION_LEN / 8];
        assert!(unsafe { SlotHeader::attach(buf.as_ptr() as *const u8) }.is_err());
    }

    #[test]
    fn seqlock_publish_cycle() {
        let mut buf = Vec::new();
        let header = fresh_header(&mut buf);

        let back = header.back_plane();
        assert_eq!(back, 1);
        header.begin_publish();
        // Mid-publish: readers must bail out.
        assert!(header.read_enter().is_none());
        header.end_publish(back);

        assert_eq!(header.generation(), 1);
        let (seq, front) = header.read_enter().unwrap();
        assert_eq!(front, 1);
        assert!(header.read_valid(seq));

        // A publish between enter and validate invalidates the read.
        let back = header.back_plane();
        header.begin_publish();
        header.end_publish(back);
        assert!(!header.read_valid(seq));
    }

    #[test]
    fn resize_bumps_epoch_and_generation() {
        let mut buf = Vec::new();
        let header = fresh_header(&mut buf);
        let generation = header.generation();

        header.set_dimensions(128, 96);
        let epoch = header.bump_epoch();

        assert_eq!(epoch, 2);
        assert_eq!(header.epoch(), 2);
        assert_eq!(header.generation(), generation + 1);
        assert_eq!(header.width(), 128);
    }

    #[test]
    fn plane_sizes() {
        assert_eq!(plane_len(64, 48, PixelFormat::Bgra8), 64 * 48 * 4);
        assert_eq!(data_region_len(64, 48, PixelFormat::Rgb8), 64 * 48 * 3 * 2);
        assert!(std::mem::size_of::<SlotHeader>() <= HEADER_REGION_LEN);
    }
}
