//! Producer-side slot table.
//!
//! A [`SlotRing`] owns a fixed-capacity set of named slots for the
//! publishing process: it creates the shared header and data regions,
//! holds the producer liveness token, reallocates data regions on resize,
//! and tears everything down on close. Consumers never go through the ring;
//! they attach via [`Subscriber`](crate::subscriber::Subscriber).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::FramecastError;
use crate::frame::PixelFormat;
use crate::slot::backend::{ProducerLock, SlotBackend, SlotRegion, validate_slot_name};
use crate::slot::layout::{HEADER_REGION_LEN, SlotHeader, data_region_len, plane_len};

/// Largest accepted frame edge, in pixels.
pub const MAX_DIMENSION: u32 = 16384;

/// Shared-region name of the data region for `slot` at `epoch`.
pub(crate) fn data_region_name(slot: &str, epoch: u64) -> String {
    format!("{slot}.data.{epoch}")
}

// ── SlotRing ─────────────────────────────────────────────────────

/// Fixed-capacity table of published slots.
pub struct SlotRing {
    backend: Arc<dyn SlotBackend>,
    capacity: usize,
    slots: Mutex<HashMap<String, Arc<SlotShared>>>,
}

/// Producer-side state for one open slot.
pub(crate) struct SlotShared {
    pub(crate) name: String,
    header_region: Box<dyn SlotRegion>,
    pub(crate) data: Mutex<DataPlanes>,
    /// Taken (released) on close so liveness ends even if stale handles
    /// linger.
    lock: Mutex<Option<Box<dyn ProducerLock>>>,
    closed: AtomicBool,
}

/// The mapped data region for the slot's current epoch.
pub(crate) struct DataPlanes {
    pub(crate) region: Box<dyn SlotRegion>,
    pub(crate) epoch: u64,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: PixelFormat,
    pub(crate) plane_len: usize,
}

impl SlotShared {
    pub(crate) fn header(&self) -> &SlotHeader {
        // SAFETY: the region was initialised with a valid SlotHeader at
        // open and stays mapped for as long as `self` lives.
        unsafe { &*(self.header_region.as_ptr() as *const SlotHeader) }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cloneable handle to a published slot.
#[derive(Clone)]
pub struct SlotHandle {
    pub(crate) shared: Arc<SlotShared>,
}

impl SlotHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn width(&self) -> u32 {
        self.shared.header().width()
    }

    pub fn height(&self) -> u32 {
        self.shared.header().height()
    }

    pub fn format(&self) -> Result<PixelFormat, FramecastError> {
        self.shared.header().format()
    }

    /// Number of completed publishes (and resizes) on this slot.
    pub fn generation(&self) -> u64 {
        self.shared.header().generation()
    }
}

impl SlotRing {
    /// A ring over `backend` holding at most `capacity` open slots.
    pub fn new(backend: Arc<dyn SlotBackend>, capacity: usize) -> Self {
        Self {
            backend,
            capacity,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Create a named slot and become its producer.
    ///
    /// Fails with `NameConflict` when another live producer already owns the
    /// name, and with `ResourceExhausted` when the ring is full or the OS
    /// refuses the backing allocation. Leftover regions from a dead producer
    /// are reclaimed.
    pub fn open(
        &self,
        name: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<SlotHandle, FramecastError> {
        validate_slot_name(name)?;
        validate_dimensions(width, height)?;

        let mut slots = self.slots.lock().expect("slot table poisoned");
        if slots.contains_key(name) {
            return Err(FramecastError::NameConflict {
                name: name.to_string(),
                reason: "slot already open in this process",
            });
        }
        if slots.len() >= self.capacity {
            return Err(FramecastError::ResourceExhausted(format!(
                "slot ring full ({} slots)",
                self.capacity
            )));
        }

        // Liveness token first: this is what enforces the single-producer
        // invariant machine-wide.
        let lock = self.backend.lock_producer(name)?;

        let header_region = self.backend.open(name, HEADER_REGION_LEN)?;
        // SAFETY: freshly created region of HEADER_REGION_LEN zeroed bytes.
        unsafe { SlotHeader::init(header_region.as_ptr(), width, height, format) };

        let epoch = 1;
        let data_region = self
            .backend
            .open(&data_region_name(name, epoch), data_region_len(width, height, format))?;

        debug!(slot = name, width, height, "slot opened");

        let shared = Arc::new(SlotShared {
            name: name.to_string(),
            header_region,
            data: Mutex::new(DataPlanes {
                region: data_region,
                epoch,
                width,
                height,
                format,
                plane_len: plane_len(width, height, format),
            }),
            lock: Mutex::new(Some(lock)),
            closed: AtomicBool::new(false),
        });
        slots.insert(name.to_string(), Arc::clone(&shared));
        Ok(SlotHandle { shared })
    }

    /// Reallocate the slot's backing planes for new dimensions.
    ///
    /// Bumps the mapping epoch: consumers holding the old mapping get
    /// `SlotInvalidated` until they re-map. The old region's name is
    /// released; mappings already held stay readable.
    pub fn resize(
        &self,
        handle: &SlotHandle,
        width: u32,
        height: u32,
    ) -> Result<(), FramecastError> {
        validate_dimensions(width, height)?;
        let shared = &handle.shared;
        if shared.is_closed() {
            return Err(FramecastError::NotFound(shared.name.clone()));
        }

        let mut data = shared.data.lock().expect("slot data poisoned");
        if data.width == width && data.height == height {
            return Ok(());
        }

        let format = data.format;
        let new_epoch = data.epoch + 1;
        let new_region = self.backend.open(
            &data_region_name(&shared.name, new_epoch),
            data_region_len(width, height, format),
        )?;

        let header = shared.header();
        header.set_dimensions(width, height);
        header.bump_epoch();

        let old_epoch = data.epoch;
        *data = DataPlanes {
            region: new_region,
            epoch: new_epoch,
            width,
            height,
            format,
            plane_len: plane_len(width, height, format),
        };
        drop(data);

        self.backend
            .close(&data_region_name(&shared.name, old_epoch))?;
        debug!(slot = %shared.name, width, height, epoch = new_epoch, "slot resized");
        Ok(())
    }

    /// Release the slot: drop the liveness token and remove the name
    /// mappings. Idempotent.
    pub fn close(&self, handle: &SlotHandle) -> Result<(), FramecastError> {
        let shared = &handle.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        shared.header().set_producer_attached(false);

        let epoch = {
            let data = shared.data.lock().expect("slot data poisoned");
            data.epoch
        };
        self.backend
            .close(&data_region_name(&shared.name, epoch))?;
        self.backend.close(&shared.name)?;

        // Release the flock before the handle itself goes away.
        shared.lock.lock().expect("lock poisoned").take();

        self.slots
            .lock()
            .expect("slot table poisoned")
            .remove(&shared.name);
        debug!(slot = %shared.name, "slot closed");
        Ok(())
    }

    /// Close every open slot.
    pub fn close_all(&self) -> Result<(), FramecastError> {
        let handles: Vec<SlotHandle> = {
            let slots = self.slots.lock().expect("slot table poisoned");
            slots
                .values()
                .map(|shared| SlotHandle {
                    shared: Arc::clone(shared),
                })
                .collect()
        };
        for handle in handles {
            self.close(&handle)?;
        }
        Ok(())
    }

    /// Handle for an already-open slot, if any.
    pub fn get(&self, name: &str) -> Option<SlotHandle> {
        self.slots
            .lock()
            .expect("slot table poisoned")
            .get(name)
            .map(|shared| SlotHandle {
                shared: Arc::clone(shared),
            })
    }

    pub fn len(&self) -> usize {
        self.slots.lock().expect("slot table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn validate_dimensions(width: u32, height: u32) -> Result<(), FramecastError> {
    if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(FramecastError::InvalidFrame(
            "dimensions must be 1..=16384 on both axes",
        ));
    }
    Ok(())
}
