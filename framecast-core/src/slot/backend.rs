//! Capability interface for OS-level shared slot storage.
//!
//! Publisher and subscriber logic never touch the platform directly; they go
//! through [`SlotBackend`], which exposes named, machine-wide shared regions
//! plus a producer liveness token. Swapping in a different backend (e.g. a
//! GPU shared-texture implementation) does not touch the rest of the crate.

use crate::error::FramecastError;

// ── SlotRegion ───────────────────────────────────────────────────

/// A mapped shared region. Unmapped on drop.
///
/// Implementations must keep the mapping valid and at a stable address for
/// the lifetime of the value.
pub trait SlotRegion: Send + Sync {
    /// Base address of the mapping.
    fn as_ptr(&self) -> *mut u8;

    /// Length of the mapping in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── ProducerLock ─────────────────────────────────────────────────

/// Liveness token held by a producer for the lifetime of a slot.
///
/// The token is released automatically when dropped *and* when the owning
/// process dies, which is what lets subscribers distinguish "producer is
/// quiet" from "producer is gone".
pub trait ProducerLock: Send + Sync {}

// ── SlotBackend ──────────────────────────────────────────────────

/// Named shared-region storage: `{open, map, resize, close}` plus liveness.
pub trait SlotBackend: Send + Sync {
    /// Create (or recreate) the named region with `len` bytes, zeroed, and
    /// map it read-write. Fails with `ResourceExhausted` when the OS refuses
    /// the allocation.
    fn open(&self, name: &str, len: usize) -> Result<Box<dyn SlotRegion>, FramecastError>;

    /// Map an existing named region read-write. Fails with `NotFound` when
    /// no such region exists.
    fn map(&self, name: &str) -> Result<Box<dyn SlotRegion>, FramecastError>;

    /// Replace the named region with a fresh zeroed allocation of `len`
    /// bytes. Existing mappings of the old allocation stay readable until
    /// their holders drop them.
    fn resize(&self, name: &str, len: usize) -> Result<Box<dyn SlotRegion>, FramecastError> {
        self.close(name)?;
        self.open(name, len)
    }

    /// Remove the name mapping. Idempotent; existing mappings survive.
    fn close(&self, name: &str) -> Result<(), FramecastError>;

    /// Whether a named region currently exists.
    fn exists(&self, name: &str) -> bool;

    /// Acquire the producer liveness token for `name`. Fails with
    /// `NameConflict` when another live producer already holds it.
    fn lock_producer(&self, name: &str) -> Result<Box<dyn ProducerLock>, FramecastError>;

    /// Whether some live process currently holds the producer token.
    fn producer_alive(&self, name: &str) -> bool;
}

/// Slot names become file / object names on the backend, so keep them to a
/// conservative character set.
pub fn validate_slot_name(name: &str) -> Result<(), FramecastError> {
    if name.is_empty() || name.len() > 128 {
        return Err(FramecastError::Backend(format!(
            "slot name must be 1..=128 chars, got {}",
            name.len()
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(FramecastError::Backend(format!(
            "slot name '{name}' contains characters outside [A-Za-z0-9._-]"
        )));
    }
    Ok(())
}
