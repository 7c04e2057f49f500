//! Domain-specific error types for framecast.
//!
//! All fallible operations return `Result<T, FramecastError>`.
//! Setup-time failures (`open`, `attach`, `start`) propagate to the caller;
//! per-packet and per-frame failures are absorbed locally with counters and
//! log events, never by crashing a loop.

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// The canonical error type for framecast.
#[derive(Debug, Error)]
pub enum FramecastError {
    // ── Slot Errors ──────────────────────────────────────────────
    /// The slot table is full or the OS refused the backing allocation.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A live producer already owns this slot name in an incompatible way.
    #[error("name conflict on slot '{name}': {reason}")]
    NameConflict { name: String, reason: &'static str },

    /// No live producer has registered this slot name.
    #[error("no live producer for slot '{0}'")]
    NotFound(String),

    /// The slot was reallocated; the consumer must re-map before reading.
    #[error("slot invalidated: mapped epoch {mapped}, current epoch {current}")]
    SlotInvalidated { mapped: u64, current: u64 },

    // ── Publisher Errors ─────────────────────────────────────────
    /// Too many consecutive frames were dropped by the publisher.
    #[error("publisher degraded: {consecutive} consecutive dropped frames")]
    PublisherDegraded { consecutive: u32 },

    /// A frame payload does not match its declared dimensions/format.
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),

    // ── Control Channel Errors ───────────────────────────────────
    /// The requested bind address is already taken.
    #[error("address in use: {0}")]
    AddressInUse(SocketAddr),

    /// The receiver is already listening; stop it first.
    #[error("receiver is already listening")]
    AlreadyListening,

    /// An address pattern could not be compiled.
    #[error("invalid address pattern: {0}")]
    InvalidPattern(String),

    /// A control packet failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    // ── Generic Errors ───────────────────────────────────────────
    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The OS I/O layer reported an error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// The slot backend reported an error.
    #[error("backend error: {0}")]
    Backend(String),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for FramecastError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        FramecastError::ChannelClosed
    }
}

// ── DecodeError ──────────────────────────────────────────────────

/// Typed error for the control-message wire codec.
///
/// Every variant is a per-packet condition: the receiver logs it, bumps a
/// counter, and drops the datagram. None of these crash the listener.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the structure it promised.
    #[error("truncated packet: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// A character in the type-tag string is not a known argument type.
    #[error("invalid type tag '{tag}'")]
    InvalidTypeTag { tag: char },

    /// The address string ran to the end of the packet without a NUL.
    #[error("address not null-terminated")]
    AddressNotNullTerminated,

    /// The address does not start with '/'.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// A string argument is not valid UTF-8.
    #[error("invalid utf-8 in string argument")]
    InvalidUtf8,

    /// A bundle element is malformed.
    #[error("malformed bundle: {0}")]
    InvalidBundle(&'static str),

    /// A blob argument declared a negative length.
    #[error("invalid blob length {0}")]
    InvalidBlobLength(i32),

    /// Well-formed content followed by leftover bytes.
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}
