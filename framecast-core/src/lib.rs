//! # framecast-core
//!
//! Shared-memory frame publishing with a UDP control channel.
//!
//! This crate contains:
//! - **Frames**: `Frame` (borrowed, for publishing) and `FrameRef` (owned
//!   copy, handed to consumers)
//! - **Slots**: the shared-region layout, the pluggable `SlotBackend`,
//!   the POSIX `ShmBackend`, and the producer-side `SlotRing`
//! - **Publisher / Subscriber**: lock-free single-producer publishing and
//!   seqlock-validated consumer polling across process boundaries
//! - **Control channel**: OSC-style wire codec, `*`-wildcard address
//!   patterns, and the `ControlReceiver` UDP listener
//! - **Service**: the `Framecast` facade tying it all together
//! - **Error**: `FramecastError` — typed, `thiserror`-based error hierarchy

pub mod error;
pub mod frame;
pub mod osc;
pub mod publisher;
pub mod receiver;
pub mod service;
pub mod slot;
pub mod subscriber;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::{DecodeError, FramecastError};
pub use frame::{Frame, FrameRef, PixelFormat};
pub use osc::{AddressPattern, ControlArg, ControlMessage, OscCodec};
pub use publisher::Publisher;
pub use receiver::{ControlReceiver, ControlStats};
pub use service::{Framecast, FramecastConfig};
pub use slot::{ShmBackend, SlotBackend, SlotHandle, SlotRing};
pub use subscriber::{Subscriber, Subscription};
