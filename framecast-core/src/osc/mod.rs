//! Control-channel wire protocol.
//!
//! ## Sub-modules
//!
//! | Module    | Purpose                                             |
//! |-----------|-----------------------------------------------------|
//! | `message` | Typed control messages and arguments                |
//! | `codec`   | Big-endian datagram codec, bundle-aware             |
//! | `pattern` | `*`-wildcard address patterns for handler routing   |

pub mod codec;
pub mod message;
pub mod pattern;

pub use codec::{OscCodec, decode_message, decode_packet, encode_message};
pub use message::{ControlArg, ControlMessage};
pub use pattern::AddressPattern;
