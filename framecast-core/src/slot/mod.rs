//! Named, cross-process shared slots.
//!
//! | Module    | Purpose                                              |
//! |-----------|------------------------------------------------------|
//! | `layout`  | `repr(C)` slot header, seqlock, epoch, liveness bits |
//! | `backend` | Capability trait over named OS shared regions        |
//! | `shm_unix`| POSIX mmap + flock backend                           |
//! | `ring`    | Producer-side fixed-capacity slot table              |

pub mod backend;
pub mod layout;
pub mod ring;
pub mod shm_unix;

pub use backend::{ProducerLock, SlotBackend, SlotRegion};
pub use layout::{SlotFlags, SlotHeader};
pub use ring::{SlotHandle, SlotRing};
pub use shm_unix::{ShmBackend, default_namespace_dir};
