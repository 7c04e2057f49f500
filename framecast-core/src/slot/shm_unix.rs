//! POSIX shared-memory backend.
//!
//! Regions are plain files in a namespace directory (`/dev/shm/framecast`
//! where available, otherwise under the system temp dir), mapped with
//! `MAP_SHARED` so every process sees the same bytes. The producer liveness
//! token is an exclusive `flock` on a sidecar lock file: the kernel drops the
//! lock when the owning process dies, however it dies.
//!
//! # Platform
//!
//! This module is **unix-only**. On other platforms the type is still
//! defined but construction fails at runtime.

use std::path::PathBuf;

use crate::error::FramecastError;
use crate::slot::backend::{ProducerLock, SlotBackend, SlotRegion, validate_slot_name};

/// File-backed mmap shared-region backend.
pub struct ShmBackend {
    dir: PathBuf,
}

/// Default namespace directory for slot regions on this machine.
pub fn default_namespace_dir() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm.join("framecast")
    } else {
        std::env::temp_dir().join("framecast")
    }
}

// ── Unix implementation ──────────────────────────────────────────

#[cfg(unix)]
mod platform {
    use super::*;
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::AsRawFd;
    use std::path::Path;

    /// A `MAP_SHARED` file mapping. Unmapped on drop.
    pub struct MmapRegion {
        ptr: *mut u8,
        len: usize,
    }

    // SAFETY: the mapping address is stable and all concurrent access goes
    // through atomics in the slot header or seqlock-validated plane copies.
    unsafe impl Send for MmapRegion {}
    unsafe impl Sync for MmapRegion {}

    impl MmapRegion {
        fn map(file: &File, len: usize) -> Result<Self, FramecastError> {
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                return Err(FramecastError::ResourceExhausted(format!(
                    "mmap of {len} bytes failed: {}",
                    io::Error::last_os_error()
                )));
            }
            Ok(Self {
                ptr: ptr as *mut u8,
                len,
            })
        }
    }

    impl Drop for MmapRegion {
        fn drop(&mut self) {
            // SAFETY: ptr and len were valid when created.
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.len);
            }
        }
    }

    impl SlotRegion for MmapRegion {
        fn as_ptr(&self) -> *mut u8 {
            self.ptr
        }

        fn len(&self) -> usize {
            self.len
        }
    }

    /// Exclusive `flock` held for the producer's lifetime.
    pub struct FlockToken {
        _file: File,
    }

    impl ProducerLock for FlockToken {}

    fn try_flock_exclusive(file: &File) -> Result<bool, FramecastError> {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        Err(FramecastError::Io(err))
    }

    impl ShmBackend {
        /// Open (creating if needed) the backend rooted at `dir`.
        pub fn new(dir: impl Into<PathBuf>) -> Result<Self, FramecastError> {
            let dir = dir.into();
            std::fs::create_dir_all(&dir)?;
            Ok(Self { dir })
        }

        fn region_path(&self, name: &str) -> PathBuf {
            self.dir.join(name)
        }

        fn lock_path(&self, name: &str) -> PathBuf {
            self.dir.join(format!("{name}.lock"))
        }

        fn open_lock_file(path: &Path) -> Result<File, FramecastError> {
            Ok(OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?)
        }
    }

    impl SlotBackend for ShmBackend {
        fn open(&self, name: &str, len: usize) -> Result<Box<dyn SlotRegion>, FramecastError> {
            validate_slot_name(name)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(self.region_path(name))?;
            file.set_len(len as u64).map_err(|e| {
                FramecastError::ResourceExhausted(format!("allocating {len} bytes: {e}"))
            })?;
            Ok(Box::new(MmapRegion::map(&file, len)?))
        }

        fn map(&self, name: &str) -> Result<Box<dyn SlotRegion>, FramecastError> {
            validate_slot_name(name)?;
            let path = self.region_path(name);
            let file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(FramecastError::NotFound(name.to_string()));
                }
                Err(e) => return Err(e.into()),
            };
            let len = file.metadata()?.len() as usize;
            if len == 0 {
                return Err(FramecastError::NotFound(name.to_string()));
            }
            Ok(Box::new(MmapRegion::map(&file, len)?))
        }

        fn close(&self, name: &str) -> Result<(), FramecastError> {
            validate_slot_name(name)?;
            match std::fs::remove_file(self.region_path(name)) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }

        fn exists(&self, name: &str) -> bool {
            self.region_path(name).exists()
        }

        fn lock_producer(&self, name: &str) -> Result<Box<dyn ProducerLock>, FramecastError> {
            validate_slot_name(name)?;
            let file = Self::open_lock_file(&self.lock_path(name))?;
            if try_flock_exclusive(&file)? {
                Ok(Box::new(FlockToken { _file: file }))
            } else {
                Err(FramecastError::NameConflict {
                    name: name.to_string(),
                    reason: "another live producer holds this slot",
                })
            }
        }

        fn producer_alive(&self, name: &str) -> bool {
            let path = self.lock_path(name);
            if !path.exists() {
                return false;
            }
            let Ok(file) = Self::open_lock_file(&path) else {
                return false;
            };
            match try_flock_exclusive(&file) {
                // We got the lock: nobody holds it. Dropping `file`
                // releases it again.
                Ok(true) => false,
                Ok(false) => true,
                Err(_) => false,
            }
        }
    }
}

// ── Non-unix stub ────────────────────────────────────────────────

#[cfg(not(unix))]
impl ShmBackend {
    /// File-backed shared memory with `flock` liveness is only available
    /// on unix.
    pub fn new(_dir: impl Into<PathBuf>) -> Result<Self, FramecastError> {
        Err(FramecastError::Backend(
            "the shared-memory slot backend is only available on unix".into(),
        ))
    }
}

// `new` never succeeds off unix, so none of these can be reached; they
// exist so callers compile unchanged on every platform.
#[cfg(not(unix))]
impl SlotBackend for ShmBackend {
    fn open(&self, _name: &str, _len: usize) -> Result<Box<dyn SlotRegion>, FramecastError> {
        unreachable!("ShmBackend cannot be constructed off unix")
    }

    fn map(&self, _name: &str) -> Result<Box<dyn SlotRegion>, FramecastError> {
        unreachable!("ShmBackend cannot be constructed off unix")
    }

    fn close(&self, _name: &str) -> Result<(), FramecastError> {
        unreachable!("ShmBackend cannot be constructed off unix")
    }

    fn exists(&self, _name: &str) -> bool {
        unreachable!("ShmBackend cannot be constructed off unix")
    }

    fn lock_producer(&self, _name: &str) -> Result<Box<dyn ProducerLock>, FramecastError> {
        unreachable!("ShmBackend cannot be constructed off unix")
    }

    fn producer_alive(&self, _name: &str) -> bool {
        unreachable!("ShmBackend cannot be constructed off unix")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, ShmBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = ShmBackend::new(dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn open_map_close_cycle() {
        let (_dir, backend) = backend();

        let region = backend.open("feed", 8192).unwrap();
        assert_eq!(region.len(), 8192);

        // Writes through one mapping are visible through another.
        unsafe { *region.as_ptr() = 0xAB };
        let view = backend.map("feed").unwrap();
        assert_eq!(unsafe { *view.as_ptr() }, 0xAB);

        backend.close("feed").unwrap();
        assert!(!backend.exists("feed"));
        assert!(matches!(
            backend.map("feed"),
            Err(FramecastError::NotFound(_))
        ));

        // close is idempotent.
        backend.close("feed").unwrap();
    }

    #[test]
    fn map_missing_region_is_not_found() {
        let (_dir, backend) = backend();
        assert!(matches!(
            backend.map("ghost"),
            Err(FramecastError::NotFound(_))
        ));
    }

    #[test]
    fn producer_lock_conflicts_and_releases() {
        let (_dir, backend) = backend();

        assert!(!backend.producer_alive("feed"));
        let token = backend.lock_producer("feed").unwrap();
        assert!(backend.producer_alive("feed"));

        assert!(matches!(
            backend.lock_producer("feed"),
            Err(FramecastError::NameConflict { .. })
        ));

        drop(token);
        assert!(!backend.producer_alive("feed"));
        // Reacquire after release.
        let _token = backend.lock_producer("feed").unwrap();
    }

    #[test]
    fn resize_replaces_allocation() {
        let (_dir, backend) = backend();
        let old = backend.open("feed", 4096).unwrap();
        unsafe { *old.as_ptr() = 7 };

        let new = backend.resize("feed", 16384).unwrap();
        assert_eq!(new.len(), 16384);
        // Fresh allocation is zeroed; the old mapping stays readable.
        assert_eq!(unsafe { *new.as_ptr() }, 0);
        assert_eq!(unsafe { *old.as_ptr() }, 7);
    }

    #[test]
    fn rejects_bad_names() {
        let (_dir, backend) = backend();
        assert!(backend.open("../escape", 64).is_err());
    }
}
