//! The two lock levels a topic segment uses (spec.md §5 locking hierarchy):
//!
//! 1. [`SegmentLock`]: an advisory whole-file `fcntl` byte-range lock.
//!    Shared while publishing or taking; exclusive while registering,
//!    unregistering, or growing the segment.
//! 2. [`RowLock`]: a compare-and-swap spinlock word living inside a single
//!    [`super::header::RefCell`], guarding that one ring slot's `Entry`
//!    row across all domain columns.
//!
//! Allocator-internal locking (level 3) is opaque to this module — it lives
//! behind the [`crate::allocator::Allocator`] trait.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{DomainMqError, Result};

/// Wrapper around the advisory whole-file `fcntl` lock guarding a topic
/// segment's file descriptor.
pub struct SegmentLock {
    fd: RawFd,
}

impl SegmentLock {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    /// Acquire a shared (read) lock, blocking until available. Held by
    /// publish and take.
    pub fn lock_shared(&self) -> Result<()> {
        self.set_lock(libc::F_RDLCK)
    }

    /// Acquire an exclusive (write) lock, blocking until available. Held by
    /// register, unregister, and grow.
    pub fn lock_exclusive(&self) -> Result<()> {
        self.set_lock(libc::F_WRLCK)
    }

    /// Release whichever lock is held.
    pub fn unlock(&self) -> Result<()> {
        self.set_lock(libc::F_UNLCK)
    }

    fn set_lock(&self, lock_type: i32) -> Result<()> {
        let mut fl: libc::flock = unsafe { std::mem::zeroed() };
        fl.l_type = lock_type as i16;
        fl.l_whence = libc::SEEK_SET as i16;
        fl.l_start = 0;
        fl.l_len = 0; // whole file

        let ret = unsafe { libc::fcntl(self.fd, libc::F_SETLKW, &mut fl) };
        if ret == -1 {
            return Err(DomainMqError::lock_failed(format!(
                "fcntl F_SETLKW failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

/// RAII guard releasing a [`SegmentLock`] on drop.
pub struct SegmentLockGuard<'a> {
    lock: &'a SegmentLock,
}

impl<'a> SegmentLockGuard<'a> {
    pub fn shared(lock: &'a SegmentLock) -> Result<Self> {
        lock.lock_shared()?;
        Ok(Self { lock })
    }

    pub fn exclusive(lock: &'a SegmentLock) -> Result<Self> {
        lock.lock_exclusive()?;
        Ok(Self { lock })
    }
}

impl Drop for SegmentLockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.unlock();
    }
}

const ROW_UNLOCKED: u32 = 0;
const ROW_LOCKED: u32 = 1;

/// A bounded-spin compare-and-swap lock over one ring slot's `RefCell::lock`
/// word. Not robust against a holder dying mid-critical-section — the
/// source this is ported from has the same gap and the spec records it as
/// an open question rather than a solved one.
pub struct RowLock<'a> {
    word: &'a AtomicU32,
}

impl<'a> RowLock<'a> {
    pub fn new(word: &'a AtomicU32) -> Self {
        Self { word }
    }

    /// Spin until the row is acquired.
    pub fn lock(&self) -> RowLockGuard<'_> {
        loop {
            if self
                .word
                .compare_exchange_weak(ROW_UNLOCKED, ROW_LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return RowLockGuard { word: self.word };
            }
            std::hint::spin_loop();
        }
    }
}

/// RAII guard releasing a [`RowLock`] on drop.
pub struct RowLockGuard<'a> {
    word: &'a AtomicU32,
}

impl Drop for RowLockGuard<'_> {
    fn drop(&mut self) {
        self.word.store(ROW_UNLOCKED, Ordering::Release);
    }
}
