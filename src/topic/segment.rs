//! Owns one topic's `shm_open`/`mmap`'d region and the growth/relayout
//! logic that keeps [`TopicHeader`], `RefCell`, and `Entry` rows consistent
//! when the segment is resized.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::constants::{DOMAINS_PER_TOPIC, SEGMENT_NAME_PREFIX};
use crate::domain::DomainId;
use crate::error::{DomainMqError, Result};
use crate::topic::header::{entry_offset, ref_cell_offset, segment_byte_size, Entry, RefCell, TopicHeader};
use crate::topic::locking::{SegmentLock, SegmentLockGuard};

/// One topic's shared-memory segment.
pub struct TopicSegment {
    file: File,
    shm_name: String,
    mmap_ptr: *mut u8,
    mmap_len: usize,
}

// SAFETY: the mapped region is `MAP_SHARED` memory meant to be touched from
// multiple threads/processes; all access here goes through the segment and
// row locks in `topic::locking`, same contract `flux`'s `SharedRingBuffer`
// documents for its own mmap pointer.
unsafe impl Send for TopicSegment {}
unsafe impl Sync for TopicSegment {}

impl TopicSegment {
    /// Translate a ROS-style topic name into the shared-memory object name
    /// backing its segment (slashes become periods, since `/dev/shm` has no
    /// subdirectories).
    pub fn shm_name_for(topic_name: &str) -> String {
        format!(
            "{}{}",
            SEGMENT_NAME_PREFIX,
            topic_name.trim_start_matches('/').replace('/', ".")
        )
    }

    /// Open the segment backing `topic_name`, creating and initializing it
    /// if this is the first endpoint to register. `initial_domain` becomes
    /// column 1 if it isn't CPU (column 0 is always CPU).
    pub fn create_or_open(topic_name: &str, initial_domain: DomainId, initial_len: usize) -> Result<Self> {
        let shm_name = Self::shm_name_for(topic_name);
        let c_name = CString::new(shm_name.clone())
            .map_err(|e| DomainMqError::topic_open(format!("invalid topic name: {e}")))?;

        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600) };
        if fd == -1 {
            return Err(DomainMqError::topic_open(format!(
                "shm_open({shm_name}) failed: {}",
                io::Error::last_os_error()
            )));
        }
        let file = unsafe { File::from_raw_fd(fd) };

        let lock = SegmentLock::new(file.as_raw_fd());
        let _guard = SegmentLockGuard::exclusive(&lock)?;
        Self::init_locked(file, shm_name, initial_domain, initial_len)
    }

    fn init_locked(file: File, shm_name: String, initial_domain: DomainId, initial_len: usize) -> Result<Self> {
        let existing_len = file
            .metadata()
            .map_err(|e| DomainMqError::topic_open(format!("fstat failed: {e}")))?
            .len() as usize;

        let initial_num_domains = if initial_domain.is_cpu() { 1 } else { 2 };

        let mmap_len = if existing_len == 0 {
            let size = segment_byte_size(initial_len, initial_num_domains);
            file.set_len(size as u64)
                .map_err(|e| DomainMqError::topic_open(format!("ftruncate failed: {e}")))?;
            size
        } else {
            existing_len
        };

        let mmap_ptr = Self::map(&file, mmap_len)?;

        let mut segment = Self {
            file,
            shm_name,
            mmap_ptr,
            mmap_len,
        };

        if existing_len == 0 {
            let header = segment.header_mut();
            header.index = AtomicU32::new(0);
            header.len = initial_len as u32;
            header.domains = [0u32; DOMAINS_PER_TOPIC];
            header.domains[0] = DomainId::CPU.as_u32();
            if !initial_domain.is_cpu() {
                header.domains[1] = initial_domain.as_u32();
            }
            header.num_domains = initial_num_domains as u32;
            header.pub_count = 0;
            header.sub_count = 0;
        }

        Ok(segment)
    }

    fn map(file: &File, len: usize) -> Result<*mut u8> {
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
            return Err(DomainMqError::topic_open(format!(
                "mmap failed: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(ptr as *mut u8)
    }

    /// A fresh [`SegmentLock`] handle over this segment's file descriptor.
    /// Cheap to construct; callers acquire/release through it as needed.
    pub fn lock(&self) -> SegmentLock {
        SegmentLock::new(self.file.as_raw_fd())
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    pub fn shm_name(&self) -> &str {
        &self.shm_name
    }

    pub fn header(&self) -> &TopicHeader {
        unsafe { &*(self.mmap_ptr as *const TopicHeader) }
    }

    pub fn header_mut(&mut self) -> &mut TopicHeader {
        unsafe { &mut *(self.mmap_ptr as *mut TopicHeader) }
    }

    pub fn ref_cell(&self, i: usize) -> &RefCell {
        unsafe { &*(self.mmap_ptr.add(ref_cell_offset(i)) as *const RefCell) }
    }

    pub fn entry(&self, domain: usize, i: usize) -> &Entry {
        let len = self.header().len as usize;
        unsafe { &*(self.mmap_ptr.add(entry_offset(len, domain, i)) as *const Entry) }
    }

    pub fn entry_mut(&mut self, domain: usize, i: usize) -> &mut Entry {
        let len = self.header().len as usize;
        unsafe { &mut *(self.mmap_ptr.add(entry_offset(len, domain, i)) as *mut Entry) }
    }

    /// Raw pointer to `ref_cell[i]`, for use by callers (the publish/take
    /// paths) that only hold the segment lock in shared mode and so cannot
    /// take a Rust `&mut TopicSegment`. Synchronization against other
    /// writers is the row lock, not the borrow checker.
    ///
    /// # Safety
    /// Caller must hold the row lock for `i` before writing through this
    /// pointer.
    pub fn ref_cell_ptr(&self, i: usize) -> *mut RefCell {
        unsafe { self.mmap_ptr.add(ref_cell_offset(i)) as *mut RefCell }
    }

    /// Raw pointer to `entry[domain][i]`. See [`Self::ref_cell_ptr`] for the
    /// locking contract.
    ///
    /// # Safety
    /// Caller must hold the row lock for `i` before writing through this
    /// pointer.
    pub fn entry_ptr(&self, domain: usize, i: usize) -> *mut Entry {
        let len = self.header().len as usize;
        unsafe { self.mmap_ptr.add(entry_offset(len, domain, i)) as *mut Entry }
    }

    /// Find which column `domain` occupies, if any.
    pub fn domain_column(&self, domain: DomainId) -> Option<usize> {
        let header = self.header();
        let num_domains = header.num_domains as usize;
        (0..num_domains).find(|&i| header.domains[i] == domain.as_u32())
    }

    /// Bind `domain` to a column, growing the segment if it's new or if
    /// `depth` exceeds the current ring length. Caller must hold the
    /// exclusive segment lock.
    pub fn bind_domain(&mut self, domain: DomainId, depth: usize) -> Result<usize> {
        if let Some(col) = self.domain_column(domain) {
            let current_len = self.header().len as usize;
            if depth > current_len {
                let num_domains = self.header().num_domains as usize;
                self.grow(depth, num_domains)?;
            }
            return Ok(col);
        }

        let num_domains = self.header().num_domains as usize;
        if num_domains >= DOMAINS_PER_TOPIC {
            return Err(DomainMqError::DomainCapacityExceeded { max: DOMAINS_PER_TOPIC });
        }

        let current_len = self.header().len as usize;
        let new_len = depth.max(current_len);
        let col = num_domains;
        self.grow(new_len, num_domains + 1)?;
        self.header_mut().domains[col] = domain.as_u32();
        Ok(col)
    }

    /// Resize the segment to `new_len` slots across `new_num_domains`
    /// columns, relocating every existing `RefCell`/`Entry` row to its new
    /// byte position. Growth only ever widens; shrink requests are no-ops.
    ///
    /// Caller must hold the exclusive segment lock — no publish/take may be
    /// in flight during a grow.
    pub fn grow(&mut self, new_len: usize, new_num_domains: usize) -> Result<()> {
        let (old_index, old_len, old_num_domains, old_domains, old_pub_count, old_sub_count) = {
            let h = self.header();
            (
                h.index.load(Ordering::Relaxed),
                h.len as usize,
                h.num_domains as usize,
                h.domains,
                h.pub_count,
                h.sub_count,
            )
        };

        if new_len < old_len || new_num_domains < old_num_domains {
            return Ok(());
        }
        if new_len == old_len && new_num_domains == old_num_domains {
            return Ok(());
        }

        let mut old_refcells = Vec::with_capacity(old_len);
        for i in 0..old_len {
            let rc = self.ref_cell(i);
            old_refcells.push((rc.interest_count, rc.availability, rc.lock.load(Ordering::Relaxed)));
        }
        let mut old_entries = vec![Entry::EMPTY; old_num_domains * old_len];
        for d in 0..old_num_domains {
            for i in 0..old_len {
                old_entries[d * old_len + i] = *self.entry(d, i);
            }
        }

        let new_size = segment_byte_size(new_len, new_num_domains);
        self.file
            .set_len(new_size as u64)
            .map_err(|e| DomainMqError::topic_open(format!("ftruncate for growth failed: {e}")))?;

        unsafe {
            libc::munmap(self.mmap_ptr as *mut _, self.mmap_len);
        }
        self.mmap_ptr = Self::map(&self.file, new_size)?;
        self.mmap_len = new_size;

        // The old byte layout's rows no longer line up with the new stride,
        // so the whole region is rebuilt from the snapshots above rather
        // than assumed to already hold valid data at its new offsets.
        unsafe {
            std::ptr::write_bytes(self.mmap_ptr, 0, new_size);
        }

        {
            let header = self.header_mut();
            header.index = AtomicU32::new(old_index);
            header.len = new_len as u32;
            header.num_domains = new_num_domains as u32;
            header.domains = old_domains;
            header.pub_count = old_pub_count;
            header.sub_count = old_sub_count;
        }

        for (i, (interest_count, availability, lock)) in old_refcells.into_iter().enumerate() {
            let rc = unsafe { &mut *(self.mmap_ptr.add(ref_cell_offset(i)) as *mut RefCell) };
            rc.interest_count = interest_count;
            rc.availability = availability;
            rc.lock = AtomicU32::new(lock);
        }
        for d in 0..old_num_domains {
            for i in 0..old_len {
                let entry = old_entries[d * old_len + i];
                let slot = unsafe { &mut *(self.mmap_ptr.add(entry_offset(new_len, d, i)) as *mut Entry) };
                *slot = entry;
            }
        }

        Ok(())
    }

    /// Unmap and `shm_unlink` the segment. Called once `pub_count` and
    /// `sub_count` both reach zero.
    pub fn destroy(self) -> Result<()> {
        let shm_name = self.shm_name.clone();
        drop(self); // runs Drop::drop, munmap's the region

        let c_name = CString::new(shm_name.clone())
            .map_err(|e| DomainMqError::topic_open(format!("invalid topic name: {e}")))?;
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if ret == -1 {
            return Err(DomainMqError::topic_open(format!(
                "shm_unlink({shm_name}) failed: {}",
                io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

impl Drop for TopicSegment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.mmap_ptr as *mut _, self.mmap_len);
        }
    }
}
