//! Owned view of a byte range of a file.
//!
//! The OS requires mapping offsets aligned to the allocation granularity, so a
//! [`FileMapping`] maps from the aligned-down offset and remembers the distance to the
//! requested start. [`FileMapping::as_ptr`] always points at the requested start.
//!
//! # Safety
//!
//! `FileMapping` is `Send` and `Sync`. [`FileMapping::unmap`] may be called from any
//! holder and takes effect exactly once; callers that hand out the raw pointer are
//! responsible for not dereferencing it after unmapping.

use std::{
    ffi::c_void,
    fs::File,
    ptr,
    sync::atomic::{AtomicPtr, Ordering},
};

use crate::mmap;

pub struct FileMapping {
    /// Base of the OS view (aligned down), or null once unmapped.
    view: AtomicPtr<c_void>,
    /// Length of the OS view in bytes, `delta + len`.
    view_len: usize,
    /// Distance from the view base to the requested file offset.
    delta: usize,
    /// Requested length.
    len: usize,
    writable: bool,
}

impl FileMapping {
    /// Maps `len` bytes of `file` starting at `offset`.
    ///
    /// The range must lie within the file; the caller checks it against the file length.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty range, otherwise the OS error from the mapping call.
    pub fn map(file: &File, offset: u64, len: usize, writable: bool) -> std::io::Result<Self> {
        if len == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "cannot map an empty range",
            ));
        }
        let granularity = mmap::get_allocation_granularity() as u64;
        let aligned = offset - offset % granularity;
        let delta = (offset - aligned) as usize;
        let view_len = delta.checked_add(len).ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "mapping length overflow")
        })?;
        let view = mmap::map_file(file, aligned, view_len, writable)?;
        log::debug!("mapped {len} bytes at file offset {offset} (writable: {writable})");
        Ok(FileMapping {
            view: AtomicPtr::new(view),
            view_len,
            delta,
            len,
            writable,
        })
    }

    /// Pointer to the first requested byte, or null once unmapped.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        let view = self.view.load(Ordering::Acquire);
        if view.is_null() {
            view as *mut u8
        } else {
            unsafe { (view as *mut u8).add(self.delta) }
        }
    }

    /// Requested length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        !self.view.load(Ordering::Acquire).is_null()
    }

    /// Writes modified pages back to the file.
    pub fn flush(&self) -> std::io::Result<()> {
        let view = self.view.load(Ordering::Acquire);
        if view.is_null() {
            return Err(std::io::Error::other("file mapping has been released"));
        }
        unsafe { mmap::flush_file(view, self.view_len) }
    }

    /// Removes the view. Returns `Ok(true)` for the call that actually unmapped and
    /// `Ok(false)` for every later call.
    pub fn unmap(&self) -> std::io::Result<bool> {
        let view = self.view.swap(ptr::null_mut(), Ordering::AcqRel);
        if view.is_null() {
            return Ok(false);
        }
        unsafe { mmap::unmap_file(view, self.view_len)? };
        log::debug!("unmapped {} bytes", self.len);
        Ok(true)
    }
}

impl Drop for FileMapping {
    fn drop(&mut self) {
        if let Err(e) = self.unmap() {
            log::warn!("failed to unmap {} bytes: {e}", self.len);
        }
    }
}

impl std::fmt::Debug for FileMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMapping")
            .field("ptr", &self.as_ptr())
            .field("len", &self.len)
            .field("writable", &self.writable)
            .finish()
    }
}

unsafe impl Send for FileMapping {}
unsafe impl Sync for FileMapping {}
