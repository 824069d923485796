//! Memory-mapped files with exactly-once unmap.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
    sync::Arc,
};

use rawmem_common::{Result, error::Error, verify_arg};
use rawmem_page_alloc::file_map::FileMapping;

use crate::{flag::StepFlag, monitor};

/// A byte range of a file mapped into memory.
///
/// The first successful [`MappedFile::unmap`] invalidates the range for every view. The
/// pages stay mapped until the `MappedFile` is dropped with the last descriptor referring
/// to it, so an access already past its validity check keeps reading mapped memory.
pub struct MappedFile {
    mapping: FileMapping,
    path: PathBuf,
    file_offset: u64,
    capacity: u64,
    released: Arc<StepFlag>,
}

impl MappedFile {
    /// Maps `capacity` bytes of the file at `path` starting at `file_offset`.
    ///
    /// A read-only range must lie within the file. A writable mapping opens (or creates)
    /// the file for writing and extends it when the range reaches past its end.
    pub(crate) fn open(
        path: &Path,
        file_offset: u64,
        capacity: u64,
        writable: bool,
    ) -> Result<MappedFile> {
        verify_arg!(capacity, capacity > 0);
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        let file_len = file
            .metadata()
            .map_err(|e| Error::io(path.display().to_string(), e))?
            .len();

        let end = file_offset
            .checked_add(capacity)
            .ok_or_else(|| Error::out_of_range(file_offset, capacity, file_len))?;
        if end > file_len {
            if !writable {
                return Err(Error::out_of_range(file_offset, capacity, file_len));
            }
            file.set_len(end)
                .map_err(|e| Error::io(path.display().to_string(), e))?;
        }
        let len = usize::try_from(capacity)
            .map_err(|_| Error::out_of_range(file_offset, capacity, usize::MAX as u64))?;

        let mapping = FileMapping::map(&file, file_offset, len, writable).map_err(|e| {
            if e.kind() == std::io::ErrorKind::Unsupported {
                Error::invalid_operation("writable file mapping")
            } else {
                Error::io(path.display().to_string(), e)
            }
        })?;
        monitor::reserve_map(capacity);
        log::debug!(
            "mapped {} [{file_offset}, {end}) (writable: {writable})",
            path.display()
        );
        Ok(MappedFile {
            mapping,
            path: path.to_path_buf(),
            file_offset,
            capacity,
            released: Arc::new(StepFlag::new()),
        })
    }

    /// Invalidates the range and settles the monitoring counters. Only the first call, from
    /// any thread, does so; it returns `true`. The pages are unmapped on drop.
    pub(crate) fn unmap(&self) -> bool {
        if !self.released.step() {
            return false;
        }
        monitor::release_map(self.capacity);
        log::debug!("released mapping of {}", self.path.display());
        true
    }

    /// Writes modified pages back to the file.
    pub(crate) fn flush(&self) -> Result<()> {
        if self.released.is_stepped() {
            return Err(Error::invalid_resource("flush"));
        }
        self.mapping
            .flush()
            .map_err(|e| Error::io(self.path.display().to_string(), e))
    }

    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.mapping.as_ptr()
    }

    pub(crate) fn released_flag(&self) -> &Arc<StepFlag> {
        &self.released
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_writable(&self) -> bool {
        self.mapping.is_writable()
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        self.unmap();
        match self.mapping.unmap() {
            Ok(_) => log::debug!("unmapped {}", self.path.display()),
            Err(e) => log::warn!("failed to unmap {}: {e}", self.path.display()),
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedFile")
            .field("path", &self.path)
            .field("file_offset", &self.file_offset)
            .field("capacity", &self.capacity)
            .field("writable", &self.is_writable())
            .field("valid", &!self.released.is_stepped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_map_range_checks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 100]).unwrap();
        file.flush().unwrap();

        let mapped = MappedFile::open(file.path(), 10, 90, false).unwrap();
        assert_eq!(mapped.capacity(), 90);
        assert!(!mapped.is_writable());
        assert_eq!(unsafe { mapped.base_ptr().read() }, 1);
        assert!(mapped.unmap());
        assert!(!mapped.unmap());
        assert!(mapped.flush().unwrap_err().is_invalid_resource());
        // Released, but the pages stay mapped until the last owner drops.
        assert!(!mapped.base_ptr().is_null());
        assert_eq!(unsafe { mapped.base_ptr().add(89).read() }, 1);
        drop(mapped);

        let err = MappedFile::open(file.path(), 10, 91, false).unwrap_err();
        assert!(err.is_out_of_range());
        let err = MappedFile::open(file.path(), u64::MAX, 2, false).unwrap_err();
        assert!(err.is_out_of_range());
        assert!(MappedFile::open(file.path(), 0, 0, false).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = MappedFile::open(&dir.path().join("missing"), 0, 8, false).unwrap_err();
        match err.kind() {
            rawmem_common::error::ErrorKind::Io { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
