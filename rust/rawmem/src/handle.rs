//! Owning handles for native allocations and file mappings.
//!
//! A handle is the only entity that releases its resource. Releasing, explicitly through
//! `close` or implicitly on drop, invalidates every view derived from the handle's view.

use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

use rawmem_common::{Result, error::Error};

use crate::{
    buffer::{Buffer, WritableBuffer},
    mapped::MappedFile,
    memory::{Memory, WritableMemory},
    native::NativeAllocation,
};

/// Owner of a native allocation and its writable view.
pub struct WritableHandle {
    memory: WritableMemory,
    alloc: Arc<NativeAllocation>,
}

impl WritableHandle {
    pub(crate) fn new(memory: WritableMemory, alloc: Arc<NativeAllocation>) -> WritableHandle {
        WritableHandle { memory, alloc }
    }

    pub fn memory(&self) -> &WritableMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut WritableMemory {
        &mut self.memory
    }

    /// Releases the native memory, invalidating every view. Returns `true` for the call that
    /// actually released it; later calls, and calls racing with another release, return
    /// `false`. The block goes back to the allocator once the last view is dropped.
    pub fn close(&self) -> bool {
        self.alloc.release()
    }

    /// Hands this handle to the request server of its view, which releases it after the
    /// client has moved to `replacement`.
    pub fn request_close(self, replacement: &WritableMemory) -> Result<()> {
        let server = self
            .memory
            .request_server()
            .cloned()
            .ok_or_else(|| Error::invalid_operation("request_close"))?;
        server.request_close(self, replacement);
        Ok(())
    }
}

impl Deref for WritableHandle {
    type Target = WritableMemory;

    fn deref(&self) -> &WritableMemory {
        &self.memory
    }
}

impl DerefMut for WritableHandle {
    fn deref_mut(&mut self) -> &mut WritableMemory {
        &mut self.memory
    }
}

impl Drop for WritableHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WritableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableHandle")
            .field("alloc", &self.alloc)
            .finish()
    }
}

/// Owner of a read-only file mapping and its view.
pub struct MapHandle {
    memory: Memory,
    file: Arc<MappedFile>,
}

impl MapHandle {
    pub(crate) fn new(memory: Memory, file: Arc<MappedFile>) -> MapHandle {
        MapHandle { memory, file }
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Positional view over the mapped range.
    pub fn buffer(&self) -> Result<Buffer> {
        self.memory.as_buffer()
    }

    /// Invalidates every view of the mapping. Returns `true` for the call that actually
    /// released it. The pages are unmapped once the last view is dropped.
    pub fn close(&self) -> bool {
        self.file.unmap()
    }
}

impl Deref for MapHandle {
    type Target = Memory;

    fn deref(&self) -> &Memory {
        &self.memory
    }
}

impl Drop for MapHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapHandle").field("file", &self.file).finish()
    }
}

/// Owner of a writable file mapping and its view.
pub struct WritableMapHandle {
    memory: WritableMemory,
    file: Arc<MappedFile>,
}

impl WritableMapHandle {
    pub(crate) fn new(memory: WritableMemory, file: Arc<MappedFile>) -> WritableMapHandle {
        WritableMapHandle { memory, file }
    }

    pub fn memory(&self) -> &WritableMemory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut WritableMemory {
        &mut self.memory
    }

    pub fn writable_buffer(&self) -> Result<WritableBuffer> {
        self.memory.as_writable_buffer()
    }

    /// Writes modified pages back to the file.
    pub fn force(&self) -> Result<()> {
        self.file.flush()
    }

    /// Invalidates every view of the mapping without an explicit flush. Returns `true` for
    /// the call that actually released it. The pages are unmapped once the last view is
    /// dropped.
    pub fn close(&self) -> bool {
        self.file.unmap()
    }
}

impl Deref for WritableMapHandle {
    type Target = WritableMemory;

    fn deref(&self) -> &WritableMemory {
        &self.memory
    }
}

impl DerefMut for WritableMapHandle {
    fn deref_mut(&mut self) -> &mut WritableMemory {
        &mut self.memory
    }
}

impl Drop for WritableMapHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for WritableMapHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WritableMapHandle")
            .field("file", &self.file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::{memory::WritableMemory, order::ByteOrder};

    #[test]
    fn test_drop_releases() {
        let handle = WritableMemory::allocate(32).unwrap();
        let region = handle.region(0, 16).unwrap();
        assert!(region.is_valid());
        drop(handle);
        assert!(!region.is_valid());
        assert!(region.get::<u8>(0).unwrap_err().is_invalid_resource());
    }

    #[test]
    fn test_early_return_releases() {
        fn fill_and_fail(len: u64) -> rawmem_common::Result<WritableMemory> {
            let mut handle = WritableMemory::allocate(len)?;
            handle.fill(0, len, 1)?;
            let view = handle.duplicate()?;
            handle.put::<u64>(len, 0)?;
            Ok(view)
        }
        assert!(fill_and_fail(8).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_map_handle_buffer() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&42u32.to_ne_bytes()).unwrap();
        file.write_all(&7u32.to_ne_bytes()).unwrap();
        file.flush().unwrap();

        let handle = crate::buffer::Buffer::map(file.path()).unwrap();
        assert!(handle.is_mapped());
        assert!(handle.is_direct());
        assert!(handle.is_resource_read_only());
        let mut buf = handle.buffer().unwrap();
        assert_eq!(buf.get::<u32>().unwrap(), 42);
        assert_eq!(buf.get::<u32>().unwrap(), 7);
        assert!(!buf.has_remaining());

        assert!(handle.close());
        assert!(!handle.close());
        assert!(!buf.is_valid());
        assert!(buf.get_at::<u32>(0).unwrap_err().is_invalid_resource());
    }

    #[cfg(any(unix, windows))]
    #[test]
    fn test_writable_map_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut handle = WritableMemory::map(&path, 16, 8, ByteOrder::BigEndian).unwrap();
        assert!(!handle.is_resource_read_only());
        handle.put::<u64>(0, 0x0102_0304_0506_0708).unwrap();
        handle.force().unwrap();
        assert!(handle.close());
        assert!(handle.force().unwrap_err().is_invalid_resource());

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 24);
        assert_eq!(&bytes[16..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
