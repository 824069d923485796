//! Growth hook for writable native memory.
//!
//! A view never grows its own resource. A client that runs out of room asks the view's
//! [`MemoryRequestServer`] for a new, larger allocation, migrates its data, and then hands
//! the superseded handle back through [`MemoryRequestServer::request_close`].

use std::sync::Arc;

use rawmem_common::Result;

use crate::{
    handle::WritableHandle,
    memory::WritableMemory,
    platform::{AllocationOptions, HeapAllocator, NativeAllocator, PlatformInfo, SystemPlatform},
};

pub trait MemoryRequestServer: Send + Sync + 'static {
    /// Provides a new writable resource of at least `capacity` bytes for a client
    /// currently working in `current`. Data is not copied.
    fn request(&self, current: &WritableMemory, capacity: u64) -> Result<WritableHandle>;

    /// Releases `previous` once the client has moved to `replacement`.
    fn request_close(&self, previous: WritableHandle, replacement: &WritableMemory);
}

/// Serves requests with fresh native allocations in the byte order of the requesting
/// view. The new view carries the same request server as the requesting one.
pub struct DefaultMemoryRequestServer {
    allocator: Arc<dyn NativeAllocator>,
    platform: Arc<dyn PlatformInfo>,
}

impl DefaultMemoryRequestServer {
    pub fn new() -> DefaultMemoryRequestServer {
        DefaultMemoryRequestServer {
            allocator: Arc::new(HeapAllocator),
            platform: Arc::new(SystemPlatform::new()),
        }
    }

    pub fn with_allocator(
        allocator: Arc<dyn NativeAllocator>,
        platform: Arc<dyn PlatformInfo>,
    ) -> DefaultMemoryRequestServer {
        DefaultMemoryRequestServer {
            allocator,
            platform,
        }
    }
}

impl Default for DefaultMemoryRequestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRequestServer for DefaultMemoryRequestServer {
    fn request(&self, current: &WritableMemory, capacity: u64) -> Result<WritableHandle> {
        let options = AllocationOptions::new()
            .with_shared_allocator(self.allocator.clone())
            .with_shared_platform(self.platform.clone())
            .with_byte_order(current.byte_order())
            .with_request_server(current.request_server().cloned());
        WritableMemory::allocate_with(capacity, &options)
    }

    fn request_close(&self, previous: WritableHandle, _replacement: &WritableMemory) {
        previous.close();
    }
}

#[cfg(test)]
mod tests {
    use crate::{memory::WritableMemory, order::ByteOrder, platform::AllocationOptions};

    #[test]
    fn test_default_server_grows() {
        let options = AllocationOptions::new().with_byte_order(ByteOrder::BigEndian);
        let mut handle = WritableMemory::allocate_with(16, &options).unwrap();
        handle.put::<u64>(0, 42).unwrap();
        let old_region = handle.region(0, 8).unwrap();

        let mut bigger = handle.request_capacity(64).unwrap();
        assert_eq!(bigger.capacity(), 64);
        assert_eq!(bigger.byte_order(), ByteOrder::BigEndian);
        assert!(bigger.request_server().is_some());

        handle.copy_to(0, &mut bigger, 0, 16).unwrap();
        assert_eq!(bigger.get::<u64>(0).unwrap(), 42);

        handle.request_close(&bigger).unwrap();
        assert!(!old_region.is_valid());
        assert!(bigger.is_valid());
    }

    #[test]
    fn test_no_server() {
        let options = AllocationOptions::new().with_request_server(None);
        let handle = WritableMemory::allocate_with(8, &options).unwrap();
        assert!(handle.request_capacity(16).is_err());

        let mut heap = WritableMemory::wrap(vec![0u8; 8]);
        assert!(heap.request_capacity(16).is_err());
        heap.put::<u8>(0, 1).unwrap();
    }
}
