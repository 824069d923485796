//! Platform capabilities consumed by native allocation, and the options that select them.

use std::{alloc::Layout, ptr::NonNull, sync::Arc};

use rawmem_page_alloc::mmap;

use crate::{
    order::ByteOrder,
    request::{DefaultMemoryRequestServer, MemoryRequestServer},
};

/// Source of native (off-heap) memory blocks.
pub trait NativeAllocator: Send + Sync + 'static {
    /// Allocates a block of `size` bytes, `size > 0`.
    fn allocate(&self, size: usize) -> std::io::Result<NonNull<u8>>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` and `size` must come from a previous successful [`NativeAllocator::allocate`]
    /// call on the same allocator, and the block must not have been freed already.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);
}

/// Facts about the host platform that affect native allocation.
pub trait PlatformInfo: Send + Sync + 'static {
    fn native_byte_order(&self) -> ByteOrder {
        ByteOrder::native()
    }

    fn page_size(&self) -> usize;

    /// Whether native allocations must start on a page boundary.
    fn is_page_aligned(&self) -> bool;
}

/// The host platform as reported by the OS.
#[derive(Debug, Clone, Default)]
pub struct SystemPlatform {
    page_aligned: bool,
}

impl SystemPlatform {
    pub fn new() -> SystemPlatform {
        SystemPlatform::default()
    }

    /// Host platform that requires page-aligned native allocations.
    pub fn page_aligned() -> SystemPlatform {
        SystemPlatform { page_aligned: true }
    }
}

impl PlatformInfo for SystemPlatform {
    fn page_size(&self) -> usize {
        mmap::get_page_size()
    }

    fn is_page_aligned(&self) -> bool {
        self.page_aligned
    }
}

/// Zero-filled blocks from the global allocator, aligned to 8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapAllocator;

impl HeapAllocator {
    const ALIGNMENT: usize = 8;

    fn layout(size: usize) -> std::io::Result<Layout> {
        Layout::from_size_align(size, Self::ALIGNMENT)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
    }
}

impl NativeAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> std::io::Result<NonNull<u8>> {
        let layout = Self::layout(size.max(1))?;
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        NonNull::new(ptr).ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Ok(layout) = Self::layout(size.max(1)) {
            unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) };
        }
    }
}

/// Anonymous page mappings from the OS. Suited for large blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageAllocator;

impl NativeAllocator for PageAllocator {
    fn allocate(&self, size: usize) -> std::io::Result<NonNull<u8>> {
        let (ptr, _) = mmap::allocate(size)?;
        NonNull::new(ptr as *mut u8)
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        let capacity = size.max(1).next_multiple_of(mmap::get_page_size());
        if let Err(e) = unsafe { mmap::free(ptr.as_ptr() as _, capacity) } {
            log::warn!("failed to free {capacity} bytes of pages: {e}");
        }
    }
}

/// Configuration of a native allocation.
///
/// ```
/// use rawmem::{AllocationOptions, ByteOrder, PageAllocator, SystemPlatform};
///
/// let options = AllocationOptions::new()
///     .with_allocator(PageAllocator)
///     .with_platform(SystemPlatform::page_aligned())
///     .with_byte_order(ByteOrder::BigEndian);
/// assert_eq!(options.byte_order(), ByteOrder::BigEndian);
/// ```
#[derive(Clone)]
pub struct AllocationOptions {
    allocator: Arc<dyn NativeAllocator>,
    platform: Arc<dyn PlatformInfo>,
    byte_order: ByteOrder,
    request_server: Option<Arc<dyn MemoryRequestServer>>,
}

impl AllocationOptions {
    pub fn new() -> AllocationOptions {
        AllocationOptions::default()
    }

    pub fn with_allocator(mut self, allocator: impl NativeAllocator) -> Self {
        self.allocator = Arc::new(allocator);
        self
    }

    pub fn with_shared_allocator(mut self, allocator: Arc<dyn NativeAllocator>) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_platform(mut self, platform: impl PlatformInfo) -> Self {
        self.platform = Arc::new(platform);
        self
    }

    pub fn with_shared_platform(mut self, platform: Arc<dyn PlatformInfo>) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Sets the growth hook carried by the allocated view; `None` removes it.
    pub fn with_request_server(mut self, server: Option<Arc<dyn MemoryRequestServer>>) -> Self {
        self.request_server = server;
        self
    }

    pub fn allocator(&self) -> &Arc<dyn NativeAllocator> {
        &self.allocator
    }

    pub fn platform(&self) -> &Arc<dyn PlatformInfo> {
        &self.platform
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn request_server(&self) -> Option<&Arc<dyn MemoryRequestServer>> {
        self.request_server.as_ref()
    }
}

impl Default for AllocationOptions {
    fn default() -> Self {
        let platform = SystemPlatform::new();
        AllocationOptions {
            allocator: Arc::new(HeapAllocator),
            byte_order: platform.native_byte_order(),
            platform: Arc::new(platform),
            request_server: Some(Arc::new(DefaultMemoryRequestServer::new())),
        }
    }
}

impl std::fmt::Debug for AllocationOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationOptions")
            .field("page_size", &self.platform.page_size())
            .field("page_aligned", &self.platform.is_page_aligned())
            .field("byte_order", &self.byte_order)
            .field("request_server", &self.request_server.is_some())
            .finish()
    }
}
