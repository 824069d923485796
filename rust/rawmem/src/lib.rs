//! Bounds-checked raw memory over heap arrays, native allocations, mapped files and
//! external byte buffers.
//!
//! Callers obtain a view ([`Memory`], [`WritableMemory`], [`Buffer`], [`WritableBuffer`])
//! and address bytes by offset or cursor without knowing which resource backs them.
//! Native memory and mappings are owned by handles ([`WritableHandle`], [`MapHandle`],
//! [`WritableMapHandle`]); releasing a handle invalidates every view derived from it.

pub mod backing;
pub mod bounds;
pub mod buffer;
pub mod flag;
pub mod handle;
pub mod hex;
pub mod mapped;
pub mod memory;
pub mod monitor;
pub mod native;
pub mod order;
pub mod platform;
pub mod request;
pub mod resource;
pub mod utf8;
pub mod xxhash64;

pub use backing::{HeapElement, Prim};
pub use buffer::{Buffer, WritableBuffer};
pub use handle::{MapHandle, WritableHandle, WritableMapHandle};
pub use memory::{Memory, WritableMemory};
pub use monitor::{
    current_direct_allocated, current_direct_allocations, current_map_allocated,
    current_map_allocations,
};
pub use order::{ByteOrder, Primitive};
pub use platform::{
    AllocationOptions, HeapAllocator, NativeAllocator, PageAllocator, PlatformInfo,
    SystemPlatform,
};
pub use rawmem_common::{Result, error::Error, error::ErrorKind};
pub use request::{DefaultMemoryRequestServer, MemoryRequestServer};
pub use resource::ResourceState;
