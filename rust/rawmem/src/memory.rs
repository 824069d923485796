//! Offset-addressed views.
//!
//! [`Memory`] is a read-only view and [`WritableMemory`] a writable one. Every access
//! takes an explicit byte offset relative to the start of the view. A writable view
//! dereferences to a read-only one; there is no way back.

use std::{
    cmp::Ordering,
    ops::Deref,
    path::Path,
    sync::{Arc, OnceLock},
};

use bytes::{Bytes, BytesMut};
use rawmem_common::{Result, error::Error, verify_arg};

use crate::{
    backing::{ExternalBuffer, HeapElement},
    buffer::{Buffer, WritableBuffer},
    handle::{MapHandle, WritableHandle, WritableMapHandle},
    mapped::MappedFile,
    native::NativeAllocation,
    order::{ByteOrder, Primitive},
    platform::AllocationOptions,
    request::MemoryRequestServer,
    resource::ResourceState,
};

/// Read-only, offset-addressed view of a resource.
///
/// Cloning a `Memory` shares its descriptor: the clone is the same view.
#[derive(Clone)]
pub struct Memory {
    pub(crate) state: Arc<ResourceState>,
}

impl Memory {
    pub(crate) fn from_state(state: ResourceState) -> Memory {
        Memory {
            state: Arc::new(state),
        }
    }

    /// The shared capacity-zero view for `byte_order`. One exists per byte order.
    fn empty(byte_order: ByteOrder) -> Memory {
        static LITTLE: OnceLock<Arc<ResourceState>> = OnceLock::new();
        static BIG: OnceLock<Arc<ResourceState>> = OnceLock::new();
        let cell = match byte_order {
            ByteOrder::LittleEndian => &LITTLE,
            ByteOrder::BigEndian => &BIG,
        };
        let state = cell.get_or_init(|| {
            let mut state = ResourceState::heap(Arc::new(u8::into_heap_array(Vec::new())));
            state.set_byte_order(byte_order);
            Arc::new(state)
        });
        Memory {
            state: state.clone(),
        }
    }

    fn heap<T: HeapElement>(values: Vec<T>, byte_order: ByteOrder) -> Memory {
        if values.is_empty() {
            return Memory::empty(byte_order);
        }
        let mut state = ResourceState::heap(Arc::new(T::into_heap_array(values)));
        state.set_byte_order(byte_order);
        Memory::from_state(state)
    }

    /// Read-only view over a primitive array, in native byte order.
    ///
    /// All empty arrays wrapped with the same byte order share one capacity-zero view. That
    /// view is shared with [`WritableMemory::wrap`], so it reports
    /// `is_resource_read_only() == false`; with no bytes to address, it accepts no writes
    /// either way.
    pub fn wrap<T: HeapElement>(values: Vec<T>) -> Memory {
        Memory::wrap_with_order(values, ByteOrder::native())
    }

    /// Read-only view over a primitive array in `byte_order`. Empty arrays get the shared
    /// capacity-zero view for `byte_order`; see [`Memory::wrap`].
    pub fn wrap_with_order<T: HeapElement>(values: Vec<T>, byte_order: ByteOrder) -> Memory {
        let mem = Memory::heap(values, byte_order);
        if mem.capacity() > 0 {
            mem.state.set_read_only();
        }
        mem
    }

    /// Read-only view over `[offset, offset + length)` of a byte array.
    pub fn wrap_range(
        values: Vec<u8>,
        offset: u64,
        length: u64,
        byte_order: ByteOrder,
    ) -> Result<Memory> {
        let mem = Memory::heap(values, byte_order);
        let state = mem.state.region(offset, length, true)?;
        Ok(Memory::from_state(state))
    }

    /// Read-only view over an external buffer.
    pub fn wrap_external(bytes: Bytes, byte_order: ByteOrder) -> Memory {
        let mut state = ResourceState::external(Arc::new(ExternalBuffer::shared(bytes)));
        state.set_byte_order(byte_order);
        Memory::from_state(state)
    }

    /// Maps the whole file at `path` read-only, in native byte order.
    pub fn map(path: impl AsRef<Path>) -> Result<MapHandle> {
        let path = path.as_ref();
        let len = std::fs::metadata(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?
            .len();
        Memory::map_range(path, 0, len, ByteOrder::native())
    }

    /// Maps `capacity` bytes of the file at `path`, starting at `file_offset`, read-only.
    pub fn map_range(
        path: impl AsRef<Path>,
        file_offset: u64,
        capacity: u64,
        byte_order: ByteOrder,
    ) -> Result<MapHandle> {
        let file = Arc::new(MappedFile::open(path.as_ref(), file_offset, capacity, false)?);
        let mut state = ResourceState::mapped(file.clone());
        state.set_byte_order(byte_order);
        Ok(MapHandle::new(Memory::from_state(state), file))
    }

    /// Read-only view over `[offset, offset + length)` of this view, sharing validity.
    pub fn region(&self, offset: u64, length: u64) -> Result<Memory> {
        self.region_with_order(offset, length, self.byte_order())
    }

    pub fn region_with_order(
        &self,
        offset: u64,
        length: u64,
        byte_order: ByteOrder,
    ) -> Result<Memory> {
        let mut state = self.state.region(offset, length, false)?;
        state.set_byte_order(byte_order);
        Ok(Memory::from_state(state))
    }

    /// A new view over the same range with its own descriptor.
    pub fn duplicate(&self) -> Result<Memory> {
        self.region(0, self.capacity())
    }

    /// Positional view over the same descriptor.
    pub fn as_buffer(&self) -> Result<Buffer> {
        self.state.check_valid()?;
        Ok(Buffer::new(self.clone()))
    }

    #[inline]
    pub fn get<T: Primitive>(&self, offset: u64) -> Result<T> {
        self.state.read(offset)
    }

    /// Fills `dst` with consecutive values starting at `offset`.
    pub fn get_array<T: Primitive>(&self, offset: u64, dst: &mut [T]) -> Result<()> {
        self.state.read_array(offset, dst)
    }

    #[inline]
    pub fn get_bool(&self, offset: u64) -> Result<bool> {
        Ok(self.state.read::<u8>(offset)? != 0)
    }

    pub fn get_bool_array(&self, offset: u64, dst: &mut [bool]) -> Result<()> {
        self.state.check_valid_and_bounds(offset, dst.len() as u64)?;
        let src = self.state.address(offset) as *const u8;
        for (i, v) in dst.iter_mut().enumerate() {
            *v = unsafe { src.add(i).read() } != 0;
        }
        Ok(())
    }

    /// Lexicographic comparison of `[this_offset, this_offset + this_length)` of this view
    /// with `[that_offset, that_offset + that_length)` of `that`.
    ///
    /// Bytes compare as unsigned; when one range is a prefix of the other, the shorter
    /// range orders first.
    pub fn compare_to(
        &self,
        this_offset: u64,
        this_length: u64,
        that: &Memory,
        that_offset: u64,
        that_length: u64,
    ) -> Result<Ordering> {
        self.state.check_valid_and_bounds(this_offset, this_length)?;
        that.state.check_valid_and_bounds(that_offset, that_length)?;
        if self.state.is_same_resource(&that.state) && this_offset == that_offset {
            return Ok(this_length.cmp(&that_length));
        }
        let (this, that) = unsafe {
            (
                std::slice::from_raw_parts(self.state.address(this_offset), this_length as usize),
                std::slice::from_raw_parts(that.state.address(that_offset), that_length as usize),
            )
        };
        Ok(this.cmp(that))
    }

    /// Copies `length` bytes starting at `src_offset` into `dst` at `dst_offset`.
    ///
    /// Overlapping ranges of the same resource are handled.
    pub fn copy_to(
        &self,
        src_offset: u64,
        dst: &mut WritableMemory,
        dst_offset: u64,
        length: u64,
    ) -> Result<()> {
        self.state.check_valid_and_bounds(src_offset, length)?;
        dst.state.check_valid_and_bounds(dst_offset, length)?;
        if self.state.is_same_resource(&dst.state) && src_offset == dst_offset {
            return Ok(());
        }
        unsafe {
            std::ptr::copy(
                self.state.address(src_offset),
                dst.state.address(dst_offset),
                length as usize,
            );
        }
        Ok(())
    }

    /// Returns `true` if every bit of `mask` is set in the byte at `offset`.
    pub fn is_all_bits_set(&self, offset: u64, mask: u8) -> Result<bool> {
        Ok(self.get::<u8>(offset)? & mask == mask)
    }

    /// Returns `true` if any bit of `mask` is set in the byte at `offset`.
    pub fn is_any_bits_set(&self, offset: u64, mask: u8) -> Result<bool> {
        Ok(self.get::<u8>(offset)? & mask != 0)
    }

    /// Returns `true` if every bit of `mask` is clear in the byte at `offset`.
    pub fn is_all_bits_clear(&self, offset: u64, mask: u8) -> Result<bool> {
        Ok(!self.get::<u8>(offset)? & mask == mask)
    }

    /// Returns `true` if any bit of `mask` is clear in the byte at `offset`.
    pub fn is_any_bits_clear(&self, offset: u64, mask: u8) -> Result<bool> {
        Ok(!self.get::<u8>(offset)? & mask != 0)
    }

    pub fn check_valid_and_bounds(&self, offset: u64, length: u64) -> Result<()> {
        self.state.check_valid_and_bounds(offset, length)
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.state.capacity()
    }

    /// Cumulative offset of the byte at `offset`: an absolute address for off-heap
    /// resources, an offset into the array storage for heap arrays.
    #[inline]
    pub fn cumulative_offset(&self, offset: u64) -> u64 {
        self.state.cumulative_offset() + offset
    }

    /// Offset of this view from the start of the underlying resource.
    #[inline]
    pub fn region_offset(&self) -> u64 {
        self.state.region_offset()
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.state.byte_order()
    }

    /// Returns `true` if values are byte-swapped relative to the native order.
    #[inline]
    pub fn swap_bytes(&self) -> bool {
        self.state.swap_required()
    }

    pub fn is_byte_order_compatible(&self, byte_order: ByteOrder) -> bool {
        self.byte_order() == byte_order
    }

    pub fn has_array(&self) -> bool {
        self.state.backing().is_heap()
    }

    pub fn has_external_buffer(&self) -> bool {
        self.state.backing().external().is_some()
    }

    /// Returns `true` for native memory and mapped files.
    pub fn is_direct(&self) -> bool {
        matches!(
            self.state.backing(),
            crate::backing::Backing::Native(_) | crate::backing::Backing::Mapped(_)
        )
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.state.backing(), crate::backing::Backing::Mapped(_))
    }

    pub fn is_resource_read_only(&self) -> bool {
        self.state.is_read_only()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    /// Returns `true` only if `that` is this very view (shares its descriptor).
    ///
    /// Views derived independently over identical ranges are not the same resource.
    pub fn is_same_resource(&self, that: &Memory) -> bool {
        Arc::ptr_eq(&self.state, &that.state)
    }

    pub fn request_server(&self) -> Option<&Arc<dyn MemoryRequestServer>> {
        self.state.request_server()
    }

    pub fn resource_state(&self) -> &ResourceState {
        &self.state
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Memory").field(&self.state).finish()
    }
}

/// Writable, offset-addressed view of a resource.
pub struct WritableMemory {
    mem: Memory,
}

impl WritableMemory {
    pub(crate) fn from_state(state: ResourceState) -> WritableMemory {
        WritableMemory {
            mem: Memory::from_state(state),
        }
    }

    pub(crate) fn from_memory(mem: Memory) -> WritableMemory {
        WritableMemory { mem }
    }

    pub(crate) fn into_memory(self) -> Memory {
        self.mem
    }

    /// Writable view over a primitive array, in native byte order. Empty arrays get the
    /// shared capacity-zero view described on [`Memory::wrap`].
    pub fn wrap<T: HeapElement>(values: Vec<T>) -> WritableMemory {
        WritableMemory::wrap_with_order(values, ByteOrder::native())
    }

    pub fn wrap_with_order<T: HeapElement>(
        values: Vec<T>,
        byte_order: ByteOrder,
    ) -> WritableMemory {
        WritableMemory::from_memory(Memory::heap(values, byte_order))
    }

    /// Writable view over `[offset, offset + length)` of a byte array.
    pub fn wrap_range(
        values: Vec<u8>,
        offset: u64,
        length: u64,
        byte_order: ByteOrder,
    ) -> Result<WritableMemory> {
        let mem = Memory::heap(values, byte_order);
        let state = mem.state.region(offset, length, false)?;
        Ok(WritableMemory::from_state(state))
    }

    /// Writable view over an external buffer.
    pub fn wrap_external(bytes: BytesMut, byte_order: ByteOrder) -> WritableMemory {
        let mut state = ResourceState::external(Arc::new(ExternalBuffer::unique(bytes)));
        state.set_byte_order(byte_order);
        WritableMemory::from_state(state)
    }

    /// Allocates `capacity` bytes of native memory with default options.
    pub fn allocate(capacity: u64) -> Result<WritableHandle> {
        WritableMemory::allocate_with(capacity, &AllocationOptions::default())
    }

    /// Allocates `capacity` bytes of native memory.
    ///
    /// The returned handle owns the allocation: closing or dropping it releases the
    /// memory and invalidates every view derived from it.
    pub fn allocate_with(capacity: u64, options: &AllocationOptions) -> Result<WritableHandle> {
        let alloc = Arc::new(NativeAllocation::allocate(capacity, options)?);
        let mut state = ResourceState::native(alloc.clone());
        state.set_byte_order(options.byte_order());
        state.set_request_server(options.request_server().cloned());
        Ok(WritableHandle::new(WritableMemory::from_state(state), alloc))
    }

    /// Maps `capacity` bytes of the file at `path`, starting at `file_offset`, for
    /// writing. The file is created or extended as needed.
    pub fn map(
        path: impl AsRef<Path>,
        file_offset: u64,
        capacity: u64,
        byte_order: ByteOrder,
    ) -> Result<WritableMapHandle> {
        let file = Arc::new(MappedFile::open(path.as_ref(), file_offset, capacity, true)?);
        let mut state = ResourceState::mapped(file.clone());
        state.set_byte_order(byte_order);
        Ok(WritableMapHandle::new(WritableMemory::from_state(state), file))
    }

    /// Writable view over `[offset, offset + length)` of this view, sharing validity.
    ///
    /// The returned view aliases the same bytes as `self`, and both can be sent to other
    /// threads. Accesses are not synchronized: writes through one view racing with reads
    /// or writes of the same bytes through another view are a data race. Callers that
    /// share writable views across threads must serialize such accesses themselves.
    pub fn region(&self, offset: u64, length: u64) -> Result<WritableMemory> {
        self.region_with_order(offset, length, self.byte_order())
    }

    pub fn region_with_order(
        &self,
        offset: u64,
        length: u64,
        byte_order: ByteOrder,
    ) -> Result<WritableMemory> {
        Ok(WritableMemory::from_memory(self.mem.region_with_order(
            offset, length, byte_order,
        )?))
    }

    /// Writable view over the whole range of this view.
    ///
    /// Aliases the same bytes as `self`; the synchronization contract of
    /// [`WritableMemory::region`] applies.
    pub fn duplicate(&self) -> Result<WritableMemory> {
        self.region(0, self.capacity())
    }

    /// Read-only view over the same range with its own, read-only descriptor.
    pub fn as_read_only(&self) -> Result<Memory> {
        let state = self.state.region(0, self.capacity(), true)?;
        Ok(Memory::from_state(state))
    }

    /// Writable positional view over the same descriptor.
    pub fn as_writable_buffer(&self) -> Result<WritableBuffer> {
        self.state.check_valid()?;
        Ok(WritableBuffer::from_memory(self.mem.clone()))
    }

    #[inline]
    pub fn put<T: Primitive>(&mut self, offset: u64, value: T) -> Result<()> {
        self.state.write(offset, value)
    }

    pub fn put_array<T: Primitive>(&mut self, offset: u64, src: &[T]) -> Result<()> {
        self.state.write_array(offset, src)
    }

    #[inline]
    pub fn put_bool(&mut self, offset: u64, value: bool) -> Result<()> {
        self.state.write(offset, value as u8)
    }

    pub fn put_bool_array(&mut self, offset: u64, src: &[bool]) -> Result<()> {
        self.state.write_array::<u8>(offset, bytemuck::cast_slice(src))
    }

    /// Sets `length` bytes starting at `offset` to `value`.
    pub fn fill(&mut self, offset: u64, length: u64, value: u8) -> Result<()> {
        self.state.check_valid_and_bounds(offset, length)?;
        unsafe { std::ptr::write_bytes(self.state.address(offset), value, length as usize) };
        Ok(())
    }

    /// Zeroes the whole view.
    pub fn clear(&mut self) -> Result<()> {
        self.fill(0, self.capacity(), 0)
    }

    pub fn clear_range(&mut self, offset: u64, length: u64) -> Result<()> {
        self.fill(offset, length, 0)
    }

    /// Sets the bits of `mask` in the byte at `offset`.
    pub fn set_bits(&mut self, offset: u64, mask: u8) -> Result<()> {
        let value = self.get::<u8>(offset)?;
        self.put(offset, value | mask)
    }

    /// Clears the bits of `mask` in the byte at `offset`.
    pub fn clear_bits(&mut self, offset: u64, mask: u8) -> Result<()> {
        let value = self.get::<u8>(offset)?;
        self.put(offset, value & !mask)
    }

    /// Asks the request server carried by this view for a new resource of at least
    /// `capacity` bytes.
    pub fn request_capacity(&self, capacity: u64) -> Result<WritableHandle> {
        self.state.check_valid()?;
        let server = self
            .request_server()
            .ok_or_else(|| Error::invalid_operation("request_capacity"))?;
        verify_arg!(capacity, capacity > 0);
        server.request(self, capacity)
    }
}

impl Deref for WritableMemory {
    type Target = Memory;

    fn deref(&self) -> &Memory {
        &self.mem
    }
}

impl std::fmt::Debug for WritableMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WritableMemory").field(&self.mem.state).finish()
    }
}
