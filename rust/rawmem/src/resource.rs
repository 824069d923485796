//! The resource descriptor: addressing, validity and byte order of one view.
//!
//! Every view holds an `Arc<ResourceState>`. The descriptor is immutable once built;
//! deriving a region or a duplicate builds a new descriptor that shares the backing owner
//! and the validity flag of its parent.
//!
//! Addressing follows a single formula for all resource kinds:
//!
//! ```text
//! cumulative_offset = region_offset + (on_heap ? heap_header : native_base_address)
//! address(offset)   = cumulative_offset + offset
//! ```
//!
//! For heap arrays the result is relative to the array storage; for native, mapped and
//! external resources it is an absolute address.

use std::{fmt, sync::Arc};

use rawmem_common::{Result, error::Error};

use crate::{
    backing::{Backing, ExternalBuffer, HeapArray},
    bounds::{assert_bounds, check_bounds},
    flag::StepFlag,
    mapped::MappedFile,
    native::NativeAllocation,
    order::{ByteOrder, Primitive},
    request::MemoryRequestServer,
};

pub struct ResourceState {
    backing: Backing,
    /// Native base address, `0` for heap arrays.
    native_base_address: u64,
    /// Offset of the first element inside the heap backing object.
    heap_header: u64,
    region_offset: u64,
    capacity: u64,
    cumulative_offset: u64,
    released: Arc<StepFlag>,
    read_only: StepFlag,
    byte_order: ByteOrder,
    swap_required: bool,
    request_server: Option<Arc<dyn MemoryRequestServer>>,
}

impl ResourceState {
    fn new(backing: Backing, capacity: u64, released: Arc<StepFlag>) -> ResourceState {
        let native_base_address = if backing.is_heap() {
            0
        } else {
            backing.provenance().addr() as u64
        };
        let mut state = ResourceState {
            backing,
            native_base_address,
            heap_header: 0,
            region_offset: 0,
            capacity,
            cumulative_offset: 0,
            released,
            read_only: StepFlag::new(),
            byte_order: ByteOrder::native(),
            swap_required: false,
            request_server: None,
        };
        state.compute();
        state
    }

    pub(crate) fn heap(array: Arc<HeapArray>) -> ResourceState {
        let capacity = array.byte_len() as u64;
        ResourceState::new(Backing::Heap(array), capacity, Arc::new(StepFlag::new()))
    }

    pub(crate) fn native(alloc: Arc<NativeAllocation>) -> ResourceState {
        let capacity = alloc.capacity();
        let released = alloc.released_flag().clone();
        ResourceState::new(Backing::Native(alloc), capacity, released)
    }

    pub(crate) fn mapped(file: Arc<MappedFile>) -> ResourceState {
        let capacity = file.capacity();
        let released = file.released_flag().clone();
        let state = ResourceState::new(Backing::Mapped(file.clone()), capacity, released);
        if !file.is_writable() {
            state.set_read_only();
        }
        state
    }

    pub(crate) fn external(buf: Arc<ExternalBuffer>) -> ResourceState {
        let capacity = buf.len() as u64;
        let read_only = buf.is_read_only();
        let state = ResourceState::new(Backing::External(buf), capacity, Arc::new(StepFlag::new()));
        if read_only {
            state.set_read_only();
        }
        state
    }

    /// Recomputes the cumulative offset from its three inputs.
    fn compute(&mut self) {
        let base = if self.backing.is_heap() {
            self.heap_header
        } else {
            self.native_base_address
        };
        self.cumulative_offset = self.region_offset + base;
    }

    pub(crate) fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
        self.swap_required = !byte_order.is_native();
    }

    pub(crate) fn set_request_server(&mut self, server: Option<Arc<dyn MemoryRequestServer>>) {
        self.request_server = server;
    }

    /// Marks the descriptor read-only. The transition cannot be undone.
    pub(crate) fn set_read_only(&self) {
        self.read_only.step();
    }

    /// New descriptor over `[offset, offset + length)` of this one, sharing validity
    /// and ownership.
    pub(crate) fn region(&self, offset: u64, length: u64, read_only: bool) -> Result<ResourceState> {
        self.check_valid_and_bounds(offset, length)?;
        let mut state = ResourceState {
            backing: self.backing.clone(),
            native_base_address: self.native_base_address,
            heap_header: self.heap_header,
            region_offset: self.region_offset + offset,
            capacity: length,
            cumulative_offset: 0,
            released: self.released.clone(),
            read_only: if read_only || self.is_read_only() {
                StepFlag::stepped()
            } else {
                StepFlag::new()
            },
            byte_order: self.byte_order,
            swap_required: self.swap_required,
            request_server: self.request_server.clone(),
        };
        state.compute();
        Ok(state)
    }

    /// Same-resource identity: same cumulative offset and capacity over the same heap
    /// array or external buffer.
    pub fn is_same_resource(&self, other: &ResourceState) -> bool {
        fn same<T>(a: Option<&Arc<T>>, b: Option<&Arc<T>>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                _ => false,
            }
        }
        self.cumulative_offset == other.cumulative_offset
            && self.capacity == other.capacity
            && same(self.backing.heap(), other.backing.heap())
            && same(self.backing.external(), other.backing.external())
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !self.released.is_stepped()
    }

    #[inline]
    pub fn check_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::invalid_resource(self.backing.kind_name()))
        }
    }

    /// Validity plus checked bounds, for bulk operations.
    #[inline]
    pub fn check_valid_and_bounds(&self, offset: u64, length: u64) -> Result<()> {
        self.check_valid()?;
        check_bounds(offset, length, self.capacity)
    }

    /// Validity plus assumed bounds, for single-primitive access.
    #[inline(always)]
    fn assert_valid_and_bounds(&self, offset: u64, length: u64) -> Result<()> {
        self.check_valid()?;
        assert_bounds(offset, length, self.capacity)
    }

    /// Address of the byte at `offset`. The caller has checked validity and bounds.
    #[inline]
    pub(crate) fn address(&self, offset: u64) -> *mut u8 {
        let base = self.backing.provenance();
        let cumulative = (self.cumulative_offset + offset) as usize;
        match self.backing {
            Backing::Heap(_) => base.wrapping_add(cumulative),
            _ => base.with_addr(cumulative),
        }
    }

    #[inline]
    pub(crate) fn read<T: Primitive>(&self, offset: u64) -> Result<T> {
        self.assert_valid_and_bounds(offset, T::SIZE as u64)?;
        let value = unsafe { (self.address(offset) as *const T).read_unaligned() };
        Ok(value.from_order(self.swap_required))
    }

    #[inline]
    pub(crate) fn write<T: Primitive>(&self, offset: u64, value: T) -> Result<()> {
        self.assert_valid_and_bounds(offset, T::SIZE as u64)?;
        let value = value.from_order(self.swap_required);
        unsafe { (self.address(offset) as *mut T).write_unaligned(value) };
        Ok(())
    }

    /// Copies `dst.len()` elements starting at `offset` into `dst`.
    pub(crate) fn read_array<T: Primitive>(&self, offset: u64, dst: &mut [T]) -> Result<()> {
        let len = crate::bounds::byte_len(offset, dst.len(), T::SIZE, self.capacity)?;
        self.check_valid_and_bounds(offset, len)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.address(offset),
                dst.as_mut_ptr() as *mut u8,
                len as usize,
            );
        }
        if self.swap_required && T::SIZE > 1 {
            dst.iter_mut().for_each(|v| *v = v.swap());
        }
        Ok(())
    }

    /// Copies `src` to the resource starting at `offset`.
    pub(crate) fn write_array<T: Primitive>(&self, offset: u64, src: &[T]) -> Result<()> {
        let len = crate::bounds::byte_len(offset, src.len(), T::SIZE, self.capacity)?;
        self.check_valid_and_bounds(offset, len)?;
        if self.swap_required && T::SIZE > 1 {
            let dst = self.address(offset) as *mut T;
            for (i, v) in src.iter().enumerate() {
                unsafe { dst.add(i).write_unaligned(v.swap()) };
            }
        } else {
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr() as *const u8,
                    self.address(offset),
                    len as usize,
                );
            }
        }
        Ok(())
    }

    #[inline]
    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn cumulative_offset(&self) -> u64 {
        self.cumulative_offset
    }

    #[inline]
    pub fn region_offset(&self) -> u64 {
        self.region_offset
    }

    #[inline]
    pub fn native_base_address(&self) -> u64 {
        self.native_base_address
    }

    #[inline]
    pub fn heap_header(&self) -> u64 {
        self.heap_header
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    #[inline]
    pub fn swap_required(&self) -> bool {
        self.swap_required
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only.is_stepped()
    }

    pub fn request_server(&self) -> Option<&Arc<dyn MemoryRequestServer>> {
        self.request_server.as_ref()
    }
}

impl fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceState")
            .field("backing", &self.backing.kind_name())
            .field("native_base_address", &self.native_base_address)
            .field("heap_header", &self.heap_header)
            .field("region_offset", &self.region_offset)
            .field("capacity", &self.capacity)
            .field("cumulative_offset", &self.cumulative_offset)
            .field("valid", &self.is_valid())
            .field("read_only", &self.is_read_only())
            .field("byte_order", &self.byte_order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::{backing::HeapElement, platform::AllocationOptions};

    fn heap_state(values: Vec<u8>) -> ResourceState {
        ResourceState::heap(Arc::new(u8::into_heap_array(values)))
    }

    #[test]
    fn test_heap_addressing() {
        let state = heap_state((0..32).collect());
        assert_eq!(state.native_base_address(), 0);
        assert_eq!(state.heap_header(), 0);
        assert_eq!(state.cumulative_offset(), 0);
        assert_eq!(state.capacity(), 32);

        let region = state.region(8, 16, false).unwrap();
        assert_eq!(region.region_offset(), 8);
        assert_eq!(region.cumulative_offset(), 8);
        let nested = region.region(4, 4, false).unwrap();
        assert_eq!(nested.region_offset(), 12);
        assert_eq!(nested.cumulative_offset(), 12);
        assert_eq!(nested.read::<u8>(0).unwrap(), 12);
        assert!(nested.read::<u8>(4).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_native_addressing() {
        let alloc = Arc::new(NativeAllocation::allocate(64, &AllocationOptions::default()).unwrap());
        let base = alloc.base_ptr().addr() as u64;
        let state = ResourceState::native(alloc.clone());
        assert_eq!(state.native_base_address(), base);
        assert_eq!(state.cumulative_offset(), base);

        let region = state.region(10, 20, false).unwrap();
        assert_eq!(region.cumulative_offset(), base + 10);
        region.write::<u32>(0, 0xabcd_0123).unwrap();
        assert_eq!(state.read::<u32>(10).unwrap(), 0xabcd_0123);

        assert!(alloc.release());
        assert!(!state.is_valid());
        assert!(region.read::<u8>(0).unwrap_err().is_invalid_resource());
    }

    #[test]
    fn test_external_addressing() {
        let buf = Arc::new(ExternalBuffer::shared(Bytes::from_static(b"0123456789")));
        let state = ResourceState::external(buf.clone());
        assert!(state.is_read_only());
        assert_eq!(state.cumulative_offset(), buf.base_ptr().addr() as u64);
        assert_eq!(state.read::<u8>(3).unwrap(), b'3');

        let state = ResourceState::external(Arc::new(ExternalBuffer::unique(BytesMut::zeroed(8))));
        assert!(!state.is_read_only());
    }

    #[test]
    fn test_byte_order_swap() {
        let mut state = heap_state(vec![0; 8]);
        state.write::<u32>(0, 0x0102_0304).unwrap();
        state.set_byte_order(ByteOrder::non_native());
        assert!(state.swap_required());
        assert_eq!(state.read::<u32>(0).unwrap(), 0x0403_0201);

        state.write::<u16>(4, 0x0a0b).unwrap();
        state.set_byte_order(ByteOrder::native());
        assert!(!state.swap_required());
        assert_eq!(state.read::<u16>(4).unwrap(), 0x0b0a);
    }

    #[test]
    fn test_array_transfer_with_swap() {
        let mut state = heap_state(vec![0; 16]);
        state.set_byte_order(ByteOrder::non_native());
        state.write_array::<u16>(2, &[1, 2, 3]).unwrap();
        let mut out = [0u16; 3];
        state.read_array(2, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3]);

        state.set_byte_order(ByteOrder::native());
        state.read_array(2, &mut out).unwrap();
        assert_eq!(out, [0x100, 0x200, 0x300]);

        let mut big = [0u64; 3];
        assert!(state.read_array(0, &mut big).unwrap_err().is_out_of_range());
    }

    #[test]
    fn test_same_resource() {
        let array = Arc::new(u8::into_heap_array(vec![0; 16]));
        let a = ResourceState::heap(array.clone());
        let b = ResourceState::heap(array);
        assert!(a.is_same_resource(&b));
        assert!(a.is_same_resource(&a.region(0, 16, false).unwrap()));
        assert!(!a.is_same_resource(&a.region(0, 8, false).unwrap()));

        let other = heap_state(vec![0; 16]);
        assert_eq!(other.cumulative_offset(), a.cumulative_offset());
        assert!(!a.is_same_resource(&other));
    }

    #[test]
    fn test_read_only_is_inherited() {
        let state = heap_state(vec![0; 4]);
        assert!(!state.is_read_only());
        let ro = state.region(0, 4, true).unwrap();
        assert!(ro.is_read_only());
        assert!(ro.region(0, 2, false).unwrap().is_read_only());
        assert!(!state.is_read_only());
    }
}
