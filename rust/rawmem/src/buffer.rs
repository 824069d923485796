//! Positional views.
//!
//! A [`Buffer`] pairs an offset-addressed view with a cursor `start <= position <= end <=
//! capacity`. Sequential accessors read or write at `position` and advance it; an access
//! that would move `position` past `end` fails with `OutOfRange` and leaves the cursor
//! unchanged.

use std::{
    cmp::Ordering,
    ops::{Deref, DerefMut},
    path::Path,
};

use bytes::{Bytes, BytesMut};
use rawmem_common::{Result, error::Error};

use crate::{
    backing::HeapElement,
    handle::MapHandle,
    memory::{Memory, WritableMemory},
    order::{ByteOrder, Primitive},
};

/// Read-only positional view.
#[derive(Clone)]
pub struct Buffer {
    mem: Memory,
    start: u64,
    position: u64,
    end: u64,
}

impl Buffer {
    pub(crate) fn new(mem: Memory) -> Buffer {
        let end = mem.capacity();
        Buffer {
            mem,
            start: 0,
            position: 0,
            end,
        }
    }

    fn check_native_order(byte_order: ByteOrder) -> Result<()> {
        if byte_order.is_native() {
            Ok(())
        } else {
            Err(Error::invalid_arg(
                "byte_order",
                format!("positional views over external buffers require {}", ByteOrder::native()),
            ))
        }
    }

    /// Read-only positional view over a primitive array.
    pub fn wrap<T: HeapElement>(values: Vec<T>) -> Buffer {
        Buffer::new(Memory::wrap(values))
    }

    /// Read-only positional view over an external buffer, which must be in native order.
    pub fn wrap_external(bytes: Bytes, byte_order: ByteOrder) -> Result<Buffer> {
        Self::check_native_order(byte_order)?;
        Ok(Buffer::new(Memory::wrap_external(bytes, byte_order)))
    }

    /// Maps the whole file at `path` read-only; use [`MapHandle::buffer`] for the
    /// positional view.
    pub fn map(path: impl AsRef<Path>) -> Result<MapHandle> {
        Memory::map(path)
    }

    pub fn map_range(
        path: impl AsRef<Path>,
        file_offset: u64,
        capacity: u64,
    ) -> Result<MapHandle> {
        Memory::map_range(path, file_offset, capacity, ByteOrder::native())
    }

    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.end
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }

    #[inline]
    pub fn has_remaining(&self) -> bool {
        self.position < self.end
    }

    /// Moves the cursor to `position`, which must lie in `[start, end]`.
    pub fn set_position(&mut self, position: u64) -> Result<()> {
        self.set_start_position_end(self.start, position, self.end)
    }

    /// Replaces the whole cursor. Requires `start <= position <= end <= capacity`.
    pub fn set_start_position_end(&mut self, start: u64, position: u64, end: u64) -> Result<()> {
        self.mem.check_valid_and_bounds(0, 0)?;
        if !(start <= position && position <= end && end <= self.mem.capacity()) {
            return Err(Error::invalid_arg(
                "start/position/end",
                format!(
                    "{start} <= {position} <= {end} <= {} does not hold",
                    self.mem.capacity()
                ),
            ));
        }
        self.start = start;
        self.position = position;
        self.end = end;
        Ok(())
    }

    /// Moves the cursor back to `start`.
    pub fn reset_position(&mut self) {
        self.position = self.start;
    }

    /// Advances the cursor by `delta` bytes without accessing memory.
    pub fn increment_position(&mut self, delta: u64) -> Result<()> {
        self.advance(delta)?;
        Ok(())
    }

    /// Checks that `len` bytes at the cursor lie before `end` and returns the cursor.
    #[inline]
    fn at_position(&self, len: u64) -> Result<u64> {
        match self.position.checked_add(len) {
            Some(next) if next <= self.end => Ok(self.position),
            _ => Err(Error::out_of_range(self.position, len, self.end)),
        }
    }

    /// Reserves `len` bytes at the cursor and returns their offset.
    #[inline]
    fn advance(&mut self, len: u64) -> Result<u64> {
        let offset = self.at_position(len)?;
        self.position = offset + len;
        Ok(offset)
    }

    /// Runs `f` at the cursor offset, advancing by `len` only if `f` succeeds.
    #[inline]
    fn sequential<R>(
        &mut self,
        len: u64,
        f: impl FnOnce(&Memory, u64) -> Result<R>,
    ) -> Result<R> {
        let saved = self.position;
        let offset = self.advance(len)?;
        f(&self.mem, offset).inspect_err(|_| self.position = saved)
    }

    /// Reads the value at the cursor and advances past it.
    #[inline]
    pub fn get<T: Primitive>(&mut self) -> Result<T> {
        self.sequential(T::SIZE as u64, |mem, offset| mem.get(offset))
    }

    /// Reads the value at `offset` without moving the cursor.
    #[inline]
    pub fn get_at<T: Primitive>(&self, offset: u64) -> Result<T> {
        self.mem.get(offset)
    }

    pub fn get_array<T: Primitive>(&mut self, dst: &mut [T]) -> Result<()> {
        let len = crate::bounds::byte_len(self.position, dst.len(), T::SIZE, self.end)?;
        self.sequential(len, |mem, offset| mem.get_array(offset, dst))
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        self.sequential(1, |mem, offset| mem.get_bool(offset))
    }

    pub fn get_bool_array(&mut self, dst: &mut [bool]) -> Result<()> {
        self.sequential(dst.len() as u64, |mem, offset| mem.get_bool_array(offset, dst))
    }

    /// Whether every bit of `mask` is set in the byte at the cursor. The cursor does not
    /// move.
    pub fn is_all_bits_set(&self, mask: u8) -> Result<bool> {
        self.mem.is_all_bits_set(self.at_position(1)?, mask)
    }

    pub fn is_any_bits_set(&self, mask: u8) -> Result<bool> {
        self.mem.is_any_bits_set(self.at_position(1)?, mask)
    }

    pub fn is_all_bits_clear(&self, mask: u8) -> Result<bool> {
        self.mem.is_all_bits_clear(self.at_position(1)?, mask)
    }

    pub fn is_any_bits_clear(&self, mask: u8) -> Result<bool> {
        self.mem.is_any_bits_clear(self.at_position(1)?, mask)
    }

    /// Positional view over `[offset, offset + length)` of this view's resource range,
    /// with its own descriptor and a fresh cursor.
    pub fn region(&self, offset: u64, length: u64) -> Result<Buffer> {
        Ok(Buffer::new(self.mem.region(offset, length)?))
    }

    /// Positional view over `[position, end)`.
    pub fn slice(&self) -> Result<Buffer> {
        self.region(self.position, self.remaining())
    }

    /// A new positional view over the same range with its own descriptor and a fresh
    /// cursor.
    pub fn duplicate(&self) -> Result<Buffer> {
        Ok(Buffer::new(self.mem.duplicate()?))
    }

    /// Offset-addressed view over the same descriptor.
    pub fn as_memory(&self) -> Memory {
        self.mem.clone()
    }

    /// Compares the remaining bytes of this view with the remaining bytes of `that`.
    pub fn compare_to(&self, that: &Buffer) -> Result<Ordering> {
        self.mem.compare_to(
            self.position,
            self.remaining(),
            &that.mem,
            that.position,
            that.remaining(),
        )
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.mem.capacity()
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.mem.byte_order()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.mem.is_valid()
    }

    pub fn is_resource_read_only(&self) -> bool {
        self.mem.is_resource_read_only()
    }

    /// Cumulative offset of the byte at the cursor.
    pub fn cumulative_offset(&self) -> u64 {
        self.mem.cumulative_offset(self.position)
    }

    pub fn has_array(&self) -> bool {
        self.mem.has_array()
    }

    pub fn has_external_buffer(&self) -> bool {
        self.mem.has_external_buffer()
    }

    pub fn is_direct(&self) -> bool {
        self.mem.is_direct()
    }

    /// Hex dump of `[offset, offset + length)`. `offset` is relative to the start of the
    /// view, not to the cursor.
    pub fn to_hex_string(&self, header: &str, offset: u64, length: u64) -> Result<String> {
        self.mem.to_hex_string(header, offset, length)
    }

    /// Returns `true` only if both positional views share one descriptor.
    pub fn is_same_resource(&self, that: &Buffer) -> bool {
        self.mem.is_same_resource(&that.mem)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("start", &self.start)
            .field("position", &self.position)
            .field("end", &self.end)
            .field("state", self.mem.resource_state())
            .finish()
    }
}

/// Writable positional view.
pub struct WritableBuffer {
    buf: Buffer,
}

impl WritableBuffer {
    pub(crate) fn from_memory(mem: Memory) -> WritableBuffer {
        WritableBuffer {
            buf: Buffer::new(mem),
        }
    }

    pub fn wrap<T: HeapElement>(values: Vec<T>) -> WritableBuffer {
        WritableBuffer::from_memory(WritableMemory::wrap(values).into_memory())
    }

    /// Writable positional view over an external buffer, which must be in native order.
    pub fn wrap_external(bytes: BytesMut, byte_order: ByteOrder) -> Result<WritableBuffer> {
        Buffer::check_native_order(byte_order)?;
        let mem = WritableMemory::wrap_external(bytes, byte_order);
        Ok(WritableBuffer::from_memory(mem.into_memory()))
    }

    fn writable(&self) -> WritableMemory {
        WritableMemory::from_memory(self.buf.mem.clone())
    }

    /// Runs `f` at the cursor offset, advancing by `len` only if `f` succeeds.
    fn sequential_put(
        &mut self,
        len: u64,
        f: impl FnOnce(&mut WritableMemory, u64) -> Result<()>,
    ) -> Result<()> {
        let mut mem = self.writable();
        let saved = self.buf.position;
        let offset = self.buf.advance(len)?;
        f(&mut mem, offset).inspect_err(|_| self.buf.position = saved)
    }

    /// Writes `value` at the cursor and advances past it.
    #[inline]
    pub fn put<T: Primitive>(&mut self, value: T) -> Result<()> {
        self.sequential_put(T::SIZE as u64, |mem, offset| mem.put(offset, value))
    }

    /// Writes `value` at `offset` without moving the cursor.
    #[inline]
    pub fn put_at<T: Primitive>(&mut self, offset: u64, value: T) -> Result<()> {
        self.buf.mem.state.write(offset, value)
    }

    pub fn put_array<T: Primitive>(&mut self, src: &[T]) -> Result<()> {
        let len = crate::bounds::byte_len(self.position(), src.len(), T::SIZE, self.end())?;
        self.sequential_put(len, |mem, offset| mem.put_array(offset, src))
    }

    pub fn put_bool(&mut self, value: bool) -> Result<()> {
        self.sequential_put(1, |mem, offset| mem.put_bool(offset, value))
    }

    pub fn put_bool_array(&mut self, src: &[bool]) -> Result<()> {
        self.sequential_put(src.len() as u64, |mem, offset| mem.put_bool_array(offset, src))
    }

    /// Sets every byte of `[position, end)` to `value`. The cursor does not move.
    pub fn fill(&mut self, value: u8) -> Result<()> {
        let (position, remaining) = (self.position(), self.remaining());
        self.writable().fill(position, remaining, value)
    }

    /// Zeroes `[position, end)`. The cursor does not move.
    pub fn clear(&mut self) -> Result<()> {
        self.fill(0)
    }

    /// Writable positional view over `[offset, offset + length)`. Aliases the same bytes;
    /// the synchronization contract of [`WritableMemory::region`] applies.
    pub fn region(&self, offset: u64, length: u64) -> Result<WritableBuffer> {
        let mem = self.writable().region(offset, length)?;
        Ok(WritableBuffer::from_memory(mem.into_memory()))
    }

    pub fn slice(&self) -> Result<WritableBuffer> {
        self.region(self.position(), self.remaining())
    }

    pub fn duplicate(&self) -> Result<WritableBuffer> {
        self.region(0, self.capacity())
    }

    /// Read-only positional view with its own, read-only descriptor and a copy of the
    /// cursor.
    pub fn as_read_only(&self) -> Result<Buffer> {
        let mut buf = Buffer::new(self.writable().as_read_only()?);
        buf.set_start_position_end(self.start(), self.position(), self.end())?;
        Ok(buf)
    }

    /// Writable offset-addressed view over the same descriptor.
    pub fn as_writable_memory(&self) -> WritableMemory {
        self.writable()
    }
}

impl Deref for WritableBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buf
    }
}

impl DerefMut for WritableBuffer {
    fn deref_mut(&mut self) -> &mut Buffer {
        &mut self.buf
    }
}

impl std::fmt::Debug for WritableBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("WritableBuffer").field(&self.buf).finish()
    }
}
