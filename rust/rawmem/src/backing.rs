//! Owners of the bytes behind a resource descriptor.
//!
//! A descriptor references exactly one owner through [`Backing`]. Owners keep the storage
//! alive and supply pointer provenance; addressing itself lives in
//! [`crate::resource::ResourceState::address`].

use std::{mem::ManuallyDrop, ptr::NonNull, sync::Arc};

use bytes::{Bytes, BytesMut};

use crate::{mapped::MappedFile, native::NativeAllocation};

/// Element type of a wrapped primitive array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Prim {
    Bool,
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl Prim {
    pub fn name(self) -> &'static str {
        match self {
            Prim::Bool => "bool",
            Prim::U8 => "u8",
            Prim::I8 => "i8",
            Prim::U16 => "u16",
            Prim::I16 => "i16",
            Prim::U32 => "u32",
            Prim::I32 => "i32",
            Prim::U64 => "u64",
            Prim::I64 => "i64",
            Prim::F32 => "f32",
            Prim::F64 => "f64",
        }
    }

    pub fn size(self) -> usize {
        match self {
            Prim::Bool | Prim::U8 | Prim::I8 => 1,
            Prim::U16 | Prim::I16 => 2,
            Prim::U32 | Prim::I32 | Prim::F32 => 4,
            Prim::U64 | Prim::I64 | Prim::F64 => 8,
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Element types whose arrays can be wrapped by a view.
pub trait HeapElement: sealed::Sealed + Copy + Send + Sync + 'static {
    const PRIM: Prim;

    #[doc(hidden)]
    fn into_heap_array(values: Vec<Self>) -> HeapArray;
}

macro_rules! impl_heap_element {
    ($($t:ty => $prim:ident),*) => {
        $(
            impl sealed::Sealed for $t {}

            impl HeapElement for $t {
                const PRIM: Prim = Prim::$prim;

                fn into_heap_array(values: Vec<Self>) -> HeapArray {
                    HeapArray::from_vec(values, Prim::$prim)
                }
            }
        )*
    };
}

impl_heap_element!(
    u8 => U8, i8 => I8, u16 => U16, i16 => I16, u32 => U32, i32 => I32,
    u64 => U64, i64 => I64, f32 => F32, f64 => F64
);

impl sealed::Sealed for bool {}

impl HeapElement for bool {
    const PRIM: Prim = Prim::Bool;

    fn into_heap_array(values: Vec<Self>) -> HeapArray {
        // Views may store any byte, which is not a valid `bool`; keep the storage as `u8`.
        let mut values = ManuallyDrop::new(values);
        let bytes = unsafe {
            Vec::from_raw_parts(
                values.as_mut_ptr() as *mut u8,
                values.len(),
                values.capacity(),
            )
        };
        HeapArray::from_vec(bytes, Prim::Bool)
    }
}

/// An owned primitive array, taken over from a `Vec` without copying.
pub struct HeapArray {
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
    prim: Prim,
    drop_fn: unsafe fn(NonNull<u8>, usize, usize),
}

impl HeapArray {
    fn from_vec<T: Copy>(values: Vec<T>, prim: Prim) -> HeapArray {
        debug_assert_eq!(std::mem::size_of::<T>(), prim.size());
        let mut values = ManuallyDrop::new(values);
        HeapArray {
            ptr: NonNull::new(values.as_mut_ptr() as *mut u8).unwrap_or(NonNull::dangling()),
            len: values.len(),
            capacity: values.capacity(),
            prim,
            drop_fn: drop_vec::<T>,
        }
    }

    /// Start of the element storage.
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Length of the array in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.len * self.prim.size()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn prim(&self) -> Prim {
        self.prim
    }
}

unsafe fn drop_vec<T>(ptr: NonNull<u8>, len: usize, capacity: usize) {
    drop(unsafe { Vec::from_raw_parts(ptr.as_ptr() as *mut T, len, capacity) });
}

impl Drop for HeapArray {
    fn drop(&mut self) {
        unsafe { (self.drop_fn)(self.ptr, self.len, self.capacity) };
    }
}

impl std::fmt::Debug for HeapArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}; {}]", self.prim.name(), self.len)
    }
}

// The storage is only reached through raw pointers. Nothing serializes writers: views
// over the same bytes may be written from several threads only if their owners
// synchronize those writes. See `WritableMemory::region`.
unsafe impl Send for HeapArray {}
unsafe impl Sync for HeapArray {}

enum ExternalOwner {
    Shared(#[allow(dead_code)] Bytes),
    Unique(#[allow(dead_code)] BytesMut),
}

/// An externally created byte buffer taken over by a view.
pub struct ExternalBuffer {
    ptr: NonNull<u8>,
    len: usize,
    _owner: ExternalOwner,
}

impl ExternalBuffer {
    /// Read-only buffer.
    pub fn shared(bytes: Bytes) -> ExternalBuffer {
        ExternalBuffer {
            ptr: NonNull::new(bytes.as_ptr() as *mut u8).unwrap_or(NonNull::dangling()),
            len: bytes.len(),
            _owner: ExternalOwner::Shared(bytes),
        }
    }

    /// Writable buffer.
    pub fn unique(mut bytes: BytesMut) -> ExternalBuffer {
        ExternalBuffer {
            ptr: NonNull::new(bytes.as_mut_ptr()).unwrap_or(NonNull::dangling()),
            len: bytes.len(),
            _owner: ExternalOwner::Unique(bytes),
        }
    }

    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_read_only(&self) -> bool {
        matches!(self._owner, ExternalOwner::Shared(_))
    }
}

impl std::fmt::Debug for ExternalBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

// Same contract as `HeapArray`.
unsafe impl Send for ExternalBuffer {}
unsafe impl Sync for ExternalBuffer {}

/// The resource kind behind a descriptor, together with its ownership link.
#[derive(Clone, Debug)]
pub enum Backing {
    Heap(Arc<HeapArray>),
    Native(Arc<NativeAllocation>),
    Mapped(Arc<MappedFile>),
    External(Arc<ExternalBuffer>),
}

impl Backing {
    /// Pointer whose provenance covers the whole resource.
    ///
    /// For heap arrays this is also the base the cumulative offset is relative to; for the
    /// other kinds the cumulative offset is an absolute address.
    #[inline]
    pub(crate) fn provenance(&self) -> *mut u8 {
        match self {
            Backing::Heap(array) => array.base_ptr(),
            Backing::Native(alloc) => alloc.base_ptr(),
            Backing::Mapped(file) => file.base_ptr(),
            Backing::External(buf) => buf.base_ptr(),
        }
    }

    #[inline]
    pub fn is_heap(&self) -> bool {
        matches!(self, Backing::Heap(_))
    }

    pub(crate) fn heap(&self) -> Option<&Arc<HeapArray>> {
        match self {
            Backing::Heap(array) => Some(array),
            _ => None,
        }
    }

    pub(crate) fn external(&self) -> Option<&Arc<ExternalBuffer>> {
        match self {
            Backing::External(buf) => Some(buf),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Backing::Heap(_) => "heap",
            Backing::Native(_) => "native",
            Backing::Mapped(_) => "mapped",
            Backing::External(_) => "external",
        }
    }
}
