//! Native (off-heap) memory with exactly-once release.

use std::{ptr::NonNull, sync::Arc};

use rawmem_common::{Result, error::Error, verify_arg};

use crate::{flag::StepFlag, monitor, platform::AllocationOptions, platform::NativeAllocator};

/// A block of native memory obtained from a [`NativeAllocator`].
///
/// The first successful [`NativeAllocation::release`] invalidates the block. The validity
/// flag is shared with every descriptor that addresses the block, so release is
/// immediately visible to all derived views. The block itself goes back to the allocator
/// when the allocation is dropped, that is, after the last descriptor referring to it is
/// gone. An access that passed its validity check before the release therefore never
/// reads freed memory. If the allocation is dropped without having been released (its
/// owning handle was leaked), it is released with a warning first.
pub struct NativeAllocation {
    /// Address returned by the allocator.
    raw: NonNull<u8>,
    /// First usable byte; equal to `raw` unless the platform requires page alignment.
    base: NonNull<u8>,
    allocation_size: usize,
    capacity: u64,
    allocator: Arc<dyn NativeAllocator>,
    released: Arc<StepFlag>,
}

impl NativeAllocation {
    /// Allocates `capacity` bytes according to `options`.
    ///
    /// The capacity is registered with [`crate::monitor`] before the allocator is called
    /// and unregistered again if the allocator fails.
    pub(crate) fn allocate(capacity: u64, options: &AllocationOptions) -> Result<NativeAllocation> {
        verify_arg!(capacity, capacity > 0);
        let platform = options.platform();
        let page_size = platform.page_size();
        let page_aligned = platform.is_page_aligned();

        let allocation_size = usize::try_from(capacity)
            .ok()
            .and_then(|cap| if page_aligned { cap.checked_add(page_size) } else { Some(cap) })
            .ok_or_else(|| {
                Error::resource_exhausted(
                    capacity,
                    std::io::Error::from(std::io::ErrorKind::OutOfMemory),
                )
            })?;

        monitor::reserve_direct(capacity);
        let raw = match options.allocator().allocate(allocation_size) {
            Ok(raw) => raw,
            Err(e) => {
                monitor::release_direct(capacity);
                return Err(Error::resource_exhausted(capacity, e));
            }
        };

        let base = if page_aligned {
            let addr = raw.as_ptr().addr();
            let adjust = addr.next_multiple_of(page_size) - addr;
            unsafe { raw.add(adjust) }
        } else {
            raw
        };

        log::debug!(
            "allocated {capacity} bytes of native memory at {:p} (allocation size {allocation_size})",
            base
        );
        Ok(NativeAllocation {
            raw,
            base,
            allocation_size,
            capacity,
            allocator: options.allocator().clone(),
            released: Arc::new(StepFlag::new()),
        })
    }

    /// Invalidates the block and settles the monitoring counters. Only the first call, from
    /// any thread, does so; it returns `true`. The block is freed on drop.
    pub(crate) fn release(&self) -> bool {
        if !self.released.step() {
            return false;
        }
        monitor::release_direct(self.capacity);
        log::debug!("released {} bytes of native memory", self.capacity);
        true
    }

    #[inline]
    pub(crate) fn base_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub(crate) fn released_flag(&self) -> &Arc<StepFlag> {
        &self.released
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_valid(&self) -> bool {
        !self.released.is_stepped()
    }
}

impl Drop for NativeAllocation {
    fn drop(&mut self) {
        if !self.released.is_stepped() {
            log::warn!(
                "native allocation of {} bytes was not closed by its owner; reclaiming",
                self.capacity
            );
            self.release();
        }
        unsafe { self.allocator.free(self.raw, self.allocation_size) };
    }
}

impl std::fmt::Debug for NativeAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeAllocation")
            .field("capacity", &self.capacity)
            .field("allocation_size", &self.allocation_size)
            .field("valid", &self.is_valid())
            .finish()
    }
}

// The block is reached only through raw pointers and is freed only once no descriptor holds it.
unsafe impl Send for NativeAllocation {}
unsafe impl Sync for NativeAllocation {}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::platform::{HeapAllocator, SystemPlatform};

    #[derive(Default)]
    struct CountingAllocator {
        allocs: AtomicUsize,
        frees: AtomicUsize,
    }

    impl NativeAllocator for Arc<CountingAllocator> {
        fn allocate(&self, size: usize) -> std::io::Result<NonNull<u8>> {
            self.allocs.fetch_add(1, Ordering::SeqCst);
            HeapAllocator.allocate(size)
        }

        unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
            self.frees.fetch_add(1, Ordering::SeqCst);
            unsafe { HeapAllocator.free(ptr, size) }
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = NativeAllocation::allocate(0, &AllocationOptions::default()).unwrap_err();
        assert!(matches!(
            err.kind(),
            rawmem_common::error::ErrorKind::InvalidArgument { .. }
        ));
    }

    #[test]
    fn test_release_exactly_once() {
        let counting = Arc::new(CountingAllocator::default());
        let options = AllocationOptions::new().with_allocator(counting.clone());
        let alloc = Arc::new(NativeAllocation::allocate(64, &options).unwrap());
        assert!(alloc.is_valid());

        let threads = (0..8)
            .map(|_| {
                let alloc = alloc.clone();
                std::thread::spawn(move || alloc.release())
            })
            .collect::<Vec<_>>();
        let wins = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|&released| released)
            .count();
        assert_eq!(wins, 1);
        assert!(!alloc.release());
        assert!(!alloc.is_valid());
        assert_eq!(counting.frees.load(Ordering::SeqCst), 0);
        drop(alloc);
        assert_eq!(counting.allocs.load(Ordering::SeqCst), 1);
        assert_eq!(counting.frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_reclaims_unreleased() {
        let counting = Arc::new(CountingAllocator::default());
        let options = AllocationOptions::new().with_allocator(counting.clone());
        let alloc = NativeAllocation::allocate(16, &options).unwrap();
        drop(alloc);
        assert_eq!(counting.frees.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_page_aligned_base() {
        let options = AllocationOptions::new().with_platform(SystemPlatform::page_aligned());
        let page_size = options.platform().page_size();
        let alloc = NativeAllocation::allocate(100, &options).unwrap();
        assert!((alloc.base_ptr() as usize).is_multiple_of(page_size));
        assert_eq!(alloc.allocation_size, 100 + page_size);
        assert!(alloc.release());
    }

    #[derive(Debug)]
    struct SmallPages;

    impl crate::platform::PlatformInfo for SmallPages {
        fn page_size(&self) -> usize {
            64
        }

        fn is_page_aligned(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_page_aligned_base_within_slack() {
        let counting = Arc::new(CountingAllocator::default());
        let options = AllocationOptions::new()
            .with_allocator(counting.clone())
            .with_platform(SmallPages);
        for capacity in [1u64, 7, 63, 64, 65, 1000] {
            let alloc = NativeAllocation::allocate(capacity, &options).unwrap();
            let raw = alloc.raw.as_ptr() as usize;
            let base = alloc.base_ptr() as usize;
            assert!(base.is_multiple_of(64));
            assert!(base >= raw && base - raw < 64);
            assert!(base + capacity as usize <= raw + alloc.allocation_size);
        }
        assert_eq!(
            counting.allocs.load(Ordering::SeqCst),
            counting.frees.load(Ordering::SeqCst)
        );
    }
}
