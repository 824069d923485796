use std::{
    cmp::Ordering,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{self, AtomicUsize},
    },
    thread,
    time::Duration,
};

use rawmem::{
    AllocationOptions, ByteOrder, ErrorKind, HeapAllocator, Memory, NativeAllocator,
    PageAllocator, SystemPlatform, WritableMemory,
};

/// Overwrites every block with `0xEE` before handing it back.
struct PoisoningAllocator {
    frees: Arc<AtomicUsize>,
}

impl NativeAllocator for PoisoningAllocator {
    fn allocate(&self, size: usize) -> std::io::Result<NonNull<u8>> {
        HeapAllocator.allocate(size)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        unsafe { ptr.as_ptr().write_bytes(0xee, size) };
        self.frees.fetch_add(1, atomic::Ordering::SeqCst);
        unsafe { HeapAllocator.free(ptr, size) }
    }
}

#[test]
fn test_allocate_region_duplicate_release() {
    let err = WritableMemory::allocate(0).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));

    let mut handle = WritableMemory::allocate(1 << 20).unwrap();
    for i in 0..(1u64 << 17) {
        handle.put::<u64>(i * 8, i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).unwrap();
    }

    let region = handle.region(1000, 100).unwrap();
    let dup = region.duplicate().unwrap();
    assert_eq!(region.capacity(), 100);
    assert_eq!(dup.capacity(), 100);
    assert_eq!(dup.region_offset(), 1000);
    assert_eq!(region.cumulative_offset(0), handle.cumulative_offset(1000));

    let mut a = [0u8; 100];
    let mut b = [0u8; 100];
    region.get_array(0, &mut a).unwrap();
    dup.get_array(0, &mut b).unwrap();
    assert_eq!(a, b);
    let mut expected = [0u8; 100];
    handle.get_array(1000, &mut expected).unwrap();
    assert_eq!(a, expected);
    assert_eq!(region.compare_to(0, 100, &dup, 0, 100).unwrap(), Ordering::Equal);

    assert!(handle.close());
    assert!(!dup.is_valid());
    assert!(dup.get::<u8>(0).unwrap_err().is_invalid_resource());
    assert!(region.get_array(0, &mut a).unwrap_err().is_invalid_resource());
    assert!(!handle.close());
}

#[test]
fn test_bulk_accessors_out_of_range() {
    let mut mem = WritableMemory::wrap(vec![0u64; 4]);
    let cap = mem.capacity();
    let mut other = WritableMemory::wrap(vec![0u8; 64]);
    for (offset, len) in [(0, cap + 1), (cap, 1), (1, cap), (u64::MAX, 2), (cap + 1, 0)] {
        let mut dst = vec![0u8; len.min(64) as usize];
        let checks = [
            mem.check_valid_and_bounds(offset, len),
            mem.region(offset, len).map(|_| ()),
            mem.fill(offset, len, 1),
            mem.compare_to(offset, len, &other, 0, 0).map(|_| ()),
            mem.copy_to(offset, &mut other, 0, len).map(|_| ()),
            mem.xxhash64(offset, len, 0).map(|_| ()),
            mem.to_hex_string("", offset, len).map(|_| ()),
            mem.get_utf8(offset, len, &mut String::new()).map(|_| ()),
        ];
        for result in checks {
            assert!(result.unwrap_err().is_out_of_range(), "offset {offset} len {len}");
        }
        if offset.checked_add(dst.len() as u64).is_none_or(|end| end > cap) {
            assert!(mem.get_array(offset, &mut dst).unwrap_err().is_out_of_range());
        }
    }
    assert!(mem.is_all_bits_clear(0, 0xff).unwrap());
}

#[test]
fn test_independent_regions() {
    let mem = Memory::wrap((0..=255u8).collect::<Vec<_>>());
    let a = mem.region(16, 32).unwrap();
    let b = mem.region(16, 32).unwrap();
    assert!(!a.is_same_resource(&b));
    assert!(a.is_same_resource(&a));
    assert!(a.resource_state().is_same_resource(b.resource_state()));
    assert_eq!(a.compare_to(0, 32, &b, 0, 32).unwrap(), Ordering::Equal);
    assert_eq!(a.compare_to(0, 32, &b, 1, 31).unwrap(), Ordering::Less);
}

#[test]
fn test_concurrent_close() {
    let handle = Arc::new(WritableMemory::allocate(4096).unwrap());
    let views: Vec<_> = (0..4).map(|i| handle.region(i * 1024, 1024).unwrap()).collect();
    let released: usize = (0..8)
        .map(|_| {
            let handle = handle.clone();
            thread::spawn(move || handle.close())
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|t| t.join().unwrap() as usize)
        .sum();
    assert_eq!(released, 1);
    for view in views {
        assert!(view.get::<u8>(0).unwrap_err().is_invalid_resource());
    }
}

#[test]
fn test_close_during_read() {
    const LEN: usize = 16 << 20;
    let frees = Arc::new(AtomicUsize::new(0));
    let options = AllocationOptions::new().with_allocator(PoisoningAllocator {
        frees: frees.clone(),
    });
    let mut handle = WritableMemory::allocate_with(LEN as u64, &options).unwrap();
    handle.fill(0, LEN as u64, 0x11).unwrap();
    let view = handle.region(0, LEN as u64).unwrap();

    let reader = thread::spawn(move || {
        let mut dst = vec![0u8; LEN];
        loop {
            match view.get_array(0, &mut dst[..]) {
                Ok(()) => assert!(dst.iter().all(|&b| b == 0x11)),
                Err(e) => {
                    assert!(e.is_invalid_resource());
                    break;
                }
            }
        }
        view
    });
    thread::sleep(Duration::from_millis(20));
    assert!(handle.close());
    let view = reader.join().unwrap();

    assert!(!view.is_valid());
    drop(handle);
    assert_eq!(frees.load(atomic::Ordering::SeqCst), 0);
    drop(view);
    assert_eq!(frees.load(atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_page_aligned_options() {
    let platform = SystemPlatform::page_aligned();
    let page = rawmem::PlatformInfo::page_size(&platform) as u64;
    let options = AllocationOptions::new()
        .with_allocator(PageAllocator)
        .with_platform(platform)
        .with_byte_order(ByteOrder::BigEndian);
    let mut handle = WritableMemory::allocate_with(100, &options).unwrap();
    assert_eq!(handle.cumulative_offset(0) % page, 0);
    assert_eq!(handle.byte_order(), ByteOrder::BigEndian);
    handle.put::<u32>(0, 0x0a0b_0c0d).unwrap();
    assert_eq!(handle.get::<u8>(0).unwrap(), 0x0a);
}

#[test]
fn test_growth_through_request_server() {
    let mut handle = WritableMemory::allocate(8).unwrap();
    handle.put::<u64>(0, 5).unwrap();
    assert!(handle.put::<u64>(8, 6).unwrap_err().is_out_of_range());

    let mut bigger = handle.request_capacity(16).unwrap();
    handle.copy_to(0, &mut bigger, 0, 8).unwrap();
    bigger.put::<u64>(8, 6).unwrap();
    let old = handle.duplicate().unwrap();
    handle.request_close(&bigger).unwrap();

    assert!(!old.is_valid());
    assert_eq!(bigger.get::<u64>(0).unwrap(), 5);
    assert_eq!(bigger.get::<u64>(8).unwrap(), 6);
}
