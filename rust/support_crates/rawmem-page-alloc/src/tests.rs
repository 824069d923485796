use std::io::{Read, Seek, SeekFrom, Write};

use crate::{file_map::FileMapping, mmap};

#[test]
fn test_normal_allocations() {
    let p = Pages::allocate(1).unwrap();
    assert!(!p.ptr.is_null());
    assert!(p.size >= mmap::get_page_size());
    assert!(p.is_aligned(mmap::get_page_size()));

    let p = Pages::allocate(0).unwrap();
    assert!(!p.ptr.is_null());
    assert!(p.size >= mmap::get_page_size());
    assert!(p.is_aligned(mmap::get_page_size()));
}

#[test]
fn test_allocate_zero_filled() {
    let pages = Pages::allocate(100).expect("allocate");
    let bytes = unsafe { std::slice::from_raw_parts(pages.ptr as *const u8, pages.size) };
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn test_allocate_multiple_pages() {
    let page_size = mmap::get_page_size();
    let pages = Pages::allocate(page_size * 3 + 100).expect("allocate");
    assert_eq!(pages.size, page_size * 4);

    let pages = Pages::allocate(page_size).expect("allocate");
    assert_eq!(pages.size, page_size);
}

#[test]
fn test_granularity_is_page_multiple() {
    let page_size = mmap::get_page_size();
    assert!(page_size.is_power_of_two());
    assert!(mmap::get_allocation_granularity().is_multiple_of(page_size));
}

#[test]
fn test_map_unaligned_offset() {
    let mut file = tempfile::tempfile().unwrap();
    let data = (0..20000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>();
    file.write_all(&data).unwrap();

    let mapping = FileMapping::map(&file, 5003, 1000, false).unwrap();
    assert_eq!(mapping.len(), 1000);
    assert!(!mapping.is_writable());
    let view = unsafe { std::slice::from_raw_parts(mapping.as_ptr(), mapping.len()) };
    assert_eq!(view, &data[5003..6003]);
}

#[test]
fn test_map_empty_range_rejected() {
    let file = tempfile::tempfile().unwrap();
    let err = FileMapping::map(&file, 0, 0, false).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
}

#[test]
fn test_unmap_exactly_once() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&[7u8; 64]).unwrap();

    let mapping = FileMapping::map(&file, 0, 64, false).unwrap();
    assert!(mapping.is_mapped());
    assert!(mapping.unmap().unwrap());
    assert!(!mapping.unmap().unwrap());
    assert!(!mapping.is_mapped());
    assert!(mapping.as_ptr().is_null());
    assert!(mapping.flush().is_err());
}

#[cfg(any(unix, windows))]
#[test]
fn test_writable_map_persists() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&[0u8; 8192]).unwrap();

    let mapping = FileMapping::map(&file, 100, 16, true).unwrap();
    unsafe {
        std::ptr::copy_nonoverlapping(b"rawmem page test".as_ptr(), mapping.as_ptr(), 16);
    }
    mapping.flush().unwrap();
    drop(mapping);

    let mut buf = [0u8; 16];
    file.seek(SeekFrom::Start(100)).unwrap();
    file.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"rawmem page test");
}

struct Pages {
    ptr: *mut std::ffi::c_void,
    size: usize,
}

impl Pages {
    fn allocate(size: usize) -> std::io::Result<Pages> {
        let (ptr, size) = crate::mmap::allocate(size)?;
        Ok(Pages { ptr, size })
    }

    fn is_aligned(&self, alignment: usize) -> bool {
        (self.ptr as usize).is_multiple_of(alignment)
    }
}

impl Drop for Pages {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                crate::mmap::free(self.ptr, self.size).expect("free");
            }
        }
    }
}
