use std::{
    alloc::{Layout, alloc_zeroed, dealloc},
    fs::File,
    io::{Read, Seek, SeekFrom},
};

/// Allocates memory using standard pages (emulated).
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = size
        .max(1)
        .checked_next_multiple_of(page_size)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;

    let layout = Layout::from_size_align(capacity, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    let ptr = unsafe { alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "Failed to allocate memory",
        ));
    }

    Ok((ptr as *mut std::ffi::c_void, capacity))
}

/// Frees memory that was allocated using standard pages.
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let page_size = get_page_size();
    assert!(size.is_multiple_of(page_size));

    let layout = Layout::from_size_align(size, page_size)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "Invalid layout"))?;

    unsafe {
        dealloc(ptr as *mut u8, layout);
    }
    Ok(())
}

/// Emulates a read-only file view by copying the range into page-allocated memory.
///
/// Writable views cannot be emulated without write-back and are rejected.
pub fn map_file(
    file: &File,
    offset: u64,
    len: usize,
    writable: bool,
) -> std::io::Result<*mut std::ffi::c_void> {
    if writable {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "writable file mapping is not supported on this platform",
        ));
    }
    let (ptr, capacity) = allocate(len)?;
    let bytes = unsafe { std::slice::from_raw_parts_mut(ptr as *mut u8, len) };
    let mut reader = file;
    let res = reader
        .seek(SeekFrom::Start(offset))
        .and_then(|_| reader.read_exact(bytes));
    if let Err(e) = res {
        unsafe { free(ptr, capacity)? };
        return Err(e);
    }
    Ok(ptr)
}

/// Releases an emulated view created by [`map_file`].
pub unsafe fn unmap_file(ptr: *mut std::ffi::c_void, len: usize) -> std::io::Result<()> {
    let capacity = len.max(1).next_multiple_of(get_page_size());
    unsafe { free(ptr, capacity) }
}

/// Emulated views are never writable, so there is nothing to write back.
pub unsafe fn flush_file(_ptr: *mut std::ffi::c_void, _len: usize) -> std::io::Result<()> {
    Ok(())
}

/// Returns the "standard page" size in bytes.
pub fn get_page_size() -> usize {
    4 * 1024
}

/// Returns the file offset alignment expected by [`map_file`].
pub fn get_allocation_granularity() -> usize {
    get_page_size()
}
