use std::{fs::File, os::fd::AsRawFd, sync::OnceLock};

/// Allocates memory using standard pages via mmap.
///
/// This function allocates `size` bytes of memory using the standard system page size,
/// which is typically 4KB on most systems. The allocation is page-aligned, zero-filled
/// and uses anonymous memory mapping.
///
/// # Returns
///
/// Returns a `Result` containing:
/// - `Ok((ptr, capacity))` - A tuple with a pointer to the allocated memory and the actual
///   capacity in bytes (which may be larger than the requested size due to page alignment)
/// - `Err(io::Error)` - An I/O error if the allocation fails
///
/// # Safety
///
/// The returned pointer must be deallocated using [`free`] with the same capacity value
/// to avoid memory leaks.
pub fn allocate(size: usize) -> std::io::Result<(*mut std::ffi::c_void, usize)> {
    let page_size = get_page_size();
    assert!(page_size.is_power_of_two());
    let capacity = size
        .max(1)
        .checked_next_multiple_of(page_size)
        .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            capacity,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        let err = std::io::Error::last_os_error();
        return Err(err);
    }
    Ok((ptr, capacity))
}

/// Frees memory that was allocated using standard pages.
///
/// # Safety
///
/// - `ptr` was returned by a previous call to [`allocate`]
/// - `size` matches the capacity returned by the allocation call
/// - The memory has not already been freed
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    let res = unsafe { libc::munmap(ptr, size) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Maps `len` bytes of `file`, starting at `offset`, into the address space of the process.
///
/// `offset` must be a multiple of [`get_allocation_granularity`]. The mapping is shared,
/// so writes through a writable view reach the file.
pub fn map_file(
    file: &File,
    offset: u64,
    len: usize,
    writable: bool,
) -> std::io::Result<*mut std::ffi::c_void> {
    assert!(offset.is_multiple_of(get_allocation_granularity() as u64));
    let offset = libc::off_t::try_from(offset)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let prot = if writable {
        libc::PROT_READ | libc::PROT_WRITE
    } else {
        libc::PROT_READ
    };
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len.max(1),
            prot,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            offset,
        )
    };
    if ptr.is_null() || ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error());
    }
    Ok(ptr)
}

/// Removes a view created by [`map_file`].
///
/// # Safety
///
/// `ptr` and `len` must describe a live mapping returned by [`map_file`].
pub unsafe fn unmap_file(ptr: *mut std::ffi::c_void, len: usize) -> std::io::Result<()> {
    unsafe { free(ptr, len.max(1)) }
}

/// Synchronously writes dirty pages of a file view back to the file.
///
/// # Safety
///
/// `ptr` and `len` must describe a live mapping returned by [`map_file`].
pub unsafe fn flush_file(ptr: *mut std::ffi::c_void, len: usize) -> std::io::Result<()> {
    let res = unsafe { libc::msync(ptr, len.max(1), libc::MS_SYNC) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Gets the system's standard page size in bytes.
///
/// The value is cached after the first call. If the page size cannot be determined,
/// returns a default value of 4KB (4,096 bytes).
pub fn get_page_size() -> usize {
    static SIZE: OnceLock<usize> = OnceLock::new();
    if let Some(&size) = SIZE.get() {
        size
    } else {
        match read_page_size() {
            Ok(size) => {
                let _ = SIZE.set(size);
                size
            }
            Err(_) => 4 * 1024,
        }
    }
}

/// Alignment required of file offsets passed to [`map_file`]. Equal to the page size on unix.
pub fn get_allocation_granularity() -> usize {
    get_page_size()
}

/// Reads the standard page size from the system using `sysconf(_SC_PAGESIZE)`.
fn read_page_size() -> std::io::Result<usize> {
    let res = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if res < 0 {
        return Err(std::io::Error::last_os_error());
    }
    assert!(res < i32::MAX as _);
    Ok(res as usize)
}
