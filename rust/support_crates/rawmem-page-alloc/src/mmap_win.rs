use std::{fs::File, os::windows::io::AsRawHandle, sync::OnceLock};
use windows_sys::Win32::{
    Foundation::{CloseHandle, GetLastError, HANDLE},
    System::{
        Memory::{
            CreateFileMappingW, FILE_MAP_READ, FILE_MAP_WRITE, FlushViewOfFile, MEM_COMMIT,
            MEM_RELEASE, MEM_RESERVE, MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, PAGE_READONLY,
            PAGE_READWRITE, UnmapViewOfFile, VirtualAlloc, VirtualFree,
        },
        SystemInformation::{GetSystemInfo, SYSTEM_INFO},
    },
};

/// Allocates memory using standard pages via `VirtualAlloc`.
///
/// The returned capacity is `size` rounded up to the page size; the memory is zero-filled,
/// readable and writable.
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

    unsafe {
        let ptr = VirtualAlloc(
            std::ptr::null_mut(),
            capacity,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_READWRITE,
        );
        if ptr.is_null() {
            return Err(last_error());
        }
        Ok((ptr, capacity))
    }
}

/// Frees memory that was allocated using standard pages.
///
/// # Safety
///
/// - `ptr` was returned by a previous call to [`allocate`]
/// - `size` matches the capacity returned by the allocation call
/// - The memory has not already been freed
pub unsafe fn free(ptr: *mut std::ffi::c_void, size: usize) -> std::io::Result<()> {
    assert!(size.is_multiple_of(get_page_size()));
    unsafe {
        if VirtualFree(ptr, 0, MEM_RELEASE) == 0 {
            return Err(last_error());
        }
    }
    Ok(())
}

/// Maps `len` bytes of `file`, starting at `offset`, into the address space of the process.
///
/// `offset` must be a multiple of [`get_allocation_granularity`]. The section object is
/// closed right away; the view keeps it alive until [`unmap_file`].
pub fn map_file(
    file: &File,
    offset: u64,
    len: usize,
    writable: bool,
) -> std::io::Result<*mut std::ffi::c_void> {
    assert!(offset.is_multiple_of(get_allocation_granularity() as u64));
    let (protect, access) = if writable {
        (PAGE_READWRITE, FILE_MAP_READ | FILE_MAP_WRITE)
    } else {
        (PAGE_READONLY, FILE_MAP_READ)
    };
    unsafe {
        let section = CreateFileMappingW(
            file.as_raw_handle() as HANDLE,
            std::ptr::null(),
            protect,
            0,
            0,
            std::ptr::null(),
        );
        if section.is_null() {
            return Err(last_error());
        }
        let view = MapViewOfFile(
            section,
            access,
            (offset >> 32) as u32,
            offset as u32,
            len.max(1),
        );
        let err = if view.Value.is_null() {
            Some(last_error())
        } else {
            None
        };
        CloseHandle(section);
        match err {
            Some(err) => Err(err),
            None => Ok(view.Value),
        }
    }
}

/// Removes a view created by [`map_file`].
///
/// # Safety
///
/// `ptr` must be the base of a live view returned by [`map_file`].
pub unsafe fn unmap_file(ptr: *mut std::ffi::c_void, _len: usize) -> std::io::Result<()> {
    unsafe {
        if UnmapViewOfFile(MEMORY_MAPPED_VIEW_ADDRESS { Value: ptr }) == 0 {
            return Err(last_error());
        }
    }
    Ok(())
}

/// Writes dirty pages of a file view back to the file.
///
/// # Safety
///
/// `ptr` and `len` must describe a live view returned by [`map_file`].
pub unsafe fn flush_file(ptr: *mut std::ffi::c_void, len: usize) -> std::io::Result<()> {
    unsafe {
        if FlushViewOfFile(ptr, len.max(1)) == 0 {
            return Err(last_error());
        }
    }
    Ok(())
}

/// Gets the system's standard page size in bytes, cached after the first call.
pub fn get_page_size() -> usize {
    system_info().0
}

/// Alignment required of file offsets passed to [`map_file`], typically 64KB.
pub fn get_allocation_granularity() -> usize {
    system_info().1
}

fn system_info() -> (usize, usize) {
    static INFO: OnceLock<(usize, usize)> = OnceLock::new();

    *INFO.get_or_init(|| unsafe {
        let mut system_info: SYSTEM_INFO = std::mem::zeroed();
        GetSystemInfo(&mut system_info);
        (
            system_info.dwPageSize as usize,
            system_info.dwAllocationGranularity as usize,
        )
    })
}

fn last_error() -> std::io::Error {
    let error = unsafe { GetLastError() };
    std::io::Error::from_raw_os_error(error as i32)
}
