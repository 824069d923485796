//! Page-granular native memory and file mappings.
//!
//! - [`mmap`]: platform primitives (page size, anonymous page allocation, file views).
//! - [`file_map`]: [`file_map::FileMapping`], an owned view of a byte range of a file.

pub mod file_map;

#[cfg_attr(unix, path = "mmap_unix.rs")]
#[cfg_attr(windows, path = "mmap_win.rs")]
#[cfg_attr(not(any(unix, windows)), path = "mmap_fallback.rs")]
pub mod mmap;

#[cfg(test)]
mod tests;
