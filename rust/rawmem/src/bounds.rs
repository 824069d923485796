//! Range validation.
//!
//! Two strengths are exposed: [`check_bounds`] for bulk operations and [`assert_bounds`]
//! for single-primitive accessors. Both are always executed and fail identically, so no
//! behavior depends on the build profile.

use rawmem_common::{Result, error::Error};

/// Verifies `offset + length <= capacity` without overflow.
#[inline]
pub fn check_bounds(offset: u64, length: u64, capacity: u64) -> Result<()> {
    match offset.checked_add(length) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(Error::out_of_range(offset, length, capacity)),
    }
}

/// Range check used by single-primitive accessors.
#[inline(always)]
pub fn assert_bounds(offset: u64, length: u64, capacity: u64) -> Result<()> {
    check_bounds(offset, length, capacity)
}

/// Byte length of `count` elements of `elem_size` bytes, reported as out of range
/// against `capacity` on overflow.
#[inline]
pub fn byte_len(offset: u64, count: usize, elem_size: usize, capacity: u64) -> Result<u64> {
    (count as u64)
        .checked_mul(elem_size as u64)
        .ok_or_else(|| Error::out_of_range(offset, u64::MAX, capacity))
}
