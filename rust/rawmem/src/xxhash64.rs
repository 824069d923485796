//! The 64-bit xxHash (XXH64), seeded.
//!
//! Input is consumed in 32-byte stripes by four lane accumulators, then the tail is folded
//! 8, 4 and 1 byte at a time. Lanes are always read little-endian, so the result does not
//! depend on the byte order of the view being hashed.

use rawmem_common::Result;

use crate::memory::Memory;

const P1: u64 = 0x9E37_79B1_85EB_CA87;
const P2: u64 = 0xC2B2_AE3D_27D4_EB4F;
const P3: u64 = 0x1656_67B1_9E37_79F9;
const P4: u64 = 0x85EB_CA77_C2B2_AE63;
const P5: u64 = 0x27D4_EB2F_1656_67C5;

const STRIPE: usize = 32;

#[inline(always)]
fn round(acc: u64, lane: u64) -> u64 {
    acc.wrapping_add(lane.wrapping_mul(P2))
        .rotate_left(31)
        .wrapping_mul(P1)
}

#[inline(always)]
fn merge_round(acc: u64, val: u64) -> u64 {
    (acc ^ round(0, val)).wrapping_mul(P1).wrapping_add(P4)
}

#[inline(always)]
fn avalanche(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(P2);
    h ^= h >> 29;
    h = h.wrapping_mul(P3);
    h ^ (h >> 32)
}

/// Hashes `input` with `seed`.
pub fn hash(input: &[u8], seed: u64) -> u64 {
    let (stripes, tail) = input.as_chunks::<STRIPE>();
    let mut h = if stripes.is_empty() {
        seed.wrapping_add(P5)
    } else {
        let mut v1 = seed.wrapping_add(P1).wrapping_add(P2);
        let mut v2 = seed.wrapping_add(P2);
        let mut v3 = seed;
        let mut v4 = seed.wrapping_sub(P1);
        for stripe in stripes {
            let [l1, l2, l3, l4]: &[[u8; 8]; 4] = bytemuck::cast_ref(stripe);
            v1 = round(v1, u64::from_le_bytes(*l1));
            v2 = round(v2, u64::from_le_bytes(*l2));
            v3 = round(v3, u64::from_le_bytes(*l3));
            v4 = round(v4, u64::from_le_bytes(*l4));
        }

        let h = v1
            .rotate_left(1)
            .wrapping_add(v2.rotate_left(7))
            .wrapping_add(v3.rotate_left(12))
            .wrapping_add(v4.rotate_left(18));
        [v1, v2, v3, v4]
            .into_iter()
            .fold(h, merge_round)
    };
    h = h.wrapping_add(input.len() as u64);

    let (words, mut rest) = tail.as_chunks::<8>();
    for word in words {
        h ^= round(0, u64::from_le_bytes(*word));
        h = h.rotate_left(27).wrapping_mul(P1).wrapping_add(P4);
    }
    if let Some((word, tail)) = rest.split_first_chunk::<4>() {
        h ^= (u32::from_le_bytes(*word) as u64).wrapping_mul(P1);
        h = h.rotate_left(23).wrapping_mul(P2).wrapping_add(P3);
        rest = tail;
    }
    for &b in rest {
        h ^= (b as u64).wrapping_mul(P5);
        h = h.rotate_left(11).wrapping_mul(P1);
    }
    avalanche(h)
}

/// Hashes the eight little-endian bytes of `value` with `seed`.
pub fn hash_u64(value: u64, seed: u64) -> u64 {
    let mut h = seed.wrapping_add(P5).wrapping_add(8);
    h ^= round(0, value);
    h = h.rotate_left(27).wrapping_mul(P1).wrapping_add(P4);
    avalanche(h)
}

impl Memory {
    /// XXH64 of `[offset, offset + length)` with `seed`.
    pub fn xxhash64(&self, offset: u64, length: u64, seed: u64) -> Result<u64> {
        self.state.check_valid_and_bounds(offset, length)?;
        let bytes = unsafe {
            std::slice::from_raw_parts(self.state.address(offset), length as usize)
        };
        Ok(hash(bytes, seed))
    }
}
