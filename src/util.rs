//! Utility functions for binary data processing.
//!
//! This module provides the low-level primitives shared by the container
//! parser and the resolver:
//! - Unaligned big-endian reads (FDT/FIT containers are big-endian on disk)
//! - SIMD-accelerated byte and magic searches (via memchr)
//! - Alignment helpers for walking the 4-byte-aligned FDT token stream

use byteorder::{BigEndian, ByteOrder};

// =============================================================================
// Unaligned Big-Endian Reads
// =============================================================================

/// Reads a big-endian u32 from an unaligned byte slice.
///
/// # Panics
///
/// Panics if `data.len() < 4`.
#[inline(always)]
pub fn read_u32_be(data: &[u8]) -> u32 {
    BigEndian::read_u32(data)
}

/// Reads a big-endian u32 from a byte slice at the given offset.
///
/// # Panics
///
/// Panics if `offset + 4 > data.len()`.
#[inline(always)]
pub fn read_u32_be_at(data: &[u8], offset: usize) -> u32 {
    BigEndian::read_u32(&data[offset..])
}

/// Reads a big-endian u64 from an unaligned byte slice.
///
/// # Panics
///
/// Panics if `data.len() < 8`.
#[inline(always)]
pub fn read_u64_be(data: &[u8]) -> u64 {
    BigEndian::read_u64(data)
}

// =============================================================================
// SIMD-Accelerated Byte Search
// =============================================================================

/// Finds the position of the first null byte in a slice.
///
/// Uses the `memchr` crate (AVX2/NEON vectorized where available).
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Returns an iterator over every occurrence of `needle` in `haystack`.
///
/// Used to sweep a firmware region for container magic candidates. The
/// returned offsets are relative to the start of `haystack` and strictly
/// ascending.
#[inline]
pub fn find_magic<'h>(haystack: &'h [u8], needle: &'h [u8]) -> impl Iterator<Item = usize> + 'h {
    memchr::memmem::find_iter(haystack, needle)
}

// =============================================================================
// Alignment Utilities
// =============================================================================

/// Aligns a value up to the given power-of-two alignment.
///
/// # Panics
///
/// Debug assertion fails if `alignment` is not a power of 2.
#[inline(always)]
pub const fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Checks if a value is aligned to the given power-of-two alignment.
#[inline(always)]
pub const fn is_aligned(value: usize, alignment: usize) -> bool {
    debug_assert!(alignment.is_power_of_two());
    (value & (alignment - 1)) == 0
}
