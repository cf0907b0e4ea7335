//! Little-endian unsigned integers as the target device stores them.

/// Read an `n`-byte little-endian unsigned integer from `buf` at `offset`.
///
/// # Panics
///
/// Panics if `n > 4` or the range is outside `buf`.
pub fn read_uint_le(buf: &[u8], offset: usize, n: usize) -> u32 {
    assert!(n <= 4, "at most 4 bytes fit in a u32");
    buf[offset..offset + n]
        .iter()
        .rev()
        .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte))
}

/// Write the low `n` bytes of `value` little-endian into `buf` at `offset`.
///
/// Returns the offset just past the last written byte.
///
/// # Panics
///
/// Panics if `n > 4` or the range is outside `buf`.
pub fn write_uint_le(value: u32, buf: &mut [u8], offset: usize, n: usize) -> usize {
    assert!(n <= 4, "at most 4 bytes fit in a u32");
    let bytes = value.to_le_bytes();
    buf[offset..offset + n].copy_from_slice(&bytes[..n]);
    offset + n
}
