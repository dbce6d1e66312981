//! Low-level little-endian primitives shared by the builder and the reader.
//!
//! Each read function reads exactly the bytes it promises or returns an
//! error - there is no partial-read ambiguity. The `put_*` functions append
//! to an in-memory table buffer and cannot fail.

use std::io::{self, Read, Write};

use crate::Result;

/// Read one byte.
#[inline]
pub(crate) fn u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

/// Read a little-endian `u16`.
#[inline]
pub(crate) fn le_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

/// Read a little-endian `u32`.
#[inline]
pub(crate) fn le_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// Read exactly `N` bytes into a fixed-size array.
#[inline]
pub(crate) fn bytesa<const N: usize>(r: &mut impl Read) -> Result<[u8; N]> {
    let mut b = [0u8; N];
    r.read_exact(&mut b)?;
    Ok(b)
}

/// Read exactly `len` bytes into a `Vec`.
#[inline]
pub(crate) fn bytesv<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut b = vec![0u8; len];
    r.read_exact(&mut b)?;
    Ok(b)
}

/// Decode a little-endian `u32` from `buf` at `at`.
///
/// Callers guarantee `at + 4 <= buf.len()`.
#[inline]
pub(crate) fn get_le_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

#[inline]
pub(crate) fn put_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

#[inline]
pub(crate) fn put_le_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_le_bytes());
}

#[inline]
pub(crate) fn put_le_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Round `n` up to the next multiple of `align` (a power of two).
#[inline]
pub(crate) const fn align_up(n: u64, align: u64) -> u64 {
    (n + align - 1) & !(align - 1)
}

/// [`align_up`] that reports overflow instead of wrapping.
#[inline]
pub(crate) const fn checked_align_up(n: u64, align: u64) -> Option<u64> {
    match n.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Write `len` zero bytes.
pub(crate) fn zeros<W: Write>(w: &mut W, len: u64) -> io::Result<()> {
    io::copy(&mut io::repeat(0).take(len), w)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_boundary() {
        assert_eq!(align_up(0, 0x200), 0);
        assert_eq!(align_up(1, 0x200), 0x200);
        assert_eq!(align_up(0x200, 0x200), 0x200);
        assert_eq!(align_up(0x201, 0x200), 0x400);
        assert_eq!(align_up(13, 4), 16);
        assert_eq!(checked_align_up(0x201, 0x200), Some(0x400));
        assert_eq!(checked_align_up(u64::MAX - 4, 0x200), None);
    }

    #[test]
    fn put_and_read_back() {
        let mut buf = Vec::new();
        put_u8(&mut buf, 0x83);
        put_le_u16(&mut buf, 0xF001);
        put_le_u32(&mut buf, 0xDEADBEEF);
        assert_eq!(buf, [0x83, 0x01, 0xF0, 0xEF, 0xBE, 0xAD, 0xDE]);

        let mut r = &buf[..];
        assert_eq!(u8(&mut r).unwrap(), 0x83);
        assert_eq!(le_u16(&mut r).unwrap(), 0xF001);
        assert_eq!(le_u32(&mut r).unwrap(), 0xDEADBEEF);
        assert!(u8(&mut r).is_err());
        assert_eq!(get_le_u32(&buf, 3), 0xDEADBEEF);
    }

    #[test]
    fn zeros_writes_exact_count() {
        let mut out = Vec::new();
        zeros(&mut out, 5).unwrap();
        assert_eq!(out, [0u8; 5]);
    }
}
