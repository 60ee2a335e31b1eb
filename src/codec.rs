//! Fixed-width little-endian primitives over a seekable stream.
//!
//! This is the only place in the crate that turns raw bytes into integers and
//! back; every other component (node I/O, the journal, the hash) goes
//! through here rather than hand-rolling `to_le_bytes` calls.

use std::io::{self, Read, Write};

pub fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_i32<W: Write>(w: &mut W, value: i32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn write_i64<W: Write>(w: &mut W, value: i64) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_u32<W: Write>(w: &mut W, value: u32) -> io::Result<()> {
    w.write_all(&value.to_le_bytes())
}

/// A 16-byte blob: signatures, GUIDs, and the fixed-width `Decimal` shape.
pub fn read_blob16<R: Read>(r: &mut R) -> io::Result<[u8; 16]> {
    let mut buf = [0u8; 16];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn write_blob16<W: Write>(w: &mut W, value: &[u8; 16]) -> io::Result<()> {
    w.write_all(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_i64() {
        let mut buf = Vec::new();
        write_i64(&mut buf, -42).unwrap();
        assert_eq!(read_i64(&mut Cursor::new(buf)).unwrap(), -42);
    }

    #[test]
    fn round_trips_blob16() {
        let value = [7u8; 16];
        let mut buf = Vec::new();
        write_blob16(&mut buf, &value).unwrap();
        assert_eq!(read_blob16(&mut Cursor::new(buf)).unwrap(), value);
    }
}
