//! The element serializer contract.
//!
//! The source this crate's behavior is modeled on discovered K/V (de)serializers
//! at runtime by reflecting over a type's methods. Rust has no runtime
//! reflection, and wants none here: the same contract is expressed as the
//! [`Codec`] trait, resolved at compile time. A type that does not implement
//! `Codec` simply does not satisfy `FileMap<K, V>`/`FileSet<K>`'s bounds, so
//! the "construction must fail immediately" requirement becomes a compile
//! error instead of a runtime one.
//!
//! Every primitive shape named in the specification has a provided impl:
//! integers, floats, `bool`, [`Char16`], [`Decimal`], [`Guid`], a nullable
//! UTF-8 string, [`NaiveTimestamp`], and `Vec<T>` of any of the above.

use std::io::{self, Read, Write};

use crate::codec;

/// Converts a value to and from the byte stream the engine stores item
/// payloads in.
///
/// Implementors must be deterministic: the same value must always produce
/// the same bytes, since those bytes are fed to the platform-stable hash
/// (`crate::hash::hash_code`) and compared byte-for-byte for key equality.
pub trait Codec: Sized {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()>;
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self>;

    /// Serialize to a freshly allocated buffer. Used by the hash table core
    /// to compute both the hash code and the on-disk item payload.
    fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }
}

macro_rules! impl_codec_for_int {
    ($($t:ty),+) => {
        $(
            impl Codec for $t {
                fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
                    w.write_all(&self.to_le_bytes())
                }

                fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    r.read_exact(&mut buf)?;
                    Ok(<$t>::from_le_bytes(buf))
                }
            }
        )+
    };
}

impl_codec_for_int!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl Codec for bool {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[if *self { 1 } else { 0 }])
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 1];
        r.read_exact(&mut buf)?;
        Ok(buf[0] != 0)
    }
}

/// A 16-bit UTF-16 code unit, matching the source's 16-bit `char`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Char16(pub u16);

impl Codec for Char16 {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0.to_le_bytes())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf)?;
        Ok(Char16(u16::from_le_bytes(buf)))
    }
}

/// An opaque 16-byte decimal bit pattern, round-tripped losslessly but not
/// interpreted. Callers who need arithmetic convert via their own
/// `rust_decimal`/`bigdecimal` glue outside this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal(pub [u8; 16]);

impl Codec for Decimal {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        codec::write_blob16(w, &self.0)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Decimal(codec::read_blob16(r)?))
    }
}

/// A 16-byte GUID in RFC-4122 byte order, used both for element payloads and
/// the file's own signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

impl Guid {
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Guid(*uuid.as_bytes())
    }

    pub fn to_uuid(self) -> uuid::Uuid {
        uuid::Uuid::from_bytes(self.0)
    }
}

impl Codec for Guid {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        codec::write_blob16(w, &self.0)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Guid(codec::read_blob16(r)?))
    }
}

/// `kind` distinguishes the handful of date-time representations the source
/// supports (UTC, local, unspecified); the engine does not interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NaiveTimestamp {
    pub kind: u8,
    pub ticks: i64,
}

impl Codec for NaiveTimestamp {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.kind])?;
        w.write_all(&self.ticks.to_le_bytes())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut kind = [0u8; 1];
        r.read_exact(&mut kind)?;
        let mut ticks = [0u8; 8];
        r.read_exact(&mut ticks)?;
        Ok(NaiveTimestamp {
            kind: kind[0],
            ticks: i64::from_le_bytes(ticks),
        })
    }
}

impl From<jiff::Timestamp> for NaiveTimestamp {
    fn from(ts: jiff::Timestamp) -> Self {
        NaiveTimestamp {
            kind: 0,
            ticks: ts.as_microsecond().saturating_mul(10),
        }
    }
}

/// Writes a .NET-style 7-bit-encoded (LEB128-like) length prefix.
fn write_7bit_length<W: Write>(w: &mut W, mut value: u32) -> io::Result<()> {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            w.write_all(&[byte])?;
            return Ok(());
        }
        w.write_all(&[byte | 0x80])?;
    }
}

fn read_7bit_length<R: Read>(r: &mut R) -> io::Result<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        result |= ((byte[0] & 0x7F) as u32) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 35 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "7-bit length prefix is too long",
            ));
        }
    }
}

/// Writes `value` (`None` meaning "null", matching the source's nullable
/// string contract) unconditionally, then an extra `isNull` boolean only when
/// the string is empty, so empty and null are distinguishable on disk.
pub fn write_nullable_string<W: Write>(w: &mut W, value: Option<&str>) -> io::Result<()> {
    let is_empty_or_null = value.map(str::is_empty).unwrap_or(true);
    let bytes = value.unwrap_or("").as_bytes();
    write_7bit_length(w, bytes.len() as u32)?;
    w.write_all(bytes)?;
    if is_empty_or_null {
        let is_null = value.is_none();
        w.write_all(&[if is_null { 1 } else { 0 }])?;
    }
    Ok(())
}

pub fn read_nullable_string<R: Read>(r: &mut R) -> io::Result<Option<String>> {
    let len = read_7bit_length(r)? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if len == 0 {
        let mut is_null = [0u8; 1];
        r.read_exact(&mut is_null)?;
        if is_null[0] != 0 {
            return Ok(None);
        }
    }
    Ok(Some(text))
}

impl Codec for String {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_nullable_string(w, Some(self.as_str()))
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(read_nullable_string(r)?.unwrap_or_default())
    }
}

impl Codec for Option<String> {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_nullable_string(w, self.as_deref())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        read_nullable_string(r)
    }
}

/// Any homogeneous sequence of codec-able elements: a 32-bit little-endian
/// count followed by that many serialized elements.
impl<T: Codec> Codec for Vec<T> {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let len = u32::try_from(self.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "sequence too long to serialize")
        })?;
        codec::write_u32(w, len)?;
        for item in self {
            item.write_to(w)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let len = codec::read_u32(r)? as usize;
        let mut items = Vec::with_capacity(len.min(1 << 20));
        for _ in 0..len {
            items.push(T::read_from(r)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn empty_string_is_one_zero_length_byte_plus_not_null() {
        let bytes = "".to_string().to_bytes().unwrap();
        assert_eq!(bytes, vec![0x00, 0x00]);
    }

    #[test]
    fn null_string_round_trips() {
        let none: Option<String> = None;
        let bytes = none.to_bytes().unwrap();
        let back = Option::<String>::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back, None);
    }

    #[test]
    fn non_empty_string_has_no_trailing_bool() {
        let bytes = "hi".to_string().to_bytes().unwrap();
        // 1-byte length prefix (2) + "hi"
        assert_eq!(bytes, vec![0x02, b'h', b'i']);
    }

    #[test]
    fn vec_round_trips() {
        let values: Vec<i32> = vec![1, 2, 3, -4];
        let bytes = values.to_bytes().unwrap();
        let back = Vec::<i32>::read_from(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn int_round_trips() {
        let bytes = 42i64.to_bytes().unwrap();
        assert_eq!(i64::read_from(&mut Cursor::new(bytes)).unwrap(), 42);
    }
}
