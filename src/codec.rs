//! Binary on-disk codec (component A).
//!
//! Fixed-layout little-endian records are declared by implementing
//! [`Record`] and asserting the field table with [`assert_field_layout`].
//! The assertion runs in a `const` context, so an offset/size mismatch is
//! a compile error rather than something discovered the first time a
//! record is encoded.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::CodecError;

/// A fixed-layout record that can be marshalled to and unmarshalled from
/// exactly `STATIC_SIZE` bytes.
pub trait Record: Sized {
    const STATIC_SIZE: usize;

    fn marshal_into(&self, out: &mut [u8]) -> Result<(), CodecError>;
    fn unmarshal(buf: &[u8]) -> Result<Self, CodecError>;
}

/// Marshals `value` into a freshly allocated buffer of `R::STATIC_SIZE` bytes.
pub fn marshal<R: Record>(value: &R) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![0u8; R::STATIC_SIZE];
    value.marshal_into(&mut buf)?;
    Ok(buf)
}

/// Unmarshals a record from the front of `buf`, returning it alongside the
/// number of bytes consumed (always `R::STATIC_SIZE`).
pub fn unmarshal<R: Record>(buf: &[u8]) -> Result<(R, usize), CodecError> {
    let value = R::unmarshal(buf)?;
    Ok((value, R::STATIC_SIZE))
}

/// The static size of a record type, for callers that only need the length.
pub const fn static_size<R: Record>() -> usize {
    R::STATIC_SIZE
}

/// Asserts, at compile time, that a record's declared `(offset, size)`
/// pairs are contiguous starting at zero and sum to `total` — the
/// record's end-marker size.
macro_rules! assert_field_layout {
    ($($off:expr, $siz:expr);+ $(;)? => $total:expr) => {
        const _: () = {
            let mut cursor: usize = 0;
            $(
                assert!(cursor == $off, "field offset does not match running cursor");
                cursor += $siz;
            )+
            assert!(cursor == $total, "sum of field sizes does not match end marker");
        };
    };
}
pub(crate) use assert_field_layout;

macro_rules! need_bytes {
    ($buf:expr, $n:expr) => {
        if $buf.len() < $n {
            return Err(CodecError::NeedNBytes {
                needed: $n,
                available: $buf.len(),
            });
        }
    };
}

pub fn get_u8(buf: &[u8]) -> Result<u8, CodecError> {
    need_bytes!(buf, 1);
    Ok(buf[0])
}

pub fn get_u16_le(buf: &[u8]) -> u16 {
    LittleEndian::read_u16(buf)
}

pub fn put_u16_le(buf: &mut [u8], v: u16) {
    LittleEndian::write_u16(buf, v)
}

pub fn get_u32_le(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(buf)
}

pub fn put_u32_le(buf: &mut [u8], v: u32) {
    LittleEndian::write_u32(buf, v)
}

pub fn get_u64_le(buf: &[u8]) -> u64 {
    LittleEndian::read_u64(buf)
}

pub fn put_u64_le(buf: &mut [u8], v: u64) {
    LittleEndian::write_u64(buf, v)
}

pub fn get_i64_le(buf: &[u8]) -> i64 {
    LittleEndian::read_i64(buf)
}

pub fn put_i64_le(buf: &mut [u8], v: i64) {
    LittleEndian::write_i64(buf, v)
}

/// Reads a generic unsigned integer in the given byte order, for the
/// handful of call sites that need to support both endiannesses rather
/// than committing to on-disk little-endian.
pub fn get_u32<E: ByteOrder>(buf: &[u8]) -> u32 {
    E::read_u32(buf)
}

pub fn put_u32<E: ByteOrder>(buf: &mut [u8], v: u32) {
    E::write_u32(buf, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Pair {
        a: u32,
        b: u64,
    }

    assert_field_layout!(0, 4; 4, 8; => 12);

    impl Record for Pair {
        const STATIC_SIZE: usize = 12;

        fn marshal_into(&self, out: &mut [u8]) -> Result<(), CodecError> {
            need_bytes!(out, 12);
            put_u32_le(&mut out[0..4], self.a);
            put_u64_le(&mut out[4..12], self.b);
            Ok(())
        }

        fn unmarshal(buf: &[u8]) -> Result<Self, CodecError> {
            need_bytes!(buf, 12);
            Ok(Self {
                a: get_u32_le(&buf[0..4]),
                b: get_u64_le(&buf[4..12]),
            })
        }
    }

    #[test]
    fn roundtrip_marshal_unmarshal() {
        let p = Pair { a: 0x1122_3344, b: 0x5566_7788_99aa_bbcc };
        let bytes = marshal(&p).unwrap();
        assert_eq!(bytes.len(), Pair::STATIC_SIZE);
        let (decoded, n) = unmarshal::<Pair>(&bytes).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(n, 12);
    }

    #[test]
    fn static_size_matches_declared_total() {
        assert_eq!(static_size::<Pair>(), 12);
    }

    #[test]
    fn insufficient_bytes_is_reported() {
        let short = [0u8; 4];
        let err = Pair::unmarshal(&short).unwrap_err();
        match err {
            CodecError::NeedNBytes { needed, available } => {
                assert_eq!(needed, 12);
                assert_eq!(available, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn marshal_then_unmarshal_roundtrips_on_exact_size_buffers() {
        for v in [0u64, 1, u64::MAX, 0x1234_5678] {
            let p = Pair { a: v as u32, b: v };
            let bytes = marshal(&p).unwrap();
            assert_eq!(bytes.len(), 12);
            let (back, consumed) = unmarshal::<Pair>(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(back, p);
        }
    }
}
