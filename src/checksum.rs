//! Checksums and short sums (component E).

use std::fmt;

use serde::Serialize as _;
use serde::Deserialize as _;

/// Checksum algorithm declared by a filesystem's superblock.
///
/// Only `Crc32c` is implemented; the others are declared so that
/// superblocks advertising them are recognized rather than rejected as
/// unsupported-feature, but calling [`CsumType::sum`] on them panics —
/// consistent and documented, per the source's own unimplemented-kind
/// contract (see design notes on `static_size`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsumType {
    Crc32C,
    XxHash,
    Sha256,
    Blake2,
}

impl CsumType {
    pub fn from_ondisk(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Crc32C),
            1 => Some(Self::XxHash),
            2 => Some(Self::Sha256),
            3 => Some(Self::Blake2),
            _ => None,
        }
    }

    /// Byte length of the significant checksum prefix.
    pub const fn size(self) -> usize {
        match self {
            Self::Crc32C => 4,
            Self::XxHash => 8,
            Self::Sha256 => 32,
            Self::Blake2 => 32,
        }
    }

    /// Computes a checksum over `data`, returning the full 32-byte buffer
    /// with only `size()` leading bytes significant.
    pub fn sum(self, data: &[u8]) -> CSum {
        match self {
            Self::Crc32C => {
                let crc = crc32c::crc32c(data);
                let mut buf = [0u8; CSUM_BUF_LEN];
                buf[..4].copy_from_slice(&crc.to_le_bytes());
                CSum(buf)
            }
            other => panic!("checksum type {other:?} not implemented"),
        }
    }

    /// The short sum (significant prefix only) of `data`.
    pub fn short_sum(self, data: &[u8]) -> ShortSum {
        let full = self.sum(data);
        ShortSum(full.0[..self.size()].to_vec())
    }
}

/// A 32-byte checksum buffer; only a type-dependent prefix is significant.
pub const CSUM_BUF_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CSum(pub [u8; CSUM_BUF_LEN]);

impl CSum {
    pub fn prefix(&self, ty: CsumType) -> &[u8] {
        &self.0[..ty.size()]
    }
}

impl fmt::Debug for CSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CSum({})", hex::encode(&self.0[..]))
    }
}

/// The significant prefix of a checksum for a given algorithm: an opaque
/// byte string of `CsumType::size()` length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortSum(pub Vec<u8>);

impl ShortSum {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ShortSum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Minimal hex codec shared by the checksum and sum-run JSON forms.
pub(crate) mod hex {
    pub fn encode(bytes: &[u8]) -> String {
        let mut s = String::with_capacity(bytes.len() * 2);
        for b in bytes {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, String> {
        if s.len() % 2 != 0 {
            return Err(format!("odd-length hex string: {s:?}"));
        }
        let bytes = s.as_bytes();
        let mut out = Vec::with_capacity(bytes.len() / 2);
        for pair in bytes.chunks(2) {
            let hi = nibble(pair[0])?;
            let lo = nibble(pair[1])?;
            out.push((hi << 4) | lo);
        }
        Ok(out)
    }

    fn nibble(b: u8) -> Result<u8, String> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(format!("invalid hex digit: {}", b as char)),
        }
    }
}

/// Maximum chunk length (in bytes) before a raw byte blob is serialized as
/// an array of hex strings instead of a single one.
const JSON_HEX_CHUNK: usize = 40;

/// Encodes an arbitrary byte blob as either a single hex string (≤40
/// bytes) or an array of 40-byte hex chunks (the trailing chunk may be
/// shorter), keeping JSON output readable for long sum runs.
pub fn chunked_hex_encode(bytes: &[u8]) -> serde_json::Value {
    if bytes.len() <= JSON_HEX_CHUNK {
        serde_json::Value::String(hex::encode(bytes))
    } else {
        serde_json::Value::Array(
            bytes
                .chunks(JSON_HEX_CHUNK)
                .map(|c| serde_json::Value::String(hex::encode(c)))
                .collect(),
        )
    }
}

/// Decodes the form produced by [`chunked_hex_encode`].
pub fn chunked_hex_decode(value: &serde_json::Value) -> Result<Vec<u8>, String> {
    match value {
        serde_json::Value::String(s) => hex::decode(s),
        serde_json::Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                let s = item
                    .as_str()
                    .ok_or_else(|| "expected a hex string in chunk array".to_string())?;
                out.extend(hex::decode(s)?);
            }
            Ok(out)
        }
        other => Err(format!("expected string or array of strings, got {other}")),
    }
}

impl serde::Serialize for ShortSum {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        chunked_hex_encode(&self.0).serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for ShortSum {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        chunked_hex_decode(&value)
            .map(ShortSum)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32c_matches_castagnoli_with_zero_padding() {
        let data = b"the quick brown fox";
        let csum = CsumType::Crc32C.sum(data);
        let expected = crc32c::crc32c(data).to_le_bytes();
        assert_eq!(&csum.0[..4], &expected[..]);
        assert_eq!(&csum.0[4..], &[0u8; 28][..]);
    }

    #[test]
    fn checksum_sizes() {
        assert_eq!(CsumType::Crc32C.size(), 4);
        assert_eq!(CsumType::XxHash.size(), 8);
        assert_eq!(CsumType::Sha256.size(), 32);
        assert_eq!(CsumType::Blake2.size(), 32);
    }

    #[test]
    fn from_ondisk_rejects_unknown() {
        assert_eq!(CsumType::from_ondisk(0), Some(CsumType::Crc32C));
        assert_eq!(CsumType::from_ondisk(99), None);
    }

    #[should_panic(expected = "not implemented")]
    #[test]
    fn unimplemented_algorithms_panic_consistently() {
        let _ = CsumType::Sha256.sum(b"data");
    }

    #[test]
    fn chunked_hex_short_input() {
        let v = chunked_hex_encode(b"xyz");
        assert_eq!(v, serde_json::Value::String("78797a".to_string()));
    }

    #[test]
    fn chunked_hex_exactly_at_boundary() {
        let data = vec![0xABu8; 40];
        let v = chunked_hex_encode(&data);
        assert!(matches!(v, serde_json::Value::String(_)));
    }

    #[test]
    fn chunked_hex_over_boundary_splits() {
        let data = vec![0xCDu8; 47];
        let v = chunked_hex_encode(&data);
        match &v {
            serde_json::Value::Array(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].as_str().unwrap().len(), 80); // 40 bytes
                assert_eq!(items[1].as_str().unwrap().len(), 14); // 7 bytes
            }
            other => panic!("expected array, got {other:?}"),
        }
        let decoded = chunked_hex_decode(&v).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn chunked_hex_roundtrip_decode() {
        let data = vec![1u8, 2, 3, 4, 5];
        let v = chunked_hex_encode(&data);
        assert_eq!(chunked_hex_decode(&v).unwrap(), data);
    }

    #[test]
    fn short_sum_serde_roundtrip() {
        let s = ShortSum(b"xyz".to_vec());
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"78797a\"");
        let back: ShortSum = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
