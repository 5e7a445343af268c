//! The tree key: `(object_id, item_type, offset)`, totally ordered,
//! used both as a record identifier and as a range bound.

use std::fmt;

use crate::codec::{self, Record};
use crate::error::CodecError;

pub const KEY_SIZE: usize = 17;

/// A B-tree key. Field declaration order matches on-disk layout and the
/// derived `Ord` gives `(object_id, item_type, offset)` lexicographic
/// ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key {
    pub object_id: u64,
    pub item_type: u8,
    pub offset: u64,
}

impl Key {
    pub const fn new(object_id: u64, item_type: u8, offset: u64) -> Self {
        Self {
            object_id,
            item_type,
            offset,
        }
    }

    pub const fn min() -> Self {
        Self::new(0, 0, 0)
    }

    pub const fn max() -> Self {
        Self::new(u64::MAX, u8::MAX, u64::MAX)
    }

    /// The next key in lexicographic order, idempotent at `max()`.
    pub const fn successor(self) -> Self {
        if self.offset < u64::MAX {
            Self::new(self.object_id, self.item_type, self.offset + 1)
        } else if self.item_type < u8::MAX {
            Self::new(self.object_id, self.item_type + 1, 0)
        } else if self.object_id < u64::MAX {
            Self::new(self.object_id + 1, 0, 0)
        } else {
            self
        }
    }

    /// The previous key in lexicographic order, idempotent at `min()`.
    pub const fn predecessor(self) -> Self {
        if self.offset > 0 {
            Self::new(self.object_id, self.item_type, self.offset - 1)
        } else if self.item_type > 0 {
            Self::new(self.object_id, self.item_type - 1, u64::MAX)
        } else if self.object_id > 0 {
            Self::new(self.object_id - 1, u8::MAX, u64::MAX)
        } else {
            self
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.object_id, self.item_type, self.offset)
    }
}

codec::assert_field_layout!(
    0, 8;
    8, 1;
    9, 8;
    => KEY_SIZE
);

impl Record for Key {
    const STATIC_SIZE: usize = KEY_SIZE;

    fn marshal_into(&self, out: &mut [u8]) -> Result<(), CodecError> {
        if out.len() < KEY_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: KEY_SIZE,
                available: out.len(),
            });
        }
        codec::put_u64_le(&mut out[0..8], self.object_id);
        out[8] = self.item_type;
        codec::put_u64_le(&mut out[9..17], self.offset);
        Ok(())
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < KEY_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: KEY_SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            object_id: codec::get_u64_le(&buf[0..8]),
            item_type: buf[8],
            offset: codec::get_u64_le(&buf[9..17]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_successor_predecessor_arithmetic() {
        assert_eq!(Key::max(), Key::new(u64::MAX, 255, u64::MAX));

        assert_eq!(Key::new(0, 0, 0).successor(), Key::new(0, 0, 1));
        assert_eq!(
            Key::new(0, 0, 0xFFFF_FFFF_FFFF_FFFF).successor(),
            Key::new(0, 1, 0)
        );
        assert_eq!(
            Key::new(0, 255, 0xFFFF_FFFF_FFFF_FFFF).successor(),
            Key::new(1, 0, 0)
        );
        assert_eq!(Key::max().successor(), Key::max());
    }

    #[test]
    fn successor_predecessor_are_inverses_away_from_sentinels() {
        let k = Key::new(5, 10, 20);
        assert_eq!(k.successor().predecessor(), k);
        assert_eq!(k.predecessor().successor(), k);
    }

    #[test]
    fn sentinels_are_idempotent() {
        assert_eq!(Key::max().successor(), Key::max());
        assert_eq!(Key::min().predecessor(), Key::min());
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(Key::new(1, 0, 0) > Key::new(0, 255, u64::MAX));
        assert!(Key::new(1, 1, 0) > Key::new(1, 0, u64::MAX));
    }

    #[test]
    fn roundtrips_through_codec() {
        let k = Key::new(256, 0x84, 42);
        let bytes = codec::marshal(&k).unwrap();
        let (decoded, n) = codec::unmarshal::<Key>(&bytes).unwrap();
        assert_eq!(decoded, k);
        assert_eq!(n, KEY_SIZE);
    }
}
