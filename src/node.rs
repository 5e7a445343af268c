//! Node engine (component F): header/key-pointer/item-header records,
//! leaf and interior body marshalling, checksum validation, and
//! expectation-checked reads.
//!
//! Every fixed-size record implements [`crate::codec::Record`], with
//! layouts asserted at compile time, so a header or pointer read can
//! never silently drift from its declared byte offsets.

use byteorder::{ByteOrder, LittleEndian};
use uuid::Uuid;

use crate::addr::LogicalAddr;
use crate::checksum::{CSum, CsumType};
use crate::codec::{self, Record};
use crate::error::{CodecError, MultiError, NodeError, NodeErrorKind, ReconError};
use crate::itembody::{self, ItemBody};
use crate::key::Key;
use crate::superblock::Superblock;

pub const HEADER_SIZE: usize = 101;
pub const KEY_POINTER_SIZE: usize = 33;
pub const ITEM_HEADER_SIZE: usize = 25;

/// A random-access source of node bytes, the seam the walker and
/// broken-tree index read through.
pub trait NodeSource {
    fn superblock(&self) -> &Superblock;
    fn read_at(&self, addr: LogicalAddr, buf: &mut [u8]) -> std::io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub checksum: CSum,
    pub metadata_uuid: Uuid,
    pub addr: LogicalAddr,
    pub flags: u64,
    pub backref_rev: u8,
    pub chunk_tree_uuid: Uuid,
    pub generation: u64,
    pub owner: u64,
    pub num_items: u32,
    pub level: u8,
}

fn read_u56_le(buf: &[u8]) -> u64 {
    let mut padded = [0u8; 8];
    padded[..7].copy_from_slice(&buf[..7]);
    LittleEndian::read_u64(&padded)
}

fn write_u56_le(buf: &mut [u8], v: u64) {
    let bytes = v.to_le_bytes();
    buf[..7].copy_from_slice(&bytes[..7]);
}

codec::assert_field_layout!(
    0, 32;
    32, 16;
    48, 8;
    56, 7;
    63, 1;
    64, 16;
    80, 8;
    88, 8;
    96, 4;
    100, 1;
    => HEADER_SIZE
);

impl Record for NodeHeader {
    const STATIC_SIZE: usize = HEADER_SIZE;

    fn marshal_into(&self, out: &mut [u8]) -> Result<(), CodecError> {
        if out.len() < HEADER_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: HEADER_SIZE,
                available: out.len(),
            });
        }
        out[0..32].copy_from_slice(&self.checksum.0);
        out[32..48].copy_from_slice(self.metadata_uuid.as_bytes());
        codec::put_u64_le(&mut out[48..56], self.addr.as_u64());
        write_u56_le(&mut out[56..63], self.flags);
        out[63] = self.backref_rev;
        out[64..80].copy_from_slice(self.chunk_tree_uuid.as_bytes());
        codec::put_u64_le(&mut out[80..88], self.generation);
        codec::put_u64_le(&mut out[88..96], self.owner);
        codec::put_u32_le(&mut out[96..100], self.num_items);
        out[100] = self.level;
        Ok(())
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < HEADER_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        let mut csum = [0u8; 32];
        csum.copy_from_slice(&buf[0..32]);
        let mut metadata_uuid = [0u8; 16];
        metadata_uuid.copy_from_slice(&buf[32..48]);
        let mut chunk_tree_uuid = [0u8; 16];
        chunk_tree_uuid.copy_from_slice(&buf[64..80]);
        Ok(Self {
            checksum: CSum(csum),
            metadata_uuid: Uuid::from_bytes(metadata_uuid),
            addr: LogicalAddr::from(codec::get_u64_le(&buf[48..56])),
            flags: read_u56_le(&buf[56..63]),
            backref_rev: buf[63],
            chunk_tree_uuid: Uuid::from_bytes(chunk_tree_uuid),
            generation: codec::get_u64_le(&buf[80..88]),
            owner: codec::get_u64_le(&buf[88..96]),
            num_items: codec::get_u32_le(&buf[96..100]),
            level: buf[100],
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPointer {
    pub key: Key,
    pub block_ptr: LogicalAddr,
    pub generation: u64,
}

codec::assert_field_layout!(0, 17; 17, 8; 25, 8; => KEY_POINTER_SIZE);

impl Record for KeyPointer {
    const STATIC_SIZE: usize = KEY_POINTER_SIZE;

    fn marshal_into(&self, out: &mut [u8]) -> Result<(), CodecError> {
        if out.len() < KEY_POINTER_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: KEY_POINTER_SIZE,
                available: out.len(),
            });
        }
        self.key.marshal_into(&mut out[0..17])?;
        codec::put_u64_le(&mut out[17..25], self.block_ptr.as_u64());
        codec::put_u64_le(&mut out[25..33], self.generation);
        Ok(())
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < KEY_POINTER_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: KEY_POINTER_SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            key: Key::unmarshal(&buf[0..17])?,
            block_ptr: LogicalAddr::from(codec::get_u64_le(&buf[17..25])),
            generation: codec::get_u64_le(&buf[25..33]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ItemHeader {
    key: Key,
    data_offset: u32,
    data_size: u32,
}

codec::assert_field_layout!(0, 17; 17, 4; 21, 4; => ITEM_HEADER_SIZE);

impl Record for ItemHeader {
    const STATIC_SIZE: usize = ITEM_HEADER_SIZE;

    fn marshal_into(&self, out: &mut [u8]) -> Result<(), CodecError> {
        if out.len() < ITEM_HEADER_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: ITEM_HEADER_SIZE,
                available: out.len(),
            });
        }
        self.key.marshal_into(&mut out[0..17])?;
        codec::put_u32_le(&mut out[17..21], self.data_offset);
        codec::put_u32_le(&mut out[21..25], self.data_size);
        Ok(())
    }

    fn unmarshal(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < ITEM_HEADER_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: ITEM_HEADER_SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            key: Key::unmarshal(&buf[0..17])?,
            data_offset: codec::get_u32_le(&buf[17..21]),
            data_size: codec::get_u32_le(&buf[21..25]),
        })
    }
}

/// A leaf item: its key, the raw on-disk body bytes (preserved for
/// faithful re-marshalling), and the body decoded per [`itembody::decode`].
#[derive(Debug, Clone)]
pub struct Item {
    pub key: Key,
    pub data: Vec<u8>,
    pub body: ItemBody,
}

#[derive(Debug, Clone)]
pub enum Body {
    Leaf(Vec<Item>),
    Interior(Vec<KeyPointer>),
}

/// A decoded node: fixed-size header, a leaf or interior body, and the
/// padding region between packed headers/pointers and the node's end.
///
/// `padding` is the literal free-space bytes captured off disk, not
/// necessarily zero — real leaves and interior nodes carry whatever was
/// written there before the item count shrank, so a faithful re-marshal
/// has to reproduce it rather than zero-fill it.
#[derive(Debug, Clone)]
pub struct Node {
    pub size: usize,
    pub checksum_type: CsumType,
    pub head: NodeHeader,
    pub body: Body,
    pub padding: Vec<u8>,
}

impl Node {
    /// Unmarshals a node from exactly `size` bytes of `buf`.
    pub fn unmarshal(buf: &[u8], checksum_type: CsumType) -> Result<Self, CodecError> {
        if buf.len() <= HEADER_SIZE {
            return Err(CodecError::NeedNBytes {
                needed: HEADER_SIZE + 1,
                available: buf.len(),
            });
        }
        let head = NodeHeader::unmarshal(buf)?;
        let body_buf = &buf[HEADER_SIZE..];

        let (body, padding) = if head.level > 0 {
            let mut pointers = Vec::with_capacity(head.num_items as usize);
            let mut off = 0usize;
            for _ in 0..head.num_items {
                if off + KEY_POINTER_SIZE > body_buf.len() {
                    return Err(CodecError::NeedNBytes {
                        needed: off + KEY_POINTER_SIZE,
                        available: body_buf.len(),
                    });
                }
                pointers.push(KeyPointer::unmarshal(&body_buf[off..off + KEY_POINTER_SIZE])?);
                off += KEY_POINTER_SIZE;
            }
            (Body::Interior(pointers), body_buf[off..].to_vec())
        } else {
            let mut items = Vec::with_capacity(head.num_items as usize);
            let mut head_cursor = 0usize;
            let mut tail_cursor = body_buf.len();
            for _ in 0..head.num_items {
                if head_cursor + ITEM_HEADER_SIZE > body_buf.len() {
                    return Err(CodecError::NeedNBytes {
                        needed: head_cursor + ITEM_HEADER_SIZE,
                        available: body_buf.len(),
                    });
                }
                let item_header =
                    ItemHeader::unmarshal(&body_buf[head_cursor..head_cursor + ITEM_HEADER_SIZE])?;
                head_cursor += ITEM_HEADER_SIZE;

                let data_offset = item_header.data_offset as usize;
                let data_size = item_header.data_size as usize;
                if head_cursor > tail_cursor
                    || data_offset < head_cursor
                    || data_offset + data_size != tail_cursor
                    || data_offset + data_size > body_buf.len()
                {
                    return Err(CodecError::InvalidType("node leaf layout"));
                }
                let data = body_buf[data_offset..data_offset + data_size].to_vec();
                let decoded = itembody::decode(item_header.key.item_type, &data);
                items.push(Item {
                    key: item_header.key,
                    data,
                    body: decoded,
                });
                tail_cursor = data_offset;
            }
            (Body::Leaf(items), body_buf[head_cursor..tail_cursor].to_vec())
        };

        Ok(Self {
            size: buf.len(),
            checksum_type,
            head,
            body,
            padding,
        })
    }

    /// Marshals this node back to exactly `self.size` bytes, writing
    /// `self.padding` into the free-space region between packed
    /// headers/pointers and packed data. If `self.padding` is shorter
    /// than that region (e.g. a hand-built node that never set it), the
    /// remainder is left zeroed rather than panicking.
    pub fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0u8; self.size];
        self.head.marshal_into(&mut buf[0..HEADER_SIZE])?;
        let body_buf = &mut buf[HEADER_SIZE..];

        let free = match &self.body {
            Body::Interior(pointers) => {
                let mut off = 0usize;
                for kp in pointers {
                    kp.marshal_into(&mut body_buf[off..off + KEY_POINTER_SIZE])?;
                    off += KEY_POINTER_SIZE;
                }
                off..body_buf.len()
            }
            Body::Leaf(items) => {
                let mut head_cursor = 0usize;
                let mut tail_cursor = body_buf.len();
                for item in items {
                    let data_offset = tail_cursor - item.data.len();
                    let header = ItemHeader {
                        key: item.key,
                        data_offset: data_offset as u32,
                        data_size: item.data.len() as u32,
                    };
                    header.marshal_into(&mut body_buf[head_cursor..head_cursor + ITEM_HEADER_SIZE])?;
                    body_buf[data_offset..data_offset + item.data.len()].copy_from_slice(&item.data);
                    head_cursor += ITEM_HEADER_SIZE;
                    tail_cursor = data_offset;
                }
                head_cursor..tail_cursor
            }
        };
        let take = self.padding.len().min(free.len());
        body_buf[free.start..free.start + take].copy_from_slice(&self.padding[..take]);

        Ok(buf)
    }

    /// Checksums the marshalled node, excluding the checksum field itself.
    pub fn calculate_checksum(&self) -> Result<CSum, CodecError> {
        let buf = self.marshal()?;
        Ok(self.checksum_type.sum(&buf[32..]))
    }

    pub fn validate_checksum(&self) -> Result<bool, CodecError> {
        Ok(self.calculate_checksum()? == self.head.checksum)
    }

    pub fn min_item_key(&self) -> Option<Key> {
        match &self.body {
            Body::Leaf(items) => items.first().map(|i| i.key),
            Body::Interior(ptrs) => ptrs.first().map(|p| p.key),
        }
    }

    pub fn max_item_key(&self) -> Option<Key> {
        match &self.body {
            Body::Leaf(items) => items.last().map(|i| i.key),
            Body::Interior(ptrs) => ptrs.last().map(|p| p.key),
        }
    }
}

/// Optional checks a node read is expected to satisfy; mismatches
/// accumulate rather than aborting the read.
#[derive(Debug, Clone, Copy, Default)]
pub struct Expectations {
    pub l_addr: Option<LogicalAddr>,
    pub level: Option<u8>,
    pub generation: Option<u64>,
    pub owner: Option<u64>,
    pub min_item: Option<Key>,
    pub max_item: Option<Key>,
}

/// Checks that an owner tree id is plausible. Tree id `0` is never a
/// valid owner; every real tree object id is nonzero.
fn validate_owner(owner: u64) -> Result<(), String> {
    if owner == 0 {
        Err("owner tree id is zero".to_string())
    } else {
        Ok(())
    }
}

fn check_expectations(node: &Node, exp: &Expectations) -> MultiError {
    let mut errors = MultiError::new();

    if let Some(want) = exp.l_addr {
        if node.head.addr != want {
            errors.push(ReconError::Other(format!(
                "claimed laddr {} does not match expected {want}",
                node.head.addr
            )));
        }
    }
    if let Some(want) = exp.level {
        if node.head.level != want {
            errors.push(ReconError::Other(format!(
                "level {} does not match expected {want}",
                node.head.level
            )));
        }
    }
    if let Some(want) = exp.generation {
        if node.head.generation != want {
            errors.push(ReconError::Other(format!(
                "generation {} does not match expected {want}",
                node.head.generation
            )));
        }
    }
    if let Err(reason) = validate_owner(node.head.owner) {
        errors.push(ReconError::Other(reason));
    }
    if let Some(want) = exp.owner {
        if node.head.owner != want {
            errors.push(ReconError::Other(format!(
                "owner {} does not match expected {want}",
                node.head.owner
            )));
        }
    }
    let num_items = match &node.body {
        Body::Leaf(items) => items.len(),
        Body::Interior(ptrs) => ptrs.len(),
    };
    if num_items == 0 {
        errors.push(ReconError::Other("node has zero items".to_string()));
    }
    if let Some(min_exp) = exp.min_item {
        if let Some(min_actual) = node.min_item_key() {
            if min_actual < min_exp {
                errors.push(ReconError::Other(format!(
                    "min item {min_actual} is below expected lower bound {min_exp}"
                )));
            }
        }
    }
    if let Some(max_exp) = exp.max_item {
        if let Some(max_actual) = node.max_item_key() {
            if max_actual > max_exp {
                errors.push(ReconError::Other(format!(
                    "max item {max_actual} is above expected upper bound {max_exp}"
                )));
            }
        }
    }
    errors
}

/// Reads and validates a node at `addr` against `sb` and `exp`.
///
/// Returns the node alongside any accumulated error: parsing and
/// checksum failures abort with `Err` and no node, but expectation
/// mismatches return `Ok((node, Some(err)))` so callers can still
/// inspect the contents of a node that failed validation.
pub fn read_node(
    source: &impl NodeSource,
    addr: LogicalAddr,
    exp: &Expectations,
) -> Result<(Node, Option<NodeError>), NodeError> {
    let node_size = source.superblock().node_size() as usize;
    let mut buf = vec![0u8; node_size.max(HEADER_SIZE)];
    read_node_into(source, addr, exp, &mut buf)
}

/// Like [`read_node`], but reads into a caller-supplied buffer instead of
/// allocating one — pairs with a [`crate::containers::SlicePool`] so a
/// full-filesystem walk, which reads millions of nodes of a handful of
/// distinct sizes, doesn't allocate a fresh buffer per read.
pub fn read_node_with_pool(
    source: &impl NodeSource,
    addr: LogicalAddr,
    exp: &Expectations,
    pool: &crate::containers::SlicePool,
) -> Result<(Node, Option<NodeError>), NodeError> {
    let node_size = source.superblock().node_size() as usize;
    let mut buf = pool.take(node_size.max(HEADER_SIZE));
    let result = read_node_into(source, addr, exp, &mut buf);
    pool.give(buf);
    result
}

fn read_node_into(
    source: &impl NodeSource,
    addr: LogicalAddr,
    exp: &Expectations,
    buf: &mut [u8],
) -> Result<(Node, Option<NodeError>), NodeError> {
    let sb = source.superblock();
    let node_size = sb.node_size() as usize;
    if node_size < HEADER_SIZE || buf.len() < node_size {
        return Err(NodeError::new("read_node", addr, NodeErrorKind::TooSmall(node_size)));
    }
    let buf = &mut buf[..node_size];

    source.read_at(addr, buf).map_err(|e| {
        tracing::debug!(addr = %addr, error = %e, "I/O error reading node");
        NodeError::new("read_node", addr, NodeErrorKind::Io(e))
    })?;

    let csum_type = CsumType::from_ondisk(sb.csum_type())
        .ok_or_else(|| NodeError::new("read_node", addr, NodeErrorKind::NotANode))?;

    let head = NodeHeader::unmarshal(buf)
        .map_err(|e| NodeError::new("read_node", addr, NodeErrorKind::Codec(e)))?;
    if head.metadata_uuid != sb.effective_metadata_uuid() {
        return Err(NodeError::new("read_node", addr, NodeErrorKind::NotANode));
    }

    // Checksum the literal bytes read off disk before parsing the body, so
    // corruption that also happens to break body decoding is still reported
    // as a checksum mismatch rather than a codec error.
    if csum_type.sum(&buf[32..]) != head.checksum {
        tracing::warn!(addr = %addr, "checksum mismatch reading node");
        return Err(NodeError::new("read_node", addr, NodeErrorKind::ChecksumMismatch));
    }

    let node = Node::unmarshal(buf, csum_type)
        .map_err(|e| NodeError::new("read_node", addr, NodeErrorKind::Codec(e)))?;

    let multi = check_expectations(&node, exp);
    if multi.is_empty() {
        Ok((node, None))
    } else {
        tracing::debug!(addr = %addr, "node read with expectation mismatches: {multi}");
        let err = NodeError::new("read_node", addr, NodeErrorKind::Expectations(multi));
        Ok((node, Some(err)))
    }
}
