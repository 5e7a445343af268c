//! Raw tree walker (component G): depth-first, left-to-right traversal
//! of a resolved tree root with expectation derivation for each child
//! from its parent's key pointers.
//!
//! Traversal is callback-driven rather than a single-path stack, so
//! every sibling at every level gets visited, not just the first
//! descent path.

use crate::addr::LogicalAddr;
use crate::error::NodeError;
use crate::key::Key;
use crate::node::{self, Body, Expectations, Node, NodeSource};

/// A root-to-current chain of logical addresses, cheap to clone because
/// trees are shallow in practice (a handful of levels).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path(pub Vec<LogicalAddr>);

impl Path {
    pub fn child(&self, addr: LogicalAddr) -> Self {
        let mut v = self.0.clone();
        v.push(addr);
        Self(v)
    }

    pub fn current(&self) -> Option<LogicalAddr> {
        self.0.last().copied()
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|a| a.to_string()).collect();
        write!(f, "{}", parts.join("/"))
    }
}

/// Callbacks invoked during a walk. Each has a default no-op so callers
/// only implement what they need.
pub trait WalkCallbacks {
    fn pre_node(&mut self, _path: &Path, _node: &Node) {}
    fn item(&mut self, _path: &Path, _item_key: Key, _item_idx: usize, _node: &Node) {}
    fn post_node(&mut self, _path: &Path, _node: &Node) {}
    fn bad_node(&mut self, _path: &Path, _exp: &Expectations, _err: &NodeError) {}

    /// Polled at the start of every node visit and between every item
    /// emission within a leaf; once true, the walk unwinds without
    /// visiting the rest of the node or any of its children.
    fn cancelled(&self) -> bool {
        false
    }
}

/// Walks the tree rooted at `root_addr` depth-first, left-to-right.
///
/// Owner/generation expectations for children are derived from the
/// parent's key pointers: `block_ptr`, `generation` directly from the
/// pointer, `level = parent.level - 1`, `min_item`/`max_item` from the
/// pointer's key and its right sibling's key (predecessor), falling back
/// to the parent's own bound at the rightmost child.
pub fn walk(
    source: &impl NodeSource,
    root_addr: LogicalAddr,
    owner: u64,
    cbs: &mut impl WalkCallbacks,
) {
    let exp = Expectations {
        l_addr: Some(root_addr),
        owner: Some(owner),
        ..Default::default()
    };
    walk_node(source, Path::default().child(root_addr), root_addr, exp, cbs);
}

fn walk_node(
    source: &impl NodeSource,
    path: Path,
    addr: LogicalAddr,
    exp: Expectations,
    cbs: &mut impl WalkCallbacks,
) {
    if cbs.cancelled() {
        return;
    }

    let (node, err) = match node::read_node(source, addr, &exp) {
        Ok(pair) => pair,
        Err(e) => {
            cbs.bad_node(&path, &exp, &e);
            return;
        }
    };
    if let Some(e) = &err {
        cbs.bad_node(&path, &exp, e);
    }

    cbs.pre_node(&path, &node);

    match &node.body {
        Body::Leaf(items) => {
            for (idx, item) in items.iter().enumerate() {
                if cbs.cancelled() {
                    return;
                }
                cbs.item(&path, item.key, idx, &node);
            }
        }
        Body::Interior(pointers) => {
            for (idx, ptr) in pointers.iter().enumerate() {
                let max_item = pointers
                    .get(idx + 1)
                    .map(|next| next.key.predecessor())
                    .or(exp.max_item);
                let child_exp = Expectations {
                    l_addr: Some(ptr.block_ptr),
                    level: Some(node.head.level.saturating_sub(1)),
                    generation: Some(ptr.generation),
                    owner: exp.owner,
                    min_item: Some(ptr.key),
                    max_item,
                };
                let child_path = path.child(ptr.block_ptr);
                walk_node(source, child_path, ptr.block_ptr, child_exp, cbs);
            }
        }
    }

    cbs.post_node(&path, &node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::CsumType;
    use crate::node::{Item, KeyPointer, NodeHeader};
    use crate::checksum::CSum;
    use crate::itembody;
    use crate::superblock::{Superblock, SUPERBLOCK_SIZE};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeSource {
        sb_bytes: Vec<u8>,
        nodes: Mutex<HashMap<u64, Vec<u8>>>,
    }

    impl FakeSource {
        fn new(node_size: u32) -> Self {
            let mut data = vec![0u8; SUPERBLOCK_SIZE];
            data[0x40..0x48].copy_from_slice(b"_BHRfS_M");
            data[0x94..0x98].copy_from_slice(&node_size.to_le_bytes());
            data[0x90..0x94].copy_from_slice(&4096u32.to_le_bytes());
            let csum = crc32c::crc32c(&data[0x20..]);
            data[0..4].copy_from_slice(&csum.to_le_bytes());
            Self {
                sb_bytes: data,
                nodes: Mutex::new(HashMap::new()),
            }
        }

        fn put(&self, addr: u64, node: &Node) {
            self.nodes.lock().unwrap().insert(addr, node.marshal().unwrap());
        }
    }

    impl NodeSource for FakeSource {
        fn superblock(&self) -> &Superblock {
            Box::leak(Box::new(Superblock::parse(&self.sb_bytes).unwrap()))
        }

        fn read_at(&self, addr: LogicalAddr, buf: &mut [u8]) -> std::io::Result<()> {
            let nodes = self.nodes.lock().unwrap();
            let data = nodes
                .get(&addr.as_u64())
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "missing"))?;
            buf.copy_from_slice(data);
            Ok(())
        }
    }

    fn header(addr: u64, level: u8, num_items: u32) -> NodeHeader {
        NodeHeader {
            checksum: CSum([0u8; 32]),
            metadata_uuid: Uuid::nil(),
            addr: LogicalAddr::from(addr),
            flags: 0,
            backref_rev: 0,
            chunk_tree_uuid: Uuid::nil(),
            generation: 1,
            owner: 5,
            num_items,
            level,
        }
    }

    fn finalize(mut node: Node) -> Node {
        let csum = node.calculate_checksum().unwrap();
        node.head.checksum = csum;
        node
    }

    #[derive(Default)]
    struct Recorder {
        visited_keys: Vec<Key>,
        bad_nodes: usize,
    }

    impl WalkCallbacks for Recorder {
        fn item(&mut self, _path: &Path, item_key: Key, _idx: usize, _node: &Node) {
            self.visited_keys.push(item_key);
        }
        fn bad_node(&mut self, _path: &Path, _exp: &Expectations, _err: &NodeError) {
            self.bad_nodes += 1;
        }
    }

    #[test]
    fn walks_leaf_children_left_to_right() {
        let src = FakeSource::new(512);

        let leaf_a = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x2000, 0, 1),
            body: Body::Leaf(vec![Item {
                key: Key::new(1, 1, 0),
                data: vec![1, 2, 3],
                body: itembody::decode(1, &[1, 2, 3]),
            }]),
            padding: Vec::new(),
        });
        let leaf_b = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x3000, 0, 1),
            body: Body::Leaf(vec![Item {
                key: Key::new(2, 1, 0),
                data: vec![4, 5, 6],
                body: itembody::decode(1, &[4, 5, 6]),
            }]),
            padding: Vec::new(),
        });
        src.put(0x2000, &leaf_a);
        src.put(0x3000, &leaf_b);

        let root = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x1000, 1, 2),
            body: Body::Interior(vec![
                KeyPointer {
                    key: Key::new(1, 1, 0),
                    block_ptr: LogicalAddr::from(0x2000u64),
                    generation: 1,
                },
                KeyPointer {
                    key: Key::new(2, 1, 0),
                    block_ptr: LogicalAddr::from(0x3000u64),
                    generation: 1,
                },
            ]),
            padding: Vec::new(),
        });
        src.put(0x1000, &root);

        let mut rec = Recorder::default();
        walk(&src, LogicalAddr::from(0x1000u64), 5, &mut rec);
        assert_eq!(rec.visited_keys, vec![Key::new(1, 1, 0), Key::new(2, 1, 0)]);
        assert_eq!(rec.bad_nodes, 0);
    }

    #[test]
    fn missing_child_reports_bad_node_but_continues() {
        let src = FakeSource::new(512);
        let root = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x1000, 1, 2),
            body: Body::Interior(vec![
                KeyPointer {
                    key: Key::new(1, 1, 0),
                    block_ptr: LogicalAddr::from(0x9000u64),
                    generation: 1,
                },
                KeyPointer {
                    key: Key::new(2, 1, 0),
                    block_ptr: LogicalAddr::from(0x3000u64),
                    generation: 1,
                },
            ]),
            padding: Vec::new(),
        });
        let leaf_b = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x3000, 0, 1),
            body: Body::Leaf(vec![Item {
                key: Key::new(2, 1, 0),
                data: vec![4],
                body: itembody::decode(1, &[4]),
            }]),
            padding: Vec::new(),
        });
        src.put(0x1000, &root);
        src.put(0x3000, &leaf_b);

        let mut rec = Recorder::default();
        walk(&src, LogicalAddr::from(0x1000u64), 5, &mut rec);
        assert_eq!(rec.bad_nodes, 1);
        assert_eq!(rec.visited_keys, vec![Key::new(2, 1, 0)]);
    }

    #[derive(Default)]
    struct CancelAfterFirstItem {
        visited_keys: Vec<Key>,
    }

    impl WalkCallbacks for CancelAfterFirstItem {
        fn item(&mut self, _path: &Path, item_key: Key, _idx: usize, _node: &Node) {
            self.visited_keys.push(item_key);
        }
        fn cancelled(&self) -> bool {
            !self.visited_keys.is_empty()
        }
    }

    #[test]
    fn cancellation_is_polled_between_item_emissions_within_a_leaf() {
        let src = FakeSource::new(512);
        let leaf = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x1000, 0, 3),
            body: Body::Leaf(vec![
                Item {
                    key: Key::new(1, 1, 0),
                    data: vec![1],
                    body: itembody::decode(1, &[1]),
                },
                Item {
                    key: Key::new(2, 1, 0),
                    data: vec![2],
                    body: itembody::decode(1, &[2]),
                },
                Item {
                    key: Key::new(3, 1, 0),
                    data: vec![3],
                    body: itembody::decode(1, &[3]),
                },
            ]),
            padding: Vec::new(),
        });
        src.put(0x1000, &leaf);

        let mut rec = CancelAfterFirstItem::default();
        walk(&src, LogicalAddr::from(0x1000u64), 5, &mut rec);
        assert_eq!(
            rec.visited_keys,
            vec![Key::new(1, 1, 0)],
            "cancellation mid-leaf must stop emission before the remaining items"
        );
    }
}
