//! Orphan re-attach (component I): given nodes observed during scanning
//! but unreferenced by any known tree, and a set of partially rebuilt
//! interior nodes, finds a plausible parent for each orphan and splices
//! in a synthetic key pointer.
//!
//! Built from the containers (component C) and node engine (component F)
//! types the rest of the crate already establishes.

use std::collections::HashSet;

use crate::addr::LogicalAddr;
use crate::containers::Set;
use crate::key::Key;
use crate::node::{self, Body, Expectations, KeyPointer, NodeSource};

/// A partial interior node synthesized by upstream repair, not yet
/// linked from any tree it might belong to.
#[derive(Debug, Clone)]
pub struct RebuiltNode {
    pub level: u8,
    pub min_key: Key,
    pub max_key: Key,
    pub in_trees: Set<u64>,
    pub generation: u64,
    pub body_interior: Vec<KeyPointer>,
}

/// A synthetic key pointer appended to a rebuilt node's interior body,
/// plus bookkeeping on which trees it was attached under.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub orphan_addr: LogicalAddr,
    pub parent_index: usize,
    pub absorbed_by_trees: Vec<u64>,
}

/// Ancestry wildcard: when `parent_tree` lookup fails for a tree id, its
/// ancestry set gets this sentinel instead of stalling re-attachment.
pub const WILDCARD_TREE: u64 = 0;

struct OrphanInfo {
    addr: LogicalAddr,
    min_item: Key,
    max_item: Key,
    level: u8,
    generation: u64,
    owner: u64,
}

fn read_orphan_info(source: &impl NodeSource, addr: LogicalAddr) -> Option<OrphanInfo> {
    let exp = Expectations {
        l_addr: Some(addr),
        ..Default::default()
    };
    let (node, _err) = node::read_node(source, addr, &exp).ok()?;
    let (min_item, max_item) = match &node.body {
        Body::Leaf(items) => {
            if items.is_empty() {
                return None;
            }
            (items.first()?.key, items.last()?.key)
        }
        Body::Interior(ptrs) => {
            if ptrs.is_empty() {
                return None;
            }
            (ptrs.first()?.key, ptrs.last()?.key)
        }
    };
    Some(OrphanInfo {
        addr,
        min_item,
        max_item,
        level: node.head.level,
        generation: node.head.generation,
        owner: node.head.owner,
    })
}

/// Follows `parent_tree(t)` repeatedly to build the set of trees an
/// orphan might legitimately belong under. A failed lookup at any step
/// inserts [`WILDCARD_TREE`] and stops, rather than treating the chain
/// as dead.
fn ancestry_set(owner: u64, parent_tree: &impl Fn(u64) -> Option<u64>) -> HashSet<u64> {
    let mut set = HashSet::new();
    let mut current = owner;
    set.insert(current);
    loop {
        match parent_tree(current) {
            Some(parent) if !set.contains(&parent) => {
                set.insert(parent);
                current = parent;
            }
            Some(_) => break, // cycle guard
            None => {
                set.insert(WILDCARD_TREE);
                break;
            }
        }
    }
    set
}

fn buckets_by_level(rebuilt: &mut [RebuiltNode]) -> Vec<Vec<usize>> {
    let max_level = rebuilt.iter().map(|n| n.level).max().unwrap_or(0);
    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); max_level as usize + 1];
    for (i, node) in rebuilt.iter().enumerate() {
        buckets[node.level as usize].push(i);
    }
    for bucket in &mut buckets {
        bucket.sort_by_key(|&i| rebuilt[i].min_key);
    }
    buckets
}

/// Runs the re-attach algorithm. `orphans` is scanned ascending by
/// address; `parent_tree` resolves a tree's declared parent, if any.
/// Idempotent: running twice over the same `rebuilt` slice and orphan
/// set produces the same attachments (it only ever reads rebuilt nodes
/// to decide placement, and appends rather than mutating existing
/// pointers in a way that would change future decisions).
pub fn reattach(
    source: &impl NodeSource,
    mut orphans: Vec<LogicalAddr>,
    rebuilt: &mut [RebuiltNode],
    parent_tree: &impl Fn(u64) -> Option<u64>,
) -> Vec<Attachment> {
    orphans.sort();
    let buckets = buckets_by_level(rebuilt);
    let mut attachments = Vec::new();
    tracing::info!(orphan_count = orphans.len(), "starting orphan re-attach pass");

    for addr in orphans {
        let info = match read_orphan_info(source, addr) {
            Some(i) => i,
            None => {
                tracing::debug!(addr = %addr, "orphan unreadable, skipping");
                continue;
            }
        };
        let ancestry = ancestry_set(info.owner, parent_tree);

        let mut attached = false;
        for level in (info.level as usize + 1)..buckets.len() {
            if attached {
                break;
            }
            for pass in [false, true] {
                if attached {
                    break;
                }
                for &parent_idx in &buckets[level] {
                    let parent = &rebuilt[parent_idx];
                    let contains = parent.min_key <= info.min_item && info.max_item <= parent.max_key;
                    let generation_ok = parent.generation >= info.generation;
                    let trees_ok = if pass {
                        parent.in_trees.has(&WILDCARD_TREE)
                    } else {
                        ancestry.iter().any(|t| parent.in_trees.has(t))
                    };
                    if contains && generation_ok && trees_ok {
                        rebuilt[parent_idx].body_interior.push(KeyPointer {
                            key: info.min_item,
                            block_ptr: addr,
                            generation: info.generation,
                        });
                        attachments.push(Attachment {
                            orphan_addr: addr,
                            parent_index: parent_idx,
                            absorbed_by_trees: rebuilt[parent_idx].in_trees.iter().copied().collect(),
                        });
                        attached = true;
                        break;
                    }
                }
            }
        }
        if !attached {
            tracing::debug!(addr = %addr, "no plausible parent found for orphan");
        }
    }

    tracing::info!(attached = attachments.len(), "orphan re-attach pass complete");
    attachments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{CSum, CsumType};
    use crate::itembody;
    use crate::node::{Item, Node, NodeHeader};
    use crate::superblock::{Superblock, SUPERBLOCK_SIZE};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeSource {
        sb_bytes: Vec<u8>,
        nodes: Mutex<HashMap<u64, Vec<u8>>>,
    }

    impl FakeSource {
        fn new() -> Self {
            let mut data = vec![0u8; SUPERBLOCK_SIZE];
            data[0x40..0x48].copy_from_slice(b"_BHRfS_M");
            data[0x94..0x98].copy_from_slice(&512u32.to_le_bytes());
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

    fn leaf(addr: u64, owner: u64, key: Key) -> Node {
        let head = NodeHeader {
            checksum: CSum([0u8; 32]),
            metadata_uuid: Uuid::nil(),
            addr: LogicalAddr::from(addr),
            flags: 0,
            backref_rev: 0,
            chunk_tree_uuid: Uuid::nil(),
            generation: 3,
            owner,
            num_items: 1,
            level: 0,
        };
        let mut node = Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head,
            body: Body::Leaf(vec![Item {
                key,
                data: vec![1],
                body: itembody::decode(1, &[1]),
            }]),
            padding: Vec::new(),
        };
        let csum = node.calculate_checksum().unwrap();
        node.head.checksum = csum;
        node
    }

    fn rebuilt(min: Key, max: Key, generation: u64, trees: &[u64]) -> RebuiltNode {
        let mut set = Set::new();
        set.insert_from(trees.iter().copied());
        RebuiltNode {
            level: 1,
            min_key: min,
            max_key: max,
            in_trees: set,
            generation,
            body_interior: Vec::new(),
        }
    }

    #[test]
    fn attaches_orphan_to_containing_parent() {
        let src = FakeSource::new();
        let key = Key::new(5, 1, 0);
        src.put(0x2000, &leaf(0x2000, 5, key));

        let mut rebuilds = vec![rebuilt(Key::new(0, 0, 0), Key::new(100, 0, 0), 3, &[5])];
        let attachments = reattach(&src, vec![LogicalAddr::from(0x2000u64)], &mut rebuilds, &|_| None);

        assert_eq!(attachments.len(), 1);
        assert_eq!(rebuilds[0].body_interior.len(), 1);
        assert_eq!(rebuilds[0].body_interior[0].block_ptr, LogicalAddr::from(0x2000u64));
    }

    #[test]
    fn generation_too_old_parent_is_skipped() {
        let src = FakeSource::new();
        let key = Key::new(5, 1, 0);
        src.put(0x2000, &leaf(0x2000, 5, key));

        let mut rebuilds = vec![rebuilt(Key::new(0, 0, 0), Key::new(100, 0, 0), 1, &[5])];
        let attachments = reattach(&src, vec![LogicalAddr::from(0x2000u64)], &mut rebuilds, &|_| None);

        assert!(attachments.is_empty());
        assert!(rebuilds[0].body_interior.is_empty());
    }

    #[test]
    fn reattach_is_idempotent_in_attachment_count() {
        let src = FakeSource::new();
        let key = Key::new(5, 1, 0);
        src.put(0x2000, &leaf(0x2000, 5, key));

        let mut rebuilds = vec![rebuilt(Key::new(0, 0, 0), Key::new(100, 0, 0), 3, &[5])];
        let first = reattach(&src, vec![LogicalAddr::from(0x2000u64)], &mut rebuilds, &|_| None);
        let mut rebuilds2 = vec![rebuilt(Key::new(0, 0, 0), Key::new(100, 0, 0), 3, &[5])];
        let second = reattach(&src, vec![LogicalAddr::from(0x2000u64)], &mut rebuilds2, &|_| None);
        assert_eq!(first.len(), second.len());
    }
}
