//! Skinny path arena (component J).
//!
//! A fat `TreePath` copies every ancestor node's contents at each step,
//! which is wasteful when the same interior nodes are revisited across
//! many lookups. A skinny path instead stores indices into nodes the
//! arena already cached, and hydration re-reads only what isn't cached.
//!
//! The item cache is bounded by [`Tunable::path_item_cache_size`], the
//! same LRU-cache shape used elsewhere in the crate for bounding memory
//! on large filesystems. Node reads go through a [`SlicePool`] sized by
//! [`Tunable::slice_pool_size`] rather than allocating a fresh buffer
//! per read, since a deep inflate can revisit the same handful of node
//! sizes many times over.

use std::sync::Arc;

use crate::addr::LogicalAddr;
use crate::config::Tunable;
use crate::containers::{LruCache, SlicePool};
use crate::error::Result;
use crate::key::Key;
use crate::node::{self, Body, Expectations, Node, NodeSource};

/// One step in a path: the node it was found in, and the item or key
/// pointer index within that node.
#[derive(Debug, Clone)]
pub struct PathElement {
    pub node_addr: LogicalAddr,
    pub item_idx: usize,
    pub key: Key,
    pub child_ptr: Option<LogicalAddr>,
}

/// `{root_addr, items}`: a full path is recovered by inflating each
/// `(node_addr, item_idx)` pair through the arena's caches.
#[derive(Debug, Clone)]
pub struct SkinnyPath {
    pub root_addr: LogicalAddr,
    pub items: Vec<usize>,
}

struct CacheKey(LogicalAddr, usize);

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0 && self.1 == other.1
    }
}
impl Eq for CacheKey {}
impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_u64().hash(state);
        self.1.hash(state);
    }
}
impl Clone for CacheKey {
    fn clone(&self) -> Self {
        Self(self.0, self.1)
    }
}

/// Memoizes `node_addr -> node` and `(node_addr, item_idx) -> element`.
/// Both caches are LRU-bounded, via [`Tunable::node_cache_size`] and
/// [`Tunable::path_item_cache_size`] respectively, so memory use stays
/// flat on large filesystems.
pub struct PathArena<'a, S: NodeSource> {
    source: &'a S,
    nodes: LruCache<LogicalAddr, Arc<Node>>,
    items: LruCache<CacheKey, Arc<PathElement>>,
    bufs: SlicePool,
}

impl<'a, S: NodeSource> PathArena<'a, S> {
    pub fn new(source: &'a S, tunable: &Tunable) -> Self {
        Self {
            source,
            nodes: LruCache::new(tunable.node_cache_size),
            items: LruCache::new(tunable.path_item_cache_size),
            bufs: SlicePool::new(tunable.slice_pool_size),
        }
    }

    fn node_at(&self, addr: LogicalAddr) -> Result<Arc<Node>> {
        if let Some(n) = self.nodes.get(&addr) {
            return Ok(n);
        }
        let (node, _err) = node::read_node_with_pool(self.source, addr, &Expectations::default(), &self.bufs)
            .map_err(crate::error::ReconError::Node)?;
        let node = Arc::new(node);
        self.nodes.put(addr, node.clone());
        Ok(node)
    }

    /// Caches every sibling element of the node at `addr` in one pass,
    /// since reading the node already pulled all of them into memory.
    fn cache_siblings(&self, addr: LogicalAddr, node: &Node) {
        match &node.body {
            Body::Leaf(items) => {
                for (idx, item) in items.iter().enumerate() {
                    self.items.put(
                        CacheKey(addr, idx),
                        Arc::new(PathElement {
                            node_addr: addr,
                            item_idx: idx,
                            key: item.key,
                            child_ptr: None,
                        }),
                    );
                }
            }
            Body::Interior(ptrs) => {
                for (idx, ptr) in ptrs.iter().enumerate() {
                    self.items.put(
                        CacheKey(addr, idx),
                        Arc::new(PathElement {
                            node_addr: addr,
                            item_idx: idx,
                            key: ptr.key,
                            child_ptr: Some(ptr.block_ptr),
                        }),
                    );
                }
            }
        }
    }

    fn element_at(&self, addr: LogicalAddr, item_idx: usize) -> Result<Arc<PathElement>> {
        if let Some(e) = self.items.get(&CacheKey(addr, item_idx)) {
            return Ok(e);
        }
        let node = self.node_at(addr)?;
        self.cache_siblings(addr, &node);
        self.items
            .get(&CacheKey(addr, item_idx))
            .ok_or(crate::error::ReconError::NotFound)
    }

    /// Walks the skinny path's item chain, reading nodes as needed and
    /// returning the inflated element at each step, root to leaf.
    pub fn inflate(&self, path: &SkinnyPath) -> Result<Vec<Arc<PathElement>>> {
        let mut out = Vec::with_capacity(path.items.len());
        let mut addr = path.root_addr;
        for &item_idx in &path.items {
            let element = self.element_at(addr, item_idx)?;
            if let Some(child) = element.child_ptr {
                addr = child;
            }
            out.push(element);
        }
        Ok(out)
    }

    pub fn cached_item_count(&self) -> usize {
        self.items.len()
    }
}
