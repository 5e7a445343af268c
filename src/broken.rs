//! Broken-tree index (component H): a facade that tolerantly walks each
//! tree once, on first query, and answers lookups against the resulting
//! ordered index instead of the tree's own (possibly locally-violated)
//! ordering.
//!
//! A tree is resolved once from the superblock or the root tree and then
//! cached; an error interval tree records exactly which key ranges may be
//! hiding an unreadable match so a lookup miss can be told apart from a
//! lookup into a damaged region.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::sync::Arc;
use std::time::Duration;

use crate::addr::LogicalAddr;
use crate::config::{CancellationToken, Tunable};
use crate::containers::{IntervalTree, OrderedMap};
use crate::error::{MultiError, NodeError, ReconError, Result};
use crate::itembody::{item_type, ItemBody};
use crate::key::Key;
use crate::node::{self, Body, Expectations, Node, NodeSource};
use crate::progress::Progress;
use crate::superblock::well_known_tree;
use crate::walk::{self, Path, WalkCallbacks};

#[derive(Debug, Clone)]
pub struct IndexValue {
    pub path: Path,
    pub item_size: usize,
}

#[derive(Debug, Clone)]
pub struct IndexError {
    pub path: Path,
    pub message: String,
}

/// The per-tree index built by one tolerant walk.
pub struct TreeIndex {
    pub root_err: Option<String>,
    pub items: OrderedMap<Key, IndexValue>,
    pub errors: IntervalTree<Key, IndexError>,
    pub fatal: Option<String>,
}

impl TreeIndex {
    fn empty() -> Self {
        Self {
            root_err: None,
            items: OrderedMap::new(),
            errors: IntervalTree::new(),
            fatal: None,
        }
    }
}

struct Builder {
    items: OrderedMap<Key, IndexValue>,
    errors: IntervalTree<Key, IndexError>,
    fatal: Option<String>,
    cancel: CancellationToken,
    progress: Progress<usize>,
}

impl WalkCallbacks for Builder {
    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
    fn item(&mut self, path: &Path, item_key: Key, idx: usize, node: &Node) {
        if self.fatal.is_some() {
            return;
        }
        let item_size = match &node.body {
            Body::Leaf(items) => items.get(idx).map(|i| i.data.len()).unwrap_or(0),
            Body::Interior(_) => 0,
        };
        if self.items.lookup(&item_key).is_some() {
            self.fatal = Some(format!("duplicate item key {item_key} while indexing a broken tree"));
            return;
        }
        self.items.insert(
            item_key,
            IndexValue {
                path: path.clone(),
                item_size,
            },
        );
        self.progress.set(self.items.len());
    }

    fn bad_node(&mut self, path: &Path, exp: &Expectations, err: &NodeError) {
        let min_key = exp.min_item.unwrap_or(Key::min());
        let max_key = exp.max_item.unwrap_or(Key::max());
        self.errors.insert(
            min_key,
            max_key,
            IndexError {
                path: path.clone(),
                message: err.to_string(),
            },
        );
    }
}

/// The broken-tree facade: lazily indexes each tree the first time it is
/// queried, and never more than once (first-builder-wins on concurrent
/// access to the same tree id).
pub struct BrokenTree<'a, S: NodeSource> {
    source: &'a S,
    indices: Mutex<HashMap<u64, Arc<OnceLock<Arc<TreeIndex>>>>>,
    cancel: CancellationToken,
    progress_interval: Duration,
}

impl<'a, S: NodeSource> BrokenTree<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self::with_config(source, CancellationToken::new(), &Tunable::default())
    }

    /// Like [`Self::new`], but a caller-supplied token aborts any
    /// in-progress tree build (and further index lookups, which would
    /// otherwise trigger a fresh build) once cancelled.
    pub fn with_cancellation(source: &'a S, cancel: CancellationToken) -> Self {
        Self::with_config(source, cancel, &Tunable::default())
    }

    /// Like [`Self::new`], but takes a cancellation token and the tunable
    /// that governs how often an in-progress tree build logs its item
    /// count (`tunable.progress_interval_ms`).
    pub fn with_config(source: &'a S, cancel: CancellationToken, tunable: &Tunable) -> Self {
        Self {
            source,
            indices: Mutex::new(HashMap::new()),
            cancel,
            progress_interval: Duration::from_millis(tunable.progress_interval_ms),
        }
    }

    fn slot(&self, tree_id: u64) -> Arc<OnceLock<Arc<TreeIndex>>> {
        let mut map = self.indices.lock().unwrap();
        map.entry(tree_id).or_insert_with(|| Arc::new(OnceLock::new())).clone()
    }

    /// Resolves the root `(addr, level)` of `tree_id`. The root tree and
    /// other well-known trees resolve directly from the superblock;
    /// anything else is found by searching the root tree through this
    /// same facade — safe because the root tree path above never recurses.
    fn resolve_root(&self, tree_id: u64) -> std::result::Result<(LogicalAddr, u8), String> {
        let sb = self.source.superblock();
        if tree_id == well_known_tree::ROOT {
            return Ok((sb.root_addr(), sb.root_level()));
        }
        if tree_id == well_known_tree::CHUNK {
            return Ok((sb.chunk_root_addr(), sb.chunk_root_level()));
        }
        if tree_id == well_known_tree::LOG {
            return sb
                .log_root_addr()
                .map(|addr| (addr, 0))
                .ok_or_else(|| "filesystem has no log tree".to_string());
        }

        let key = Key::new(tree_id, item_type::ROOT_ITEM, 0);
        let (item, _errs) = self
            .tree_lookup(well_known_tree::ROOT, key)
            .map_err(|e| format!("resolving root descriptor for tree {tree_id}: {e}"))?;
        match item {
            ItemBody::Root(root) => Ok((LogicalAddr::from(root.bytenr), root.level)),
            other => Err(format!("root item for tree {tree_id} decoded as {other:?}")),
        }
    }

    /// Turns every recorded error interval in `errors` into a `MultiError`,
    /// or `None` when there is nothing to attach.
    fn attach_errors(errors: Vec<&IndexError>) -> Option<MultiError> {
        if errors.is_empty() {
            return None;
        }
        let mut multi = MultiError::new();
        for e in errors {
            multi.push(ReconError::Other(format!("{:?}: {}", e.path, e.message)));
        }
        Some(multi)
    }

    fn index(&self, tree_id: u64) -> Arc<TreeIndex> {
        let slot = self.slot(tree_id);
        slot.get_or_init(|| Arc::new(self.build_index(tree_id))).clone()
    }

    fn build_index(&self, tree_id: u64) -> TreeIndex {
        tracing::info!(tree_id, "building broken-tree index");
        let (root_addr, _level) = match self.resolve_root(tree_id) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(tree_id, error = %e, "could not resolve tree root");
                let mut idx = TreeIndex::empty();
                idx.root_err = Some(e);
                return idx;
            }
        };

        let mut builder = Builder {
            items: OrderedMap::new(),
            errors: IntervalTree::new(),
            fatal: None,
            cancel: self.cancel.clone(),
            progress: Progress::new(self.progress_interval, move |rendered| {
                tracing::info!(tree_id, items = rendered, "indexing broken tree");
            }),
        };
        walk::walk(self.source, root_addr, tree_id, &mut builder);
        builder.progress.done();

        if self.cancel.is_cancelled() {
            tracing::info!(tree_id, "tree build cancelled");
        }

        tracing::info!(
            tree_id,
            items = builder.items.len(),
            errors = builder.errors.len(),
            "broken-tree index built"
        );

        TreeIndex {
            root_err: None,
            items: builder.items,
            errors: builder.errors,
            fatal: builder.fatal,
        }
    }

    fn item_data(&self, value: &IndexValue, key: Key) -> Result<ItemBody> {
        let addr = value
            .path
            .current()
            .ok_or_else(|| ReconError::Other("index value has empty path".to_string()))?;
        let (node, _err) = node::read_node(self.source, addr, &Expectations::default())
            .map_err(ReconError::Node)?;
        match &node.body {
            Body::Leaf(items) => items
                .iter()
                .find(|i| i.key == key)
                .map(|i| i.body.clone())
                .ok_or(ReconError::NotFound),
            Body::Interior(_) => Err(ReconError::Other("indexed path resolved to an interior node".to_string())),
        }
    }

    /// Looks up exactly one key, returning its decoded body. Any error
    /// intervals covering `key` are attached as a best-effort warning
    /// alongside the successful result, not surfaced as a hard failure.
    pub fn tree_lookup(&self, tree_id: u64, key: Key) -> Result<(ItemBody, Option<MultiError>)> {
        if self.cancel.is_cancelled() {
            return Err(ReconError::Cancelled(crate::error::Cancelled));
        }
        let idx = self.index(tree_id);
        if let Some(fatal) = &idx.fatal {
            return Err(ReconError::Other(fatal.clone()));
        }
        if let Some(root_err) = &idx.root_err {
            return Err(ReconError::Other(root_err.clone()));
        }
        match idx.items.lookup(&key) {
            Some(value) => {
                let body = self.item_data(value, key)?;
                Ok((body, Self::attach_errors(idx.errors.search_all(key))))
            }
            None => Err(ReconError::NotFound),
        }
    }

    /// Returns one item for which `cmp(key) == Equal`, or `NotFound`.
    pub fn tree_search(&self, tree_id: u64, cmp: impl Fn(&Key) -> std::cmp::Ordering) -> Result<(Key, ItemBody)> {
        let idx = self.index(tree_id);
        if let Some(fatal) = &idx.fatal {
            return Err(ReconError::Other(fatal.clone()));
        }
        let mut result = None;
        idx.items.walk(|k, v| {
            if result.is_none() && cmp(k) == std::cmp::Ordering::Equal {
                result = Some((*k, v.clone()));
            }
        });
        match result {
            Some((key, value)) => self.item_data(&value, key).map(|body| (key, body)),
            None => Err(ReconError::NotFound),
        }
    }

    /// Every item in `[min, max]`, plus a multi-error listing every
    /// recorded error interval that intersects the range.
    pub fn tree_search_all(&self, tree_id: u64, min: Key, max: Key) -> (Vec<(Key, ItemBody)>, Option<MultiError>) {
        let idx = self.index(tree_id);
        let mut out = Vec::new();
        idx.items.walk(|k, v| {
            if *k >= min && *k <= max {
                if let Ok(body) = self.item_data(v, *k) {
                    out.push((*k, body));
                }
            }
        });
        let errs = Self::attach_errors(idx.errors.search_range(min, max));
        (out, errs)
    }

    /// Iterates every item in key order, reading leaf nodes on demand.
    pub fn tree_walk(&self, tree_id: u64, mut cb: impl FnMut(Key, &ItemBody)) {
        let idx = self.index(tree_id);
        let mut cache: Option<(LogicalAddr, Arc<Node>)> = None;
        idx.items.walk(|k, v| {
            let addr = match v.path.current() {
                Some(a) => a,
                None => return,
            };
            let node = match &cache {
                Some((cached_addr, node)) if *cached_addr == addr => node.clone(),
                _ => match node::read_node(self.source, addr, &Expectations::default()) {
                    Ok((node, _)) => {
                        let node = Arc::new(node);
                        cache = Some((addr, node.clone()));
                        node
                    }
                    Err(_) => return,
                },
            };
            if let Body::Leaf(items) = &node.body {
                if let Some(item) = items.iter().find(|i| i.key == *k) {
                    cb(*k, &item.body);
                }
            }
        });
    }

    /// All error intervals recorded for `tree_id` that intersect `key`.
    pub fn errors_covering(&self, tree_id: u64, key: Key) -> Vec<IndexError> {
        let idx = self.index(tree_id);
        idx.errors.search_all(key).into_iter().cloned().collect()
    }

    pub fn item_count(&self, tree_id: u64) -> usize {
        self.index(tree_id).items.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{CSum, CsumType};
    use crate::itembody;
    use crate::node::{Item, NodeHeader};
    use crate::superblock::{Superblock, SUPERBLOCK_SIZE};
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    struct FakeSource {
        sb_bytes: Vec<u8>,
        nodes: Mutex<StdHashMap<u64, Vec<u8>>>,
    }

    impl FakeSource {
        fn new(root_addr: u64) -> Self {
            let mut data = vec![0u8; SUPERBLOCK_SIZE];
            data[0x40..0x48].copy_from_slice(b"_BHRfS_M");
            data[0x94..0x98].copy_from_slice(&512u32.to_le_bytes());
            data[0x90..0x94].copy_from_slice(&4096u32.to_le_bytes());
            data[0x50..0x58].copy_from_slice(&root_addr.to_le_bytes());
            let csum = crc32c::crc32c(&data[0x20..]);
            data[0..4].copy_from_slice(&csum.to_le_bytes());
            Self {
                sb_bytes: data,
                nodes: Mutex::new(StdHashMap::new()),
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

    fn header(addr: u64) -> NodeHeader {
        NodeHeader {
            checksum: CSum([0u8; 32]),
            metadata_uuid: Uuid::nil(),
            addr: LogicalAddr::from(addr),
            flags: 0,
            backref_rev: 0,
            chunk_tree_uuid: Uuid::nil(),
            generation: 1,
            owner: well_known_tree::ROOT,
            num_items: 1,
            level: 0,
        }
    }

    fn finalize(mut node: Node) -> Node {
        let csum = node.calculate_checksum().unwrap();
        node.head.checksum = csum;
        node
    }

    #[test]
    fn lookup_succeeds_despite_sibling_checksum_corruption() {
        let src = FakeSource::new(0x1000);
        let good_key = Key::new(1, 1, 0);
        let leaf = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x1000),
            body: Body::Leaf(vec![Item {
                key: good_key,
                data: vec![9, 9, 9],
                body: itembody::decode(1, &[9, 9, 9]),
            }]),
            padding: Vec::new(),
        });
        src.put(0x1000, &leaf);

        let bt = BrokenTree::new(&src);
        let found = bt.tree_lookup(well_known_tree::ROOT, good_key);
        assert!(found.is_ok());

        let missing = bt.tree_lookup(well_known_tree::ROOT, Key::new(99, 1, 0));
        assert!(matches!(missing, Err(ReconError::NotFound)));
    }

    #[test]
    fn unreadable_root_is_reported_not_panicking() {
        let src = FakeSource::new(0xDEAD); // nothing stored at this address
        let bt = BrokenTree::new(&src);
        let result = bt.tree_lookup(well_known_tree::ROOT, Key::new(1, 1, 0));
        assert!(result.is_err());
    }

    #[test]
    fn index_is_built_once_across_repeated_queries() {
        let src = FakeSource::new(0x1000);
        let leaf = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x1000),
            body: Body::Leaf(vec![Item {
                key: Key::new(1, 1, 0),
                data: vec![1],
                body: itembody::decode(1, &[1]),
            }]),
            padding: Vec::new(),
        });
        src.put(0x1000, &leaf);

        let bt = BrokenTree::new(&src);
        assert_eq!(bt.item_count(well_known_tree::ROOT), 1);
        assert_eq!(bt.item_count(well_known_tree::ROOT), 1);
    }

    #[test]
    fn cancelling_before_the_first_query_yields_an_empty_index() {
        let src = FakeSource::new(0x1000);
        let leaf = finalize(Node {
            size: 512,
            checksum_type: CsumType::Crc32C,
            head: header(0x1000),
            body: Body::Leaf(vec![Item {
                key: Key::new(1, 1, 0),
                data: vec![1],
                body: itembody::decode(1, &[1]),
            }]),
            padding: Vec::new(),
        });
        src.put(0x1000, &leaf);

        let token = crate::config::CancellationToken::new();
        token.cancel();
        let bt = BrokenTree::with_cancellation(&src, token);
        assert_eq!(bt.item_count(well_known_tree::ROOT), 0);
    }
}
