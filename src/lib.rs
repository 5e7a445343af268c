//! Reconstructs a logical view of a damaged copy-on-write B-tree
//! filesystem image: address translation, a checksum-and-expectation
//! checked node engine, a tolerant tree walker, and a broken-tree index
//! that keeps answering lookups even when parts of a tree are missing or
//! corrupt.
//!
//! # Architecture
//!
//! - [`addr`]: typed logical/physical address newtypes (component B)
//! - [`key`]: the `(object_id, item_type, offset)` B-tree key (component A)
//! - [`codec`]: the `Record` trait and field-layout assertions (component A)
//! - [`checksum`]: checksum algorithms and short sums (component E)
//! - [`sumrun`]: checksum runs with explicit gaps (component E)
//! - [`containers`]: ordered map, interval tree, LRU cache, slice pool (component C)
//! - [`volume`]: bidirectional logical/physical address mapping (component D)
//! - [`superblock`]: superblock parsing (supplemental)
//! - [`node`]: node header/body marshalling and expectation-checked reads (component F)
//! - [`itembody`]: item-body decoding (supplemental)
//! - [`walk`]: depth-first tree traversal (component G)
//! - [`broken`]: per-tree lazy index tolerant of local corruption (component H)
//! - [`orphan`]: re-attaching unreferenced nodes to rebuilt parents (component I)
//! - [`path`]: skinny root-to-leaf path arena (component J)
//! - [`progress`]: rate-limited progress reporting (component K)
//! - [`fmtutil`]: human-readable byte-count formatting (component K)
//! - [`config`]: tunables (component M)
//! - [`error`]: the error taxonomy (component L)
//! - [`blockdev`]: raw device access, the default `NodeSource` backend (component N)

pub mod addr;
pub mod blockdev;
pub mod broken;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod containers;
pub mod error;
pub mod fmtutil;
pub mod itembody;
pub mod key;
pub mod node;
pub mod orphan;
pub mod path;
pub mod progress;
pub mod sumrun;
pub mod superblock;
pub mod volume;
pub mod walk;

pub use addr::{AddrDelta, DeviceId, LogicalAddr, PhysicalAddr, QualifiedPhysical};
pub use broken::BrokenTree;
pub use error::{ReconError, Result};
pub use key::Key;
pub use node::{Node, NodeSource};
pub use superblock::Superblock;
pub use volume::Volume;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
