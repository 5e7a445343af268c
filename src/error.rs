//! Error taxonomy for the reconstruction core.
//!
//! Every layer wraps the error from the layer below it so that a failure
//! renders as a colon-separated path an operator can use to locate the
//! offending byte range: `op: node@addr: cause`.

use std::fmt;

use thiserror::Error;

use crate::addr::LogicalAddr;

/// Errors raised by the binary codec (component A).
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("need {needed} bytes, have {available}")]
    NeedNBytes { needed: usize, available: usize },

    #[error("type {0} has no static size")]
    InvalidType(&'static str),

    #[error("unmarshal {ty}::{method}: {inner}")]
    Unmarshal {
        ty: &'static str,
        method: &'static str,
        #[source]
        inner: Box<CodecError>,
    },

    #[error("marshal {ty}::{method}: {inner}")]
    Marshal {
        ty: &'static str,
        method: &'static str,
        #[source]
        inner: Box<CodecError>,
    },

    #[error("name too long: {len} bytes exceeds max {max}")]
    NameTooLong { len: usize, max: usize },
}

impl CodecError {
    pub fn wrap_unmarshal(self, ty: &'static str, method: &'static str) -> Self {
        CodecError::Unmarshal {
            ty,
            method,
            inner: Box::new(self),
        }
    }

    pub fn wrap_marshal(self, ty: &'static str, method: &'static str) -> Self {
        CodecError::Marshal {
            ty,
            method,
            inner: Box::new(self),
        }
    }
}

/// The specific failure mode of a node read (component F).
#[derive(Error, Debug)]
pub enum NodeErrorKind {
    #[error("node size {0} smaller than header")]
    TooSmall(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("looks like a node but is corrupt")]
    NotANode,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("{0}")]
    Expectations(#[from] MultiError),
}

/// A read through the node engine, wrapped with the address it concerns.
#[derive(Error, Debug)]
#[error("{op}: node@{addr}: {kind}")]
pub struct NodeError {
    pub op: &'static str,
    pub addr: LogicalAddr,
    #[source]
    pub kind: NodeErrorKind,
}

impl NodeError {
    pub fn new(op: &'static str, addr: LogicalAddr, kind: NodeErrorKind) -> Self {
        Self { op, addr, kind }
    }
}

/// An ordered, non-empty collection of errors that is itself an error.
///
/// Used to aggregate the independent expectation checks performed on a
/// single node read, and to attach every error interval that overlaps a
/// broken-tree query.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<ReconError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn push(&mut self, err: impl Into<ReconError>) {
        self.errors.push(err.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReconError> {
        self.errors.iter()
    }

    /// Folds `self` into `Ok(())` when empty, or `Err(self)` otherwise.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn extend(&mut self, other: MultiError) {
        self.errors.extend(other.errors);
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "{} error(s): {}", self.errors.len(), joined)
    }
}

impl std::error::Error for MultiError {}

/// The cancellation condition surfaced by a polled `CancellationToken`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Top-level error type returned by the public facade.
#[derive(Error, Debug)]
pub enum ReconError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("could not map logical address {0}")]
    CouldNotMap(LogicalAddr),

    #[error("inconsistent stripes at laddr={laddr} len={len}")]
    InconsistentStripes { laddr: LogicalAddr, len: u64 },

    #[error("conflicting locked chunk size at laddr={0}")]
    ConflictingLockedSize(LogicalAddr),

    #[error("incompatible chunk flags at laddr={0}")]
    IncompatibleFlags(LogicalAddr),

    #[error("devext overlap disagrees on logical address at paddr={0}")]
    DevextMismatch(crate::addr::PhysicalAddr),

    #[error("item not found")]
    NotFound,

    #[error(transparent)]
    Cancelled(#[from] Cancelled),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ReconError>;
