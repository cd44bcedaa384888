//! Boundary error taxonomy for the graph store.
//!
//! Every public, mutating or reading API returns [`Result<T>`]. Errors are
//! typed so callers can distinguish "nothing went wrong, there's just no
//! record" ([`GraphError::NotFound`]) from genuine failures.

use std::io;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tracing::error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// The kind of constraint a [`GraphError::ConstraintViolation`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `Unique(label, property)` violated.
    Unique,
    /// `NodeKey(label, [p1..pn])` violated.
    NodeKey,
    /// `Exists(label, property)` violated.
    Exists,
    /// `PropertyType(label, property, type)` violated.
    PropertyType,
    /// Relationship-level unique constraint violated.
    RelationshipUnique,
    /// Relationship-level existence constraint violated.
    RelationshipExists,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::NodeKey => "node_key",
            ConstraintKind::Exists => "exists",
            ConstraintKind::PropertyType => "property_type",
            ConstraintKind::RelationshipUnique => "relationship_unique",
            ConstraintKind::RelationshipExists => "relationship_exists",
        };
        f.write_str(s)
    }
}

/// Errors surfaced at the public boundary of the store.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Wraps an underlying I/O failure (WAL append, snapshot write, ...).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A requested record does not exist. Read APIs never return an empty
    /// value for a missing record — they return this instead.
    #[error("{0} not found")]
    NotFound(String),

    /// Attempted to create a record whose ID already exists.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A node/edge ID was empty or otherwise structurally invalid.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// A record failed basic structural validation (missing required field,
    /// malformed property value, ...).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// An edge referenced a start or end node that doesn't exist.
    #[error("invalid edge: {0}")]
    InvalidEdge(String),

    /// The store has been closed; no further operations are permitted.
    #[error("storage is closed")]
    StorageClosed,

    /// A schema constraint rejected the write.
    #[error("constraint violation [{kind}] on {label}: {message}")]
    ConstraintViolation {
        /// Which constraint kind fired.
        kind: ConstraintKind,
        /// The label (or relationship type) the constraint is declared on.
        label: String,
        /// The properties involved, for diagnostics.
        properties: Vec<String>,
        /// Human-readable detail.
        message: String,
    },

    /// Operation attempted on a transaction that already committed or
    /// rolled back.
    #[error("transaction is no longer active")]
    TransactionClosed,

    /// Operation attempted on a closed WAL.
    #[error("WAL is closed")]
    WalClosed,

    /// A WAL entry failed CRC validation or could not be decoded.
    #[error("WAL corrupted at byte offset {offset} (sequence {sequence:?}): {message}")]
    WalCorrupted {
        /// Byte offset of the bad entry.
        offset: u64,
        /// Sequence number of the last good entry before the corruption,
        /// when known.
        sequence: Option<u64>,
        /// Human-readable detail.
        message: String,
    },

    /// Snapshot write (temp file, fsync, atomic rename) failed.
    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),

    /// Recovery could not proceed (e.g. an undecodable frame outside an
    /// embedding update).
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),

    /// Sentinel used internally by streaming iterators to signal early exit
    /// without surfacing an error to the caller's callback. Callers of
    /// `Stream*` APIs should never see this variant escape a `?`.
    #[error("iteration stopped")]
    IterationStopped,

    /// A schema/serialization error not covered by a more specific variant.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violated; indicates a bug rather than bad input.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraphError {
    /// True for the sentinel used to end streaming iteration early.
    pub fn is_iteration_stopped(&self) -> bool {
        matches!(self, GraphError::IterationStopped)
    }
}

/// Locks a [`Mutex`], converting poisoning into a [`GraphError::Internal`]
/// instead of panicking the caller. A poisoned lock means some other thread
/// panicked while holding it; we treat that as a fatal but reportable error
/// rather than cascading the panic.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        error!("lock poisoned - a prior holder panicked while holding it");
        GraphError::Internal("lock poisoned".into())
    })
}
