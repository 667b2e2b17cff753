//! Error types for fieldfare-core.
//!
//! Each layer has its own error enum so callers can tell a storage fault from
//! a structural tree error or a failed reconciliation, and take appropriate
//! action. Lower layers convert into higher ones through `#[from]`.

use std::io;
use thiserror::Error;

use crate::chunk::ChunkId;
use crate::change::ChangeMethod;

/// Error type for all chunk and descriptor storage operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// I/O error (filesystem operations)
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization error (bincode, serde_json)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error (bincode, serde_json)
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A string that should hold a chunk identifier does not
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock/mutex poisoned
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Deserialization(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            StoreError::Io(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            StoreError::Deserialization(err.to_string())
        } else {
            StoreError::Serialization(err.to_string())
        }
    }
}

impl From<hex::FromHexError> for StoreError {
    fn from(err: hex::FromHexError) -> Self {
        StoreError::InvalidIdentifier(format!("Invalid hex: {}", err))
    }
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::LockPoisoned(err.to_string())
    }
}

/// Errors raised by the persistent B-tree.
#[derive(Debug, Clone, Error)]
pub enum TreeError {
    #[error("Tree degree must be at least 3, got {0}")]
    InvalidDegree(usize),

    #[error("Attempt to edit a remote chunk tree")]
    RemoteTree,

    #[error("Tree is empty")]
    EmptyTree,

    #[error("Key {0} does not exist in tree")]
    KeyNotFound(ChunkId),

    /// A container violates a structural invariant
    #[error("Corrupt tree: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<T> From<std::sync::PoisonError<T>> for TreeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        TreeError::Store(err.into())
    }
}

/// Errors raised by [`crate::Collection`].
#[derive(Debug, Clone, Error)]
pub enum CollectionError {
    #[error("Invalid collection UUID '{0}'")]
    InvalidUuid(String),

    #[error("NVD was not initialized")]
    NvdUnavailable,

    #[error("Unsupported element type '{0}'")]
    UnsupportedType(String),

    /// Stored descriptor names a type this host never registered
    #[error("Element type '{0}' not registered")]
    TypeNotRegistered(String),

    #[error("Attempt to update element that does not exist: {0}")]
    ElementNotFound(String),

    #[error("Malformed element '{name}': {reason}")]
    MalformedElement { name: String, reason: String },

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<T> From<std::sync::PoisonError<T>> for CollectionError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CollectionError::Store(err.into())
    }
}

/// Errors raised by the versioning layer: changes, chains and pulls.
#[derive(Debug, Clone, Error)]
pub enum VersionError {
    #[error("Change is not allowed: {0}")]
    ChangeNotAllowed(ChangeMethod),

    #[error("Change is not defined: {0}")]
    UnknownChange(String),

    #[error("Malformed {method} change: {reason}")]
    MalformedChange { method: String, reason: String },

    #[error("Invalid signature from {issuer}: {reason}")]
    InvalidSignature { issuer: String, reason: String },

    #[error("Another update in progress (to {current}), cannot pull {requested}")]
    PullInProgress { current: ChunkId, requested: ChunkId },

    #[error("Version {0} has been blacklisted")]
    Blacklisted(ChunkId),

    #[error("No common version found within search depth {depth}")]
    NoCommonVersion { depth: usize },

    #[error("Chain from {head} did not reach {boundary} within depth {depth}")]
    BoundaryNotReached {
        head: ChunkId,
        boundary: ChunkId,
        depth: usize,
    },

    #[error("Merge nesting exceeds depth {0}")]
    NestingTooDeep(usize),

    #[error("Version {0} has no version statement")]
    MissingStatement(ChunkId),

    #[error("State mismatch after remote changes applied: expected {expected}, got {achieved}")]
    StateMismatch { expected: ChunkId, achieved: ChunkId },

    #[error("Pull of {version} failed: {source}")]
    PullFailed {
        version: ChunkId,
        #[source]
        source: Box<VersionError>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl<T> From<std::sync::PoisonError<T>> for VersionError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        VersionError::Store(err.into())
    }
}

impl From<serde_json::Error> for VersionError {
    fn from(err: serde_json::Error) -> Self {
        VersionError::Store(err.into())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type for tree operations.
pub type TreeResult<T> = std::result::Result<T, TreeError>;

/// Result type for collection operations.
pub type CollectionResult<T> = std::result::Result<T, CollectionError>;

/// Result type for versioning operations.
pub type VersionResult<T> = std::result::Result<T, VersionError>;
