//! # Fieldfare Core
//!
//! Collaborative, content-addressed data structures for hosts that mutate and
//! reconcile shared collections without a central coordinator.
//!
//! The crate provides a persistent copy-on-write B-tree over immutable chunks
//! and a versioning protocol that commits signed statements, finds the common
//! version of two diverged histories and merges them.

pub mod branch;
pub mod chain;
pub mod change;
pub mod chunk;
pub mod collection;
pub mod config;
pub mod container;
pub mod cursor;
pub mod element;
pub mod error;
pub mod gc;
pub mod identity;
pub mod map;
pub mod notify;
pub mod nvd;
pub mod statement;
pub mod store;
pub mod tree;
pub mod versioned;

// Re-export commonly used types
pub use chain::{ChainLink, ChainWalk, VersionChain};
pub use change::{Change, ChangeDescriptor, ChangeMethod, Mutation};
pub use chunk::{Chunk, ChunkId, HostId};
pub use collection::Collection;
pub use config::VersioningConfig;
pub use container::TreeContainer;
pub use cursor::TreeCursor;
pub use element::{Element, ElementDescriptor, ObjectElement, TypeRegistry};
pub use error::{
    CollectionError, CollectionResult, StoreError, StoreResult, TreeError, TreeResult, VersionError,
    VersionResult,
};
pub use gc::{garbage_collect, GcStats};
pub use identity::{HostIdentity, LocalHost};
pub use map::{ChunkMap, MapDescriptor};
pub use notify::{MemoryUpdateHub, RemoteUpdate, UpdateNotifier};
pub use nvd::{FileSystemNvd, MemoryNvd, Nvd};
pub use statement::{StatementBody, VersionStatement};
pub use store::{create_store_from_spec, CachedFSChunkStore, ChunkStore, FileSystemChunkStore, MemoryChunkStore};
pub use tree::ChunkTree;
pub use versioned::{Environment, VersionedCollection};

/// Identifier of a collection version: the state hash of the collection.
pub type VersionId = ChunkId;
