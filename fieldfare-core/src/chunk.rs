//! Content-addressed chunk references.
//!
//! A chunk is an immutable byte block named by the SHA-256 of its content.
//! [`Chunk`] is a reference to one: the identifier plus the host that owns
//! the lineage it came from (`None` for the local host).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult};
use crate::store::ChunkStore;

/// Identifier of a chunk: the SHA-256 digest of its bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId([u8; 32]);

impl ChunkId {
    /// Length of the hex rendering of an identifier.
    pub const HEX_LEN: usize = 64;

    /// Compute the identifier of a byte block.
    pub fn digest(data: &[u8]) -> Self {
        ChunkId(Sha256::digest(data).into())
    }

    /// Identifier the JSON encoding of `value` would get, without storing it.
    pub fn of_object<T: Serialize + ?Sized>(value: &T) -> StoreResult<Self> {
        let json = serde_json::to_vec(value)?;
        Ok(Self::digest(&json))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ChunkId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a 64 character hex identifier.
    pub fn parse(s: &str) -> StoreResult<Self> {
        if s.len() != Self::HEX_LEN {
            return Err(StoreError::InvalidIdentifier(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(ChunkId(bytes))
    }

    /// Short form used in log output.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkId({})", self.short())
    }
}

impl FromStr for ChunkId {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChunkId::parse(s)
    }
}

impl Serialize for ChunkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChunkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChunkId::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a host taking part in a collection.
///
/// For [`crate::LocalHost`] this is the hex encoded ed25519 verifying key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        HostId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a chunk, local or owned by a remote host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub id: ChunkId,
    /// Host owning the lineage; `None` means the local host
    pub owner: Option<HostId>,
}

impl Chunk {
    /// Reference an existing chunk by identifier.
    pub fn from_identifier(id: ChunkId, owner: Option<HostId>) -> Self {
        Chunk { id, owner }
    }

    /// Serialize `value` as JSON, store it, and return a local reference.
    pub fn from_object<T: Serialize + ?Sized>(store: &dyn ChunkStore, value: &T) -> StoreResult<Self> {
        let json = serde_json::to_vec(value)?;
        let id = store.put_chunk(json)?;
        Ok(Chunk { id, owner: None })
    }

    pub fn is_local(&self) -> bool {
        self.owner.is_none()
    }

    /// Load the chunk and decode its JSON content.
    pub fn expand<T: DeserializeOwned>(&self, store: &dyn ChunkStore) -> StoreResult<T> {
        let data = self.load(store)?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Load the raw bytes of the chunk.
    pub fn load(&self, store: &dyn ChunkStore) -> StoreResult<std::sync::Arc<Vec<u8>>> {
        store
            .get_chunk(&self.id)?
            .ok_or_else(|| StoreError::NotFound(format!("chunk {}", self.id)))
    }
}
