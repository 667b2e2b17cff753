//! Signed version statements.
//!
//! A statement links the state a host started from to the chunk holding the
//! changes it applied. It is stored in the collection itself, under the
//! [`VERSION_ELEMENT`] name, so the resulting collection state identifies
//! the version.

use serde::{Deserialize, Serialize};

use crate::change::ChangeDescriptor;
use crate::chunk::{Chunk, ChunkId, HostId};
use crate::error::{VersionError, VersionResult};
use crate::identity::{verify_signature, HostIdentity};
use crate::store::ChunkStore;

/// Element name holding the statement of the current version.
pub const VERSION_ELEMENT: &str = "version";

/// Content of a statement's `changes` chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StatementBody {
    Plain { changes: Vec<ChangeDescriptor> },
    /// Local history from `head` back to (excluding) `base`, replayed in merge mode
    Merge { head: ChunkId, base: ChunkId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionStatement {
    pub issuer: HostId,
    pub prev: Option<ChunkId>,
    pub changes: ChunkId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Serialize)]
struct SignedPart<'a> {
    issuer: &'a HostId,
    prev: &'a Option<ChunkId>,
    changes: &'a ChunkId,
}

impl VersionStatement {
    pub fn new(issuer: HostId, prev: Option<ChunkId>, changes: ChunkId) -> Self {
        VersionStatement {
            issuer,
            prev,
            changes,
            signature: None,
        }
    }

    /// Bytes covered by the signature: every field except the signature itself.
    pub fn signing_bytes(&self) -> VersionResult<Vec<u8>> {
        Ok(serde_json::to_vec(&SignedPart {
            issuer: &self.issuer,
            prev: &self.prev,
            changes: &self.changes,
        })?)
    }

    pub fn sign(&mut self, identity: &dyn HostIdentity) -> VersionResult<()> {
        let message = self.signing_bytes()?;
        self.signature = Some(identity.sign(&message));
        Ok(())
    }

    pub fn verify(&self) -> VersionResult<()> {
        let signature = self
            .signature
            .as_deref()
            .ok_or_else(|| VersionError::InvalidSignature {
                issuer: self.issuer.to_string(),
                reason: "statement is not signed".to_string(),
            })?;
        verify_signature(&self.issuer, &self.signing_bytes()?, signature)
    }

    /// Expand the `changes` chunk.
    pub fn body(&self, store: &dyn ChunkStore) -> VersionResult<StatementBody> {
        Ok(Chunk::from_identifier(self.changes, Some(self.issuer.clone())).expand(store)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LocalHost;
    use crate::MemoryChunkStore;
    use serde_json::json;

    #[test]
    fn test_sign_and_verify() {
        let host = LocalHost::generate();
        let mut statement = VersionStatement::new(host.host_id(), None, ChunkId::digest(b"c"));
        assert!(statement.verify().is_err());

        statement.sign(&host).unwrap();
        statement.verify().unwrap();

        statement.prev = Some(ChunkId::digest(b"other"));
        assert!(matches!(
            statement.verify(),
            Err(VersionError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn test_body_variants() {
        let store = MemoryChunkStore::new();
        let merge = StatementBody::Merge {
            head: ChunkId::digest(b"h"),
            base: ChunkId::digest(b"b"),
        };
        let chunk = Chunk::from_object(&store, &merge).unwrap();
        let statement = VersionStatement::new(HostId::new("a"), None, chunk.id);
        assert_eq!(statement.body(&store).unwrap(), merge);

        let plain = serde_json::to_value(StatementBody::Plain { changes: vec![] }).unwrap();
        assert_eq!(plain, json!({"kind": "plain", "changes": []}));
    }
}
