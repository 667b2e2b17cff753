//! Remote update notifications.
//!
//! Delivery is best effort and at least once. A subscriber may see the same
//! version more than once and must tolerate it.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::trace;
use uuid::Uuid;

use crate::chunk::{ChunkId, HostId};
use crate::error::StoreResult;

/// A host announcing the current version of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUpdate {
    pub uuid: Uuid,
    pub version: ChunkId,
    pub source: HostId,
}

pub trait UpdateNotifier: Send + Sync {
    /// Subscribe `host` to updates of collection `uuid` published by other hosts.
    fn track(&self, uuid: Uuid, host: HostId) -> StoreResult<Receiver<RemoteUpdate>>;

    fn publish(&self, update: RemoteUpdate) -> StoreResult<()>;
}

/// In-process fan-out.
#[derive(Default)]
pub struct MemoryUpdateHub {
    subscribers: Mutex<HashMap<Uuid, Vec<(HostId, Sender<RemoteUpdate>)>>>,
}

impl MemoryUpdateHub {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UpdateNotifier for MemoryUpdateHub {
    fn track(&self, uuid: Uuid, host: HostId) -> StoreResult<Receiver<RemoteUpdate>> {
        let (tx, rx) = unbounded();
        self.subscribers.lock()?.entry(uuid).or_default().push((host, tx));
        Ok(rx)
    }

    fn publish(&self, update: RemoteUpdate) -> StoreResult<()> {
        let mut subscribers = self.subscribers.lock()?;
        if let Some(list) = subscribers.get_mut(&update.uuid) {
            // Dropped receivers are forgotten
            list.retain(|(host, tx)| host == &update.source || tx.send(update.clone()).is_ok());
            trace!(uuid = %update.uuid, version = %update.version, subscribers = list.len(), "published update");
        }
        Ok(())
    }
}
