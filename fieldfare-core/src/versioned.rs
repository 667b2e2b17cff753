//! VersionedCollection: commit, pull and checkout over a Collection.
//!
//! Every commit wraps a batch of changes into a signed [`VersionStatement`]
//! stored in the collection, so the collection state is the version id.
//! Pulling a remote version walks both histories back to a common version,
//! replays the remote statements and then reapplies the local ones in merge
//! mode.
//!
//! ## Locking
//!
//! The collection and current version share one mutex, which serializes
//! commits and pulls. The in-progress marker has its own mutex and is checked
//! before the state lock is taken, so a competing pull fails fast.

use crossbeam::channel::Receiver;
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::VersionChain;
use crate::change::{Change, ChangeMethod};
use crate::chunk::{Chunk, ChunkId, HostId};
use crate::collection::Collection;
use crate::config::VersioningConfig;
use crate::element::{Element, ElementDescriptor, TypeRegistry};
use crate::error::{VersionError, VersionResult};
use crate::identity::HostIdentity;
use crate::notify::{RemoteUpdate, UpdateNotifier};
use crate::nvd::Nvd;
use crate::statement::{StatementBody, VersionStatement, VERSION_ELEMENT};
use crate::store::ChunkStore;

/// The collaborators a host provides to its collections.
#[derive(Clone)]
pub struct Environment {
    pub store: Arc<dyn ChunkStore>,
    pub nvd: Arc<dyn Nvd>,
    pub host: Arc<dyn HostIdentity>,
    pub notifier: Arc<dyn UpdateNotifier>,
    pub registry: Arc<TypeRegistry>,
}

struct VersionState {
    local_copy: Collection,
    current_version: ChunkId,
}

/// Clears the in-progress marker when a pull ends, whatever the outcome.
struct UpdateGuard<'a>(&'a Mutex<Option<ChunkId>>);

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        let mut slot = match self.0.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = None;
    }
}

pub struct VersionedCollection {
    uuid: Uuid,
    store: Arc<dyn ChunkStore>,
    host: Arc<dyn HostIdentity>,
    notifier: Arc<dyn UpdateNotifier>,
    allowed_changes: BTreeSet<ChangeMethod>,
    max_chain_depth: usize,
    state: Mutex<VersionState>,
    version_blacklist: Mutex<HashSet<ChunkId>>,
    update_in_progress: Mutex<Option<ChunkId>>,
    updates: Mutex<Option<Receiver<RemoteUpdate>>>,
}

impl VersionedCollection {
    pub fn new(uuid: &str, env: &Environment, config: &VersioningConfig) -> VersionResult<Self> {
        config.validate()?;
        let local_copy = Collection::new(
            uuid,
            config.degree,
            env.store.clone(),
            env.nvd.clone(),
            env.registry.clone(),
        )?;
        let current_version = local_copy.get_state()?;
        Ok(VersionedCollection {
            uuid: *local_copy.uuid(),
            store: env.store.clone(),
            host: env.host.clone(),
            notifier: env.notifier.clone(),
            allowed_changes: config.allowed_changes.clone(),
            max_chain_depth: config.max_chain_depth,
            state: Mutex::new(VersionState {
                local_copy,
                current_version,
            }),
            version_blacklist: Mutex::new(HashSet::new()),
            update_in_progress: Mutex::new(None),
            updates: Mutex::new(None),
        })
    }

    pub fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    /// Load the persisted state and subscribe to remote updates.
    pub fn init(&self) -> VersionResult<()> {
        {
            let mut state = self.state.lock()?;
            state.local_copy.init()?;
            state.current_version = state.local_copy.get_state()?;
            debug!(uuid = %self.uuid, version = %state.current_version, "collection initialized");
        }
        let receiver = self.notifier.track(self.uuid, self.host.host_id())?;
        *self.updates.lock()? = Some(receiver);
        Ok(())
    }

    pub fn current_version(&self) -> VersionResult<ChunkId> {
        Ok(self.state.lock()?.current_version)
    }

    pub fn is_blacklisted(&self, version: &ChunkId) -> VersionResult<bool> {
        Ok(self.version_blacklist.lock()?.contains(version))
    }

    pub fn create_element(&self, name: &str, descriptor: ElementDescriptor) -> Change {
        Change::create_element(name, descriptor)
    }

    pub fn delete_element(&self, name: &str) -> Change {
        Change::delete_element(name)
    }

    pub fn update_element(&self, name: &str, descriptor: ElementDescriptor) -> Change {
        Change::update_element(name, descriptor)
    }

    pub fn get_element(&self, name: &str) -> VersionResult<Option<Box<dyn Element>>> {
        Ok(self.state.lock()?.local_copy.get_element(name)?)
    }

    pub fn has_element(&self, name: &str) -> VersionResult<bool> {
        Ok(self.state.lock()?.local_copy.has_element(name)?)
    }

    /// Element names in key order, including the version element.
    pub fn element_names(&self) -> VersionResult<Vec<String>> {
        Ok(self.state.lock()?.local_copy.element_names()?)
    }

    /// Execute `changes` and record them as a new version.
    ///
    /// A failing change aborts the commit; changes before it stay applied.
    pub fn commit<I>(&self, changes: I) -> VersionResult<ChunkId>
    where
        I: IntoIterator<Item = Change>,
    {
        let version = {
            let mut state = self.state.lock()?;
            let prev = state.local_copy.get_state()?;
            let issuer = self.host.host_id();
            let mut descriptors = Vec::new();
            for mut change in changes {
                change.set_issuer(issuer.clone());
                change.execute(&mut state.local_copy, false)?;
                descriptors.push(change.descriptor()?);
            }
            self.commit_body(&mut state, prev, StatementBody::Plain { changes: descriptors })?
        };
        self.publish(version)?;
        Ok(version)
    }

    fn commit_body(&self, state: &mut VersionState, prev: ChunkId, body: StatementBody) -> VersionResult<ChunkId> {
        let body = Chunk::from_object(self.store.as_ref(), &body)?;
        let mut statement = VersionStatement::new(self.host.host_id(), Some(prev), body.id);
        statement.sign(self.host.as_ref())?;
        write_version_statement(&mut state.local_copy, &statement)?;
        state.current_version = state.local_copy.get_state()?;
        debug!(uuid = %self.uuid, version = %state.current_version, prev = %prev, "committed version");
        Ok(state.current_version)
    }

    fn publish(&self, version: ChunkId) -> VersionResult<()> {
        self.notifier.publish(RemoteUpdate {
            uuid: self.uuid,
            version,
            source: self.host.host_id(),
        })?;
        Ok(())
    }

    /// Force the collection to `version`, discarding local changes.
    pub fn checkout(&self, version: &ChunkId) -> VersionResult<()> {
        let mut state = self.state.lock()?;
        checkout_locked(&mut state, version)
    }

    /// Update to `version` as published by `source`, merging local changes.
    pub fn pull(&self, version: &str, source: &HostId) -> VersionResult<()> {
        let version = ChunkId::parse(version)?;
        self.pull_to(version, source)
    }

    fn pull_to(&self, version: ChunkId, source: &HostId) -> VersionResult<()> {
        {
            let mut in_progress = self.update_in_progress.lock()?;
            match *in_progress {
                Some(current) if current == version => return Ok(()),
                Some(current) => {
                    return Err(VersionError::PullInProgress {
                        current,
                        requested: version,
                    })
                }
                None => {}
            }
            if self.version_blacklist.lock()?.contains(&version) {
                return Err(VersionError::Blacklisted(version));
            }
            *in_progress = Some(version);
        }
        let _guard = UpdateGuard(&self.update_in_progress);

        let mut state = self.state.lock()?;
        let initial_state = state.current_version;
        debug!(uuid = %self.uuid, version = %version, initial = %initial_state, "pulling version");

        match self.reconcile(&mut state, version, source) {
            Ok(false) => Ok(()),
            Ok(true) => {
                self.version_blacklist.lock()?.clear();
                let current = state.current_version;
                drop(state);
                info!(uuid = %self.uuid, version = %current, "collection updated successfully");
                self.publish(current)
            }
            Err(cause) => {
                if let Err(e) = checkout_locked(&mut state, &initial_state) {
                    warn!(uuid = %self.uuid, error = %e, "failed to restore state after pull");
                }
                self.version_blacklist.lock()?.insert(version);
                warn!(uuid = %self.uuid, version = %version, error = %cause, "pull failed, version blacklisted");
                Err(VersionError::PullFailed {
                    version,
                    source: Box::new(cause),
                })
            }
        }
    }

    /// Returns whether the collection moved.
    fn reconcile(&self, state: &mut VersionState, version: ChunkId, source: &HostId) -> VersionResult<bool> {
        let owner = if *source == self.host.host_id() {
            None
        } else {
            Some(source.clone())
        };
        let mut local_chain = VersionChain::new(state.current_version, None, self.max_chain_depth, self.store.clone());
        let mut remote_chain = VersionChain::new(version, owner, self.max_chain_depth, self.store.clone());

        let common = VersionChain::find_common_version(&local_chain, &remote_chain)?;
        local_chain.limit(common, false);
        remote_chain.limit(common, false);
        let local_ahead = local_chain.length()?;
        let remote_ahead = remote_chain.length()?;
        debug!(
            uuid = %self.uuid,
            common = %common,
            local_ahead,
            remote_ahead,
            "compared version chains"
        );

        if remote_ahead == 0 || remote_ahead < local_ahead {
            debug!(uuid = %self.uuid, "local chain is ahead of remote chain, nothing to do");
            return Ok(false);
        }

        if local_ahead > 0 {
            checkout_locked(state, &common)?;
        }
        self.apply_chain(state, &mut remote_chain, false, 0)?;

        let achieved = state.local_copy.get_state()?;
        debug!(uuid = %self.uuid, achieved = %achieved, expected = %version, "applied remote chain");
        if achieved != version {
            return Err(VersionError::StateMismatch {
                expected: version,
                achieved,
            });
        }
        state.current_version = version;

        if local_ahead > 0 {
            let local_head = local_chain.head();
            self.apply_chain(state, &mut local_chain, true, 0)?;
            if state.local_copy.get_state()? != version {
                self.commit_body(
                    state,
                    version,
                    StatementBody::Merge {
                        head: local_head,
                        base: common,
                    },
                )?;
            }
        }
        Ok(true)
    }

    /// Replay the statements of `chain`, oldest first.
    fn apply_chain(
        &self,
        state: &mut VersionState,
        chain: &mut VersionChain,
        merge: bool,
        nesting: usize,
    ) -> VersionResult<()> {
        if nesting > self.max_chain_depth {
            return Err(VersionError::NestingTooDeep(self.max_chain_depth));
        }
        for (version, statement) in chain.statements()? {
            statement.verify()?;
            match statement.body(self.store.as_ref())? {
                StatementBody::Plain { changes } => {
                    debug!(version = %version, issuer = %statement.issuer, count = changes.len(), "applying changes");
                    for descriptor in &changes {
                        let method: ChangeMethod = descriptor.method.parse()?;
                        if !self.allowed_changes.contains(&method) {
                            return Err(VersionError::ChangeNotAllowed(method));
                        }
                        let mut change = Change::from_descriptor(descriptor)?;
                        change.set_issuer(statement.issuer.clone());
                        change.execute(&mut state.local_copy, merge)?;
                    }
                }
                StatementBody::Merge { head, base } => {
                    debug!(version = %version, head = %head, base = %base, "replaying merged chain");
                    let mut merged = VersionChain::new(head, chain.owner().cloned(), chain.max_depth(), self.store.clone());
                    merged.limit(base, false);
                    self.apply_chain(state, &mut merged, true, nesting + 1)?;
                }
            }
            if !merge {
                write_version_statement(&mut state.local_copy, &statement)?;
            }
        }
        Ok(())
    }

    /// Drain pending notifications and pull every new version.
    ///
    /// Returns the number of successful pulls.
    pub fn process_remote_updates(&self) -> VersionResult<usize> {
        let pending: Vec<RemoteUpdate> = match self.updates.lock()?.as_ref() {
            Some(receiver) => receiver.try_iter().collect(),
            None => Vec::new(),
        };
        let mut pulled = 0;
        for update in pending {
            if self.handle_remote_update(&update)? {
                pulled += 1;
            }
        }
        Ok(pulled)
    }

    /// Pull the version an update reports, unless current or blacklisted.
    ///
    /// A failed pull is logged and leaves the version blacklisted.
    pub fn handle_remote_update(&self, update: &RemoteUpdate) -> VersionResult<bool> {
        if update.uuid != self.uuid {
            return Ok(false);
        }
        debug!(uuid = %self.uuid, source = %update.source, version = %update.version, "received remote update");
        if update.version == self.current_version()? || self.is_blacklisted(&update.version)? {
            return Ok(false);
        }
        match self.pull_to(update.version, &update.source) {
            Ok(()) => Ok(true),
            Err(VersionError::PullInProgress { .. }) => Ok(false),
            Err(e) => {
                self.version_blacklist.lock()?.insert(update.version);
                debug!(version = %update.version, error = %e, "pull failed, version was blacklisted");
                Ok(false)
            }
        }
    }
}

fn checkout_locked(state: &mut VersionState, version: &ChunkId) -> VersionResult<()> {
    state.local_copy.set_state(version)?;
    state.current_version = *version;
    Ok(())
}

fn write_version_statement(collection: &mut Collection, statement: &VersionStatement) -> VersionResult<()> {
    let descriptor = ElementDescriptor::object(serde_json::to_value(statement)?);
    if collection.has_element(VERSION_ELEMENT)? {
        collection.update_element(VERSION_ELEMENT, &descriptor)?;
    } else {
        collection.create_element(VERSION_ELEMENT, &descriptor)?;
    }
    Ok(())
}
