//! # Deferred Object Table
//!
//! Bookkeeping for objects a graph references but does not create. Each entry remembers the
//! services waiting for the object and the channel endpoints it owns, and caches the handle
//! it is currently bound to so those endpoints can be connected and torn down.
//!
//! The table never creates or destroys services itself: [`DeferredTable::bind`] and
//! [`DeferredTable::unbind`] tell the graph manager which services are affected.

use crate::model::{Access, DataKey, ObjectHandle, ServiceDecl};
use crate::proxy::{ProxyBus, ProxyConnections, ProxyError};
use crate::registry::Registered;
use std::collections::BTreeMap;
use tracing::{debug, error};

/// What an unbind means for one waiting service.
#[derive(Debug, Clone, PartialEq)]
pub enum DependentAction {
    /// A required key lost its object.
    Destroy,
    /// Only optional keys lost their object.
    Swap(Vec<DataKey>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dependent {
    pub service: String,
    pub action: DependentAction,
}

#[derive(Default)]
struct DeferredEntry {
    object: Option<ObjectHandle>,
    services: Vec<ServiceDecl>,
    proxies: BTreeMap<String, ProxyConnections>,
}

impl DeferredEntry {
    fn connect(&self, bus: &ProxyBus) -> Result<(), ProxyError> {
        let Some(object) = &self.object else {
            return Ok(());
        };
        let mut first_error = None;
        for proxy in self.proxies.values() {
            if let Err(err) = bus.connect(proxy, |_| Some(Registered::Object(object.clone()))) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn disconnect(&self, uid: &str, bus: &ProxyBus) {
        for proxy in self.proxies.values() {
            bus.disconnect(proxy, Some(uid));
        }
    }
}

#[derive(Default)]
pub struct DeferredTable {
    entries: BTreeMap<String, DeferredEntry>,
}

impl DeferredTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `uid` as deferred, pre-bound to `existing` when the object is already live.
    /// A second declaration keeps the first entry.
    pub fn declare(&mut self, uid: &str, existing: Option<ObjectHandle>) -> bool {
        if let Some(entry) = self.entries.get_mut(uid) {
            if entry.object.is_none() {
                entry.object = existing;
            }
            debug!(%uid, "Deferred object already declared");
            return false;
        }
        self.entries.insert(
            uid.to_string(),
            DeferredEntry {
                object: existing,
                ..DeferredEntry::default()
            },
        );
        true
    }

    /// Pre-binds `uid` to an object that exists before the graph is created.
    pub fn insert_existing(&mut self, uid: &str, object: ObjectHandle) {
        self.entries.entry(uid.to_string()).or_default().object = Some(object);
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.entries.contains_key(uid)
    }

    pub fn object(&self, uid: &str) -> Option<ObjectHandle> {
        self.entries.get(uid).and_then(|e| e.object.clone())
    }

    pub fn is_bound(&self, uid: &str) -> bool {
        self.entries.get(uid).is_some_and(|e| e.object.is_some())
    }

    pub fn uids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Records `decl` as waiting on `uid`, once per service.
    pub fn add_waiting_service(&mut self, uid: &str, decl: &ServiceDecl) {
        let Some(entry) = self.entries.get_mut(uid) else {
            return;
        };
        if !entry.services.iter().any(|s| s.uid == decl.uid) {
            entry.services.push(decl.clone());
        }
    }

    /// Uids of the services waiting on `uid`.
    pub fn waiting_services(&self, uid: &str) -> Vec<String> {
        self.entries
            .get(uid)
            .map(|e| e.services.iter().map(|s| s.uid.clone()).collect())
            .unwrap_or_default()
    }

    pub fn add_signal(&mut self, uid: &str, channel: &str, key: &str) {
        if let Some(entry) = self.entries.get_mut(uid) {
            entry
                .proxies
                .entry(channel.to_string())
                .or_insert_with(|| ProxyConnections::new(channel))
                .add_signal(uid, key);
        }
    }

    pub fn add_slot(&mut self, uid: &str, channel: &str, key: &str) {
        if let Some(entry) = self.entries.get_mut(uid) {
            entry
                .proxies
                .entry(channel.to_string())
                .or_insert_with(|| ProxyConnections::new(channel))
                .add_slot(uid, key);
        }
    }

    /// Binds `uid` to `object` and returns the declarations of the services waiting on it.
    ///
    /// The entry's channel endpoints are connected through `bus` when one is given. Unknown
    /// uids return nothing.
    pub fn bind(
        &mut self,
        uid: &str,
        object: ObjectHandle,
        bus: Option<&ProxyBus>,
    ) -> Vec<ServiceDecl> {
        let Some(entry) = self.entries.get_mut(uid) else {
            return Vec::new();
        };
        entry.object = Some(object);
        if let Some(bus) = bus {
            if let Err(err) = entry.connect(bus) {
                error!(%uid, error = %err, "Deferred object channels partially connected");
            }
        }
        debug!(%uid, waiting = entry.services.len(), "Deferred object bound");
        entry.services.clone()
    }

    /// Unbinds `uid`: disconnects its endpoints, drops the cached handle and tells what
    /// happens to each waiting service. Returns `None` for unknown uids.
    pub fn unbind(&mut self, uid: &str, bus: &ProxyBus) -> Option<Vec<Dependent>> {
        let entry = self.entries.get_mut(uid)?;
        entry.disconnect(uid, bus);
        entry.object = None;

        let dependents = entry
            .services
            .iter()
            .filter_map(|decl| {
                let uses: Vec<_> = decl
                    .objects
                    .iter()
                    .filter(|o| o.uid == uid && o.access != Access::Out)
                    .collect();
                if uses.is_empty() {
                    return None;
                }
                let action = if uses.iter().any(|o| !o.optional) {
                    DependentAction::Destroy
                } else {
                    DependentAction::Swap(uses.iter().map(|o| o.data_key()).collect())
                };
                Some(Dependent {
                    service: decl.uid.clone(),
                    action,
                })
            })
            .collect();
        debug!(%uid, "Deferred object unbound");
        Some(dependents)
    }

    /// Disconnects the endpoints of every entry, keeping the cached handles.
    pub fn disconnect_all(&self, bus: &ProxyBus) {
        for (uid, entry) in &self.entries {
            entry.disconnect(uid, bus);
        }
    }

    /// Connects the endpoints of every bound entry. Returns the first failure.
    pub fn reconnect_bound(&self, bus: &ProxyBus) -> Result<(), ProxyError> {
        let mut first_error = None;
        for (uid, entry) in &self.entries {
            if let Err(err) = entry.connect(bus) {
                error!(%uid, error = %err, "Deferred object channels partially connected");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
