//! # Identifier Registry
//!
//! Map from a uid to a live object or service. It is the only owner of registered
//! instances: everything else either holds a clone of the handle for a bounded time or looks
//! the uid up again.
//!
//! Object registrations and removals are broadcast to subscribers as [`Notice`]s. The
//! registering side gets a [`Notified`] handle that resolves once every subscriber has
//! dropped its notice, which is the barrier tests use to wait for the graph to react.

use crate::framework::{lock, HasSignals, HasSlots, Signal, Slot};
use crate::model::ObjectHandle;
use crate::service::Service;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("Uid '{0}' is already registered")]
    DuplicateUid(String),
    #[error("Uid '{0}' is not registered")]
    NotRegistered(String),
}

/// A registered instance.
#[derive(Clone)]
pub enum Registered {
    Object(ObjectHandle),
    Service(Service),
}

impl Registered {
    pub fn uid(&self) -> &str {
        match self {
            Registered::Object(object) => object.uid(),
            Registered::Service(service) => service.uid(),
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Registered::Object(object) => Some(object),
            Registered::Service(_) => None,
        }
    }

    pub fn as_service(&self) -> Option<&Service> {
        match self {
            Registered::Service(service) => Some(service),
            Registered::Object(_) => None,
        }
    }
}

impl HasSignals for Registered {
    fn signal(&self, key: &str) -> Option<Arc<Signal>> {
        match self {
            Registered::Object(object) => object.signal(key),
            Registered::Service(service) => service.signal(key),
        }
    }
}

impl HasSlots for Registered {
    fn slot(&self, key: &str) -> Option<Arc<Slot>> {
        match self {
            Registered::Object(object) => object.slot(key),
            Registered::Service(service) => service.slot(key),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Registered { uid: String, object: ObjectHandle },
    Unregistered { uid: String, object: ObjectHandle },
}

impl RegistryEvent {
    pub fn uid(&self) -> &str {
        match self {
            RegistryEvent::Registered { uid, .. } | RegistryEvent::Unregistered { uid, .. } => uid,
        }
    }
}

/// An event delivered to one subscriber. Dropping it signals completion.
#[derive(Debug)]
pub struct Notice {
    pub event: RegistryEvent,
    _done: oneshot::Sender<()>,
}

/// Completion handle for a broadcast event.
#[derive(Debug, Default)]
#[must_use = "dropping the handle is fine, awaiting it waits for subscribers"]
pub struct Notified {
    pending: Vec<oneshot::Receiver<()>>,
}

impl Notified {
    /// Resolves when every subscriber has processed the event.
    pub async fn wait(self) {
        for receiver in self.pending {
            let _ = receiver.await;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, Registered>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Notice>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, uid: &str) -> bool {
        lock(&self.entries).contains_key(uid)
    }

    pub fn get(&self, uid: &str) -> Option<Registered> {
        lock(&self.entries).get(uid).cloned()
    }

    pub fn object(&self, uid: &str) -> Option<ObjectHandle> {
        self.get(uid).and_then(|r| r.as_object().cloned())
    }

    pub fn service(&self, uid: &str) -> Option<Service> {
        self.get(uid).and_then(|r| r.as_service().cloned())
    }

    /// Registers an object and notifies subscribers.
    pub fn register_object(&self, object: ObjectHandle) -> Result<Notified, RegistryError> {
        let uid = object.uid().to_string();
        self.insert(&uid, Registered::Object(object.clone()))?;
        debug!(%uid, "Object registered");
        Ok(self.broadcast(RegistryEvent::Registered { uid, object }))
    }

    /// Registers a service. Services are not broadcast.
    pub fn register_service(&self, service: Service) -> Result<(), RegistryError> {
        let uid = service.uid().to_string();
        self.insert(&uid, Registered::Service(service))?;
        debug!(%uid, "Service registered");
        Ok(())
    }

    /// Removes an entry. Only object removals are broadcast.
    pub fn unregister(&self, uid: &str) -> Result<Notified, RegistryError> {
        let removed = lock(&self.entries)
            .remove(uid)
            .ok_or_else(|| RegistryError::NotRegistered(uid.to_string()))?;
        debug!(%uid, "Unregistered");
        Ok(match removed {
            Registered::Object(object) => self.broadcast(RegistryEvent::Unregistered {
                uid: uid.to_string(),
                object,
            }),
            Registered::Service(_) => Notified::default(),
        })
    }

    /// Subscribes to object registrations and removals.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notice> {
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.subscribers).push(sender);
        receiver
    }

    /// Registered uids, sorted.
    pub fn uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = lock(&self.entries).keys().cloned().collect();
        uids.sort();
        uids
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    fn insert(&self, uid: &str, entry: Registered) -> Result<(), RegistryError> {
        let mut entries = lock(&self.entries);
        if entries.contains_key(uid) {
            warn!(%uid, "Duplicate uid");
            return Err(RegistryError::DuplicateUid(uid.to_string()));
        }
        entries.insert(uid.to_string(), entry);
        Ok(())
    }

    fn broadcast(&self, event: RegistryEvent) -> Notified {
        let mut pending = Vec::new();
        lock(&self.subscribers).retain(|subscriber| {
            let (done, receiver) = oneshot::channel();
            let notice = Notice {
                event: event.clone(),
                _done: done,
            };
            match subscriber.send(notice) {
                Ok(()) => {
                    pending.push(receiver);
                    true
                }
                Err(_) => false,
            }
        });
        Notified { pending }
    }
}
