//! # Signals & Slots
//!
//! Synchronous publish/subscribe primitives. A [`Signal`] keeps a list of connected
//! [`Slot`]s and calls each of them on [`Signal::emit`]. Both carry the uid of their owner
//! and a member key so the proxy bus can address them symbolically as `"<uid>/<key>"`.
//!
//! Payloads are plain [`serde_json::Value`]s. Dispatch is in-line on the emitting task;
//! slots owned by a service with a worker re-post themselves (see [`crate::service`]).

use crate::framework::lock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

pub type SlotFn = Arc<dyn Fn(&Value) + Send + Sync>;

/// A callable endpoint.
pub struct Slot {
    owner: String,
    key: String,
    func: SlotFn,
}

impl Slot {
    pub fn new<F>(owner: impl Into<String>, key: impl Into<String>, func: F) -> Arc<Slot>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Self::from_fn(owner, key, Arc::new(func))
    }

    pub fn from_fn(owner: impl Into<String>, key: impl Into<String>, func: SlotFn) -> Arc<Slot> {
        Arc::new(Slot {
            owner: owner.into(),
            key: key.into(),
            func,
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn call(&self, payload: &Value) {
        (self.func)(payload)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({}/{})", self.owner, self.key)
    }
}

/// A connected slot and the number of holders of the link.
struct Link {
    slot: Arc<Slot>,
    refs: usize,
}

/// An emitting endpoint.
///
/// Links are counted per slot: every [`Signal::connect`] needs a matching
/// [`Signal::disconnect`] before the slot stops being called, and a slot connected several
/// times is still called once per emission.
pub struct Signal {
    owner: String,
    key: String,
    links: Mutex<Vec<Link>>,
}

impl Signal {
    pub fn new(owner: impl Into<String>, key: impl Into<String>) -> Arc<Signal> {
        Arc::new(Signal {
            owner: owner.into(),
            key: key.into(),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn connect(self: &Arc<Self>, slot: &Arc<Slot>) -> Connection {
        let mut links = lock(&self.links);
        match links.iter_mut().find(|l| Arc::ptr_eq(&l.slot, slot)) {
            Some(link) => link.refs += 1,
            None => links.push(Link {
                slot: slot.clone(),
                refs: 1,
            }),
        }
        Connection {
            signal: Arc::downgrade(self),
            slot: Arc::downgrade(slot),
        }
    }

    /// Releases one reference on the link. Returns false when the slot was not connected.
    pub fn disconnect(&self, slot: &Arc<Slot>) -> bool {
        let mut links = lock(&self.links);
        let Some(pos) = links.iter().position(|l| Arc::ptr_eq(&l.slot, slot)) else {
            return false;
        };
        links[pos].refs -= 1;
        if links[pos].refs == 0 {
            links.remove(pos);
        }
        true
    }

    pub fn disconnect_all(&self) {
        lock(&self.links).clear();
    }

    pub fn is_connected(&self, slot: &Arc<Slot>) -> bool {
        lock(&self.links).iter().any(|l| Arc::ptr_eq(&l.slot, slot))
    }

    /// Number of distinct connected slots.
    pub fn connection_count(&self) -> usize {
        lock(&self.links).len()
    }

    /// Calls every connected slot and returns how many were reached.
    ///
    /// The slot list is snapshotted first so slots may connect or disconnect while running.
    pub fn emit(&self, payload: &Value) -> usize {
        let slots: Vec<Arc<Slot>> = lock(&self.links).iter().map(|l| l.slot.clone()).collect();
        for slot in &slots {
            slot.call(payload);
        }
        slots.len()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signal({}/{})", self.owner, self.key)
    }
}

/// One reference on a signal to slot link. Holds neither end alive.
#[derive(Debug)]
pub struct Connection {
    signal: Weak<Signal>,
    slot: Weak<Slot>,
}

impl Connection {
    pub fn disconnect(&self) {
        if let (Some(signal), Some(slot)) = (self.signal.upgrade(), self.slot.upgrade()) {
            signal.disconnect(&slot);
        }
    }

    pub fn is_connected(&self) -> bool {
        match (self.signal.upgrade(), self.slot.upgrade()) {
            (Some(signal), Some(slot)) => signal.is_connected(&slot),
            _ => false,
        }
    }
}

/// A batch of connections torn down together.
#[derive(Debug, Default)]
pub struct Connections {
    links: Vec<Connection>,
}

impl Connections {
    pub fn push(&mut self, connection: Connection) {
        self.links.push(connection);
    }

    pub fn disconnect(&mut self) {
        for link in self.links.drain(..) {
            link.disconnect();
        }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

/// Signals of one owner, keyed by member name.
#[derive(Debug, Default, Clone)]
pub struct Signals(BTreeMap<String, Arc<Signal>>);

impl Signals {
    pub fn insert(&mut self, signal: Arc<Signal>) {
        self.0.insert(signal.key().to_string(), signal);
    }

    pub fn get(&self, key: &str) -> Option<Arc<Signal>> {
        self.0.get(key).cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Slots of one owner, keyed by member name.
#[derive(Debug, Default, Clone)]
pub struct Slots(BTreeMap<String, Arc<Slot>>);

impl Slots {
    pub fn insert(&mut self, slot: Arc<Slot>) {
        self.0.insert(slot.key().to_string(), slot);
    }

    pub fn get(&self, key: &str) -> Option<Arc<Slot>> {
        self.0.get(key).cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Anything addressable on the proxy bus as a signal source.
pub trait HasSignals {
    fn signal(&self, key: &str) -> Option<Arc<Signal>>;
}

/// Anything addressable on the proxy bus as a slot destination.
pub trait HasSlots {
    fn slot(&self, key: &str) -> Option<Arc<Slot>>;
}
