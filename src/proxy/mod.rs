//! # Proxy Bus
//!
//! Named channels routing signals to slots. Every signal registered on a channel is
//! connected to every slot registered on it, whatever the order of registration; the actual
//! dispatch is done by the signals themselves. Each channel holds its own reference on the
//! links it makes, so two channels routing the same pair do not interfere.
//!
//! Channel endpoints are written `"<uid>/<member>"` in the configuration tree and parsed into
//! [`ProxyConnections`]. Endpoints whose owner does not exist yet are kept by the graph
//! manager until the owner appears.

use crate::framework::{lock, HasSignals, HasSlots, Signal, Slot};
use crate::model::ConnectDecl;
use crate::registry::Registered;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error};

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ProxyError {
    #[error("Malformed channel member '{0}', expected '<uid>/<member>'")]
    MalformedMember(String),
    #[error("Owner '{0}' not found")]
    UnknownOwner(String),
    #[error("Signal '{key}' not found in source '{uid}'")]
    UnknownSignal { uid: String, key: String },
    #[error("Slot '{key}' not found in destination '{uid}'")]
    UnknownSlot { uid: String, key: String },
}

/// Splits `"<uid>/<member>"`.
pub fn parse_member(member: &str) -> Result<(String, String), ProxyError> {
    match member.split_once('/') {
        Some((uid, key)) if !uid.is_empty() && !key.is_empty() && !key.contains('/') => {
            Ok((uid.to_string(), key.to_string()))
        }
        _ => Err(ProxyError::MalformedMember(member.to_string())),
    }
}

/// Endpoints of one channel, as `(owner uid, member key)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyConnections {
    pub channel: String,
    pub signals: Vec<(String, String)>,
    pub slots: Vec<(String, String)>,
}

impl ProxyConnections {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// Parses a `connect` element, naming the channel with `gen_channel` when unnamed.
    pub fn parse<F>(decl: &ConnectDecl, gen_channel: F) -> Result<Self, ProxyError>
    where
        F: FnOnce() -> String,
    {
        let channel = decl.channel.clone().unwrap_or_else(gen_channel);
        let mut proxy = ProxyConnections::new(channel);
        for member in &decl.signals {
            let (uid, key) = parse_member(member)?;
            proxy.add_signal(uid, key);
        }
        for member in &decl.slots {
            let (uid, key) = parse_member(member)?;
            proxy.add_slot(uid, key);
        }
        Ok(proxy)
    }

    /// Idempotent per `(uid, key)`.
    pub fn add_signal(&mut self, uid: impl Into<String>, key: impl Into<String>) {
        let entry = (uid.into(), key.into());
        if !self.signals.contains(&entry) {
            self.signals.push(entry);
        }
    }

    /// Idempotent per `(uid, key)`.
    pub fn add_slot(&mut self, uid: impl Into<String>, key: impl Into<String>) {
        let entry = (uid.into(), key.into());
        if !self.slots.contains(&entry) {
            self.slots.push(entry);
        }
    }

    pub fn merge(&mut self, other: &ProxyConnections) {
        for (uid, key) in &other.signals {
            self.add_signal(uid.clone(), key.clone());
        }
        for (uid, key) in &other.slots {
            self.add_slot(uid.clone(), key.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.slots.is_empty()
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.signals
            .iter()
            .chain(self.slots.iter())
            .map(|(uid, _)| uid.as_str())
    }
}

#[derive(Default)]
struct Channel {
    signals: Vec<Arc<Signal>>,
    slots: Vec<Arc<Slot>>,
}

impl Channel {
    fn is_empty(&self) -> bool {
        self.signals.is_empty() && self.slots.is_empty()
    }
}

#[derive(Default)]
pub struct ProxyBus {
    channels: Mutex<BTreeMap<String, Channel>>,
}

impl ProxyBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_signal(&self, channel: &str, signal: &Arc<Signal>) {
        let mut channels = lock(&self.channels);
        let entry = channels.entry(channel.to_string()).or_default();
        if entry.signals.iter().any(|s| Arc::ptr_eq(s, signal)) {
            return;
        }
        for slot in &entry.slots {
            signal.connect(slot);
        }
        entry.signals.push(signal.clone());
        debug!(%channel, owner = signal.owner(), signal = signal.key(), "Signal connected");
    }

    pub fn connect_slot(&self, channel: &str, slot: &Arc<Slot>) {
        let mut channels = lock(&self.channels);
        let entry = channels.entry(channel.to_string()).or_default();
        if entry.slots.iter().any(|s| Arc::ptr_eq(s, slot)) {
            return;
        }
        for signal in &entry.signals {
            signal.connect(slot);
        }
        entry.slots.push(slot.clone());
        debug!(%channel, owner = slot.owner(), slot = slot.key(), "Slot connected");
    }

    pub fn disconnect_signal(&self, channel: &str, signal: &Arc<Signal>) {
        self.remove_where(channel, |s| Arc::ptr_eq(s, signal), |_| false);
    }

    pub fn disconnect_slot(&self, channel: &str, slot: &Arc<Slot>) {
        self.remove_where(channel, |_| false, |s| Arc::ptr_eq(s, slot));
    }

    /// Removes every member `uid` registered on `channel`.
    pub fn disconnect_owner(&self, channel: &str, uid: &str) {
        self.remove_where(channel, |s| s.owner() == uid, |s| s.owner() == uid);
    }

    /// Resolves and connects every endpoint of `proxy`.
    ///
    /// Resolution failures are logged and the first one is returned once every other
    /// endpoint has been connected.
    pub fn connect<R>(&self, proxy: &ProxyConnections, resolve: R) -> Result<(), ProxyError>
    where
        R: Fn(&str) -> Option<Registered>,
    {
        let mut first_error = None;
        for (uid, key) in &proxy.signals {
            let signal = resolve(uid.as_str())
                .ok_or_else(|| ProxyError::UnknownOwner(uid.clone()))
                .and_then(|owner| {
                    owner.signal(key).ok_or_else(|| ProxyError::UnknownSignal {
                        uid: uid.clone(),
                        key: key.clone(),
                    })
                });
            match signal {
                Ok(signal) => self.connect_signal(&proxy.channel, &signal),
                Err(err) => {
                    error!(channel = %proxy.channel, error = %err, "Signal can not be connected to the channel");
                    first_error.get_or_insert(err);
                }
            }
        }
        for (uid, key) in &proxy.slots {
            let slot = resolve(uid.as_str())
                .ok_or_else(|| ProxyError::UnknownOwner(uid.clone()))
                .and_then(|owner| {
                    owner.slot(key).ok_or_else(|| ProxyError::UnknownSlot {
                        uid: uid.clone(),
                        key: key.clone(),
                    })
                });
            match slot {
                Ok(slot) => self.connect_slot(&proxy.channel, &slot),
                Err(err) => {
                    error!(channel = %proxy.channel, error = %err, "Slot can not be connected to the channel");
                    first_error.get_or_insert(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Disconnects the endpoints of `proxy`, or only those owned by `owner`.
    /// Members are matched by `(uid, key)`, so owners that are already gone are handled.
    pub fn disconnect(&self, proxy: &ProxyConnections, owner: Option<&str>) {
        let keep = |uid: &str| owner.map_or(true, |o| o == uid);
        let signals: Vec<&(String, String)> =
            proxy.signals.iter().filter(|(uid, _)| keep(uid.as_str())).collect();
        let slots: Vec<&(String, String)> =
            proxy.slots.iter().filter(|(uid, _)| keep(uid.as_str())).collect();

        self.remove_where(
            &proxy.channel,
            |s| signals.iter().any(|(uid, key)| s.owner() == uid.as_str() && s.key() == key.as_str()),
            |s| slots.iter().any(|(uid, key)| s.owner() == uid.as_str() && s.key() == key.as_str()),
        );
    }

    pub fn channel_names(&self) -> Vec<String> {
        lock(&self.channels).keys().cloned().collect()
    }

    pub fn signal_count(&self, channel: &str) -> usize {
        lock(&self.channels)
            .get(channel)
            .map_or(0, |c| c.signals.len())
    }

    pub fn slot_count(&self, channel: &str) -> usize {
        lock(&self.channels).get(channel).map_or(0, |c| c.slots.len())
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.channels).is_empty()
    }

    fn remove_where<S, L>(&self, channel: &str, drop_signal: S, drop_slot: L)
    where
        S: Fn(&Arc<Signal>) -> bool,
        L: Fn(&Arc<Slot>) -> bool,
    {
        let mut channels = lock(&self.channels);
        let Some(entry) = channels.get_mut(channel) else {
            return;
        };

        let (gone_signals, kept_signals): (Vec<_>, Vec<_>) =
            entry.signals.drain(..).partition(|s| drop_signal(s));
        entry.signals = kept_signals;
        let (gone_slots, kept_slots): (Vec<_>, Vec<_>) =
            entry.slots.drain(..).partition(|s| drop_slot(s));
        entry.slots = kept_slots;

        for signal in &gone_signals {
            for slot in entry.slots.iter().chain(gone_slots.iter()) {
                signal.disconnect(slot);
            }
            debug!(%channel, owner = signal.owner(), signal = signal.key(), "Signal disconnected");
        }
        for slot in &gone_slots {
            for signal in &entry.signals {
                signal.disconnect(slot);
            }
            debug!(%channel, owner = slot.owner(), slot = slot.key(), "Slot disconnected");
        }

        if entry.is_empty() {
            channels.remove(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataObject;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_slot(owner: &str) -> (Arc<Slot>, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let slot = Slot::new(owner, "hit", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (slot, hits)
    }

    #[test]
    fn test_parse_member() {
        assert_eq!(
            parse_member("image/modified").unwrap(),
            ("image".to_string(), "modified".to_string())
        );
        assert!(parse_member("image").is_err());
        assert!(parse_member("/modified").is_err());
        assert!(parse_member("a/b/c").is_err());
    }

    #[test]
    fn test_parse_generates_channel_name() {
        let decl = ConnectDecl::new().signal("a/modified").slot("b/update");
        let proxy = ProxyConnections::parse(&decl, || "Proxy_app_0".to_string()).unwrap();
        assert_eq!(proxy.channel, "Proxy_app_0");
        assert_eq!(proxy.signals, vec![("a".into(), "modified".into())]);

        let named = ConnectDecl::named("ch").signal("a/modified");
        let proxy = ProxyConnections::parse(&named, || unreachable!()).unwrap();
        assert_eq!(proxy.channel, "ch");
    }

    #[test]
    fn test_registration_order_does_not_matter() {
        let bus = ProxyBus::new();
        let early = Signal::new("a", "modified");
        let late = Signal::new("b", "modified");
        let (slot, hits) = counter_slot("c");

        bus.connect_signal("ch", &early);
        bus.connect_slot("ch", &slot);
        bus.connect_signal("ch", &late);
        bus.connect_slot("ch", &slot);

        early.emit(&json!(null));
        late.emit(&json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.slot_count("ch"), 1);
    }

    #[test]
    fn test_disconnect_owner_leaves_other_owners() {
        let bus = ProxyBus::new();
        let a = Signal::new("a", "modified");
        let b = Signal::new("b", "modified");
        let (slot, hits) = counter_slot("c");
        bus.connect_signal("ch", &a);
        bus.connect_signal("ch", &b);
        bus.connect_slot("ch", &slot);

        bus.disconnect_owner("ch", "a");
        a.emit(&json!(null));
        b.emit(&json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.signal_count("ch"), 1);

        bus.disconnect_owner("ch", "b");
        bus.disconnect_owner("ch", "c");
        assert!(bus.is_empty());
    }

    #[test]
    fn test_channels_sharing_a_pair_are_independent() {
        let bus = ProxyBus::new();
        let signal = Signal::new("a", "modified");
        let (slot, hits) = counter_slot("b");
        for channel in ["ch1", "ch2"] {
            bus.connect_signal(channel, &signal);
            bus.connect_slot(channel, &slot);
        }
        signal.emit(&json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.disconnect_owner("ch1", "a");
        assert_eq!(bus.signal_count("ch2"), 1);
        signal.emit(&json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // A direct link on the same pair outlives the channel.
        let direct = signal.connect(&slot);
        bus.disconnect_slot("ch2", &slot);
        signal.emit(&json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        direct.disconnect();
        signal.emit(&json!(null));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_connect_resolves_and_reports_missing_owner() {
        let bus = ProxyBus::new();
        let source = DataObject::new("src", "Float");
        let destination = DataObject::new("dst", "Float");

        let mut proxy = ProxyConnections::new("ch");
        proxy.add_signal("src", "modified");
        proxy.add_slot("dst", "set");
        proxy.add_slot("ghost", "set");

        let resolve = |uid: &str| match uid {
            "src" => Some(Registered::Object(source.clone())),
            "dst" => Some(Registered::Object(destination.clone())),
            _ => None,
        };
        let err = bus.connect(&proxy, resolve).unwrap_err();
        assert_eq!(err, ProxyError::UnknownOwner("ghost".into()));

        // The resolvable endpoints are live.
        source.set_value(json!(3));
        assert_eq!(destination.value()["value"], json!(3));

        bus.disconnect(&proxy, Some("src"));
        source.set_value(json!(4));
        assert_eq!(destination.value()["value"], json!(3));
        assert_eq!(bus.slot_count("ch"), 1);
    }
}
