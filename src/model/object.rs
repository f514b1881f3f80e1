//! # Data Objects
//!
//! The opaque data instances services operate on. An object is a JSON payload plus a type
//! name, a `modified` signal emitted on every change and a `set` slot that replaces the
//! payload from a proxy channel.

use crate::framework::{HasSignals, HasSlots, Signal, Signals, Slot, Slots};
use serde_json::{json, Value};
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

pub const MODIFIED_SIG: &str = "modified";
pub const SET_SLOT: &str = "set";

pub type ObjectHandle = Arc<DataObject>;

pub struct DataObject {
    uid: String,
    type_name: String,
    value: RwLock<Value>,
    signals: Signals,
    slots: Slots,
}

impl DataObject {
    pub fn new(uid: impl Into<String>, type_name: impl Into<String>) -> ObjectHandle {
        Self::with_value(uid, type_name, Value::Null)
    }

    pub fn with_value(
        uid: impl Into<String>,
        type_name: impl Into<String>,
        value: Value,
    ) -> ObjectHandle {
        let uid = uid.into();
        Arc::new_cyclic(|me: &Weak<DataObject>| {
            let mut signals = Signals::default();
            signals.insert(Signal::new(uid.clone(), MODIFIED_SIG));

            let mut slots = Slots::default();
            let target = me.clone();
            slots.insert(Slot::new(uid.clone(), SET_SLOT, move |payload| {
                if let Some(object) = target.upgrade() {
                    object.set_value(payload.clone());
                }
            }));

            DataObject {
                uid,
                type_name: type_name.into(),
                value: RwLock::new(value),
                signals,
                slots,
            }
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_a(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }

    pub fn value(&self) -> Value {
        self.value
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replaces the payload and emits `modified` with `{"uid": .., "value": ..}`.
    pub fn set_value(&self, value: Value) {
        {
            let mut guard = self
                .value
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = value.clone();
        }
        self.notify_modified(value);
    }

    /// Edits the payload in place, then emits `modified`.
    pub fn update_value<F>(&self, edit: F)
    where
        F: FnOnce(&mut Value),
    {
        let snapshot = {
            let mut guard = self
                .value
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            edit(&mut guard);
            guard.clone()
        };
        self.notify_modified(snapshot);
    }

    fn notify_modified(&self, value: Value) {
        if let Some(signal) = self.signals.get(MODIFIED_SIG) {
            signal.emit(&json!({ "uid": self.uid, "value": value }));
        }
    }
}

impl HasSignals for DataObject {
    fn signal(&self, key: &str) -> Option<Arc<Signal>> {
        self.signals.get(key)
    }
}

impl HasSlots for DataObject {
    fn slot(&self, key: &str) -> Option<Arc<Slot>> {
        self.slots.get(key)
    }
}

impl fmt::Debug for DataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataObject")
            .field("uid", &self.uid)
            .field("type", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_set_slot_updates_value_and_notifies() {
        let image = DataObject::new("image", "Image");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener = Slot::new("viewer", "refresh", move |payload| {
            sink.lock().unwrap().push(payload["value"].clone());
        });
        image.signal(MODIFIED_SIG).unwrap().connect(&listener);

        image.slot(SET_SLOT).unwrap().call(&json!({"width": 4}));
        image.update_value(|v| v["width"] = json!(8));

        assert_eq!(image.value(), json!({"width": 8}));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![json!({"width": 4}), json!({"width": 8})]
        );
    }

    #[test]
    fn test_set_slot_does_not_keep_object_alive() {
        let object = DataObject::new("tmp", "Float");
        let slot = object.slot(SET_SLOT).unwrap();
        drop(object);
        // No panic, no effect.
        slot.call(&json!(1.0));
    }
}
