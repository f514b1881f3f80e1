//! # Components
//!
//! A [`Component`] is the user-written part of a service: the hooks the runtime calls while
//! driving the service through its lifecycle. Everything else (state tracking, worker
//! marshalling, proxy and auto-connections) is handled by [`crate::service::Service`].
//!
//! # Provided Methods (Hooks)
//! Only [`Component::updating`] is mandatory. The other hooks default to `Ok(())`.
//!
//! # Example
//! ```rust
//! use async_trait::async_trait;
//! use service_graph::service::{Component, HookError, ServiceContext};
//!
//! struct Beeper;
//!
//! #[async_trait]
//! impl Component for Beeper {
//!     async fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
//!         ctx.emit("beeped", serde_json::json!({ "from": ctx.uid() }));
//!         Ok(())
//!     }
//! }
//! ```

use crate::framework::{Signal, Signals, SlotFn};
use crate::model::DataKey;
use crate::service::{HookError, ServiceContext};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[async_trait]
pub trait Component: Send + Sync {
    /// Declares the component's own signals and slots. Called once, before configuration.
    fn declare(&mut self, _decl: &mut Declarations) {}

    /// Signal/slot pairs to wire between a data key's object and this service while started.
    fn auto_connections(&self) -> KeyConnections {
        KeyConnections::default()
    }

    /// Reads the service configuration. Return [`HookError::BadConfig`] for malformed input.
    fn configuring(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn starting(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn stopping(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }

    async fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError>;

    /// Called while started when the object behind `key` was replaced or removed.
    async fn swapping(&mut self, _key: &DataKey, _ctx: &ServiceContext) -> Result<(), HookError> {
        Ok(())
    }
}

/// Collects the members a component declares.
pub struct Declarations {
    owner: String,
    pub(crate) signals: Signals,
    pub(crate) slots: Vec<(String, SlotFn)>,
}

impl Declarations {
    pub(crate) fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            signals: Signals::default(),
            slots: Vec::new(),
        }
    }

    /// Uid of the service being declared.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Declares a signal and hands it back so the component may keep it.
    pub fn signal(&mut self, key: &str) -> Arc<Signal> {
        let signal = Signal::new(self.owner.clone(), key);
        self.signals.insert(signal.clone());
        signal
    }

    /// Declares a slot. On a service with a worker the call is marshalled to that worker.
    pub fn slot<F>(&mut self, key: &str, func: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.slots.push((key.to_string(), Arc::new(func)));
    }
}

/// Auto-connection table: data key name to `(object signal, service slot)` pairs.
///
/// Lookup of a group member `name#i` falls back to the entry of the group `name`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyConnections {
    entries: BTreeMap<String, Vec<(String, String)>>,
}

impl KeyConnections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, key: &str, signal: &str, slot: &str) -> Self {
        self.entries
            .entry(key.to_string())
            .or_default()
            .push((signal.to_string(), slot.to_string()));
        self
    }

    pub fn get(&self, key: &DataKey) -> &[(String, String)] {
        self.entries
            .get(&key.to_string())
            .or_else(|| key.index().and_then(|_| self.entries.get(key.group())))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_connections_group_fallback() {
        let table = KeyConnections::new()
            .push("images", "modified", "refresh")
            .push("images#1", "modified", "refresh_second");

        let first = table.get(&DataKey::indexed("images", 0));
        assert_eq!(first, &[("modified".to_string(), "refresh".to_string())]);

        let second = table.get(&DataKey::indexed("images", 1));
        assert_eq!(second[0].1, "refresh_second");

        assert!(table.get(&DataKey::new("other")).is_empty());
    }
}
