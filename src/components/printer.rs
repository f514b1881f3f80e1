//! Prints its `input` object.
//!
//! The input's `modified` signal is auto-connected to the `refresh` slot, so every change
//! of the object is printed while the service is started. Printed lines also go to a
//! shared [`PrintLog`].

use crate::framework::lock;
use crate::model::DataKey;
use crate::model::MODIFIED_SIG;
use crate::service::{Component, Declarations, HookError, KeyConnections, ServiceContext};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::info;

pub const INPUT_KEY: &str = "input";
pub const REFRESH_SLOT: &str = "refresh";

/// Lines printed by every [`Printer`] sharing it, as `"<uid>: <value>"`.
#[derive(Debug, Clone, Default)]
pub struct PrintLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl PrintLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, uid: &str, value: &Value) {
        lock(&self.lines).push(format!("{uid}: {value}"));
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.lines).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.lines).is_empty()
    }
}

#[derive(Default)]
pub struct Printer {
    log: PrintLog,
}

impl Printer {
    pub fn with_log(log: PrintLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Component for Printer {
    fn declare(&mut self, decl: &mut Declarations) {
        let log = self.log.clone();
        let owner = decl.owner().to_string();
        decl.slot(REFRESH_SLOT, move |payload| {
            let value = payload.get("value").cloned().unwrap_or(Value::Null);
            info!(uid = %owner, %value, "Refresh");
            log.push(&owner, &value);
        });
    }

    fn auto_connections(&self) -> KeyConnections {
        KeyConnections::new().push(INPUT_KEY, MODIFIED_SIG, REFRESH_SLOT)
    }

    async fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        let value = ctx
            .input(INPUT_KEY)
            .map(|object| object.value())
            .unwrap_or(Value::Null);
        info!(uid = %ctx.uid(), %value, "Print");
        self.log.push(ctx.uid(), &value);
        Ok(())
    }

    async fn swapping(&mut self, key: &DataKey, ctx: &ServiceContext) -> Result<(), HookError> {
        let with = ctx.object(key.clone()).map(|o| o.uid().to_string());
        info!(uid = %ctx.uid(), %key, with = ?with, "Input swapped");
        Ok(())
    }
}
