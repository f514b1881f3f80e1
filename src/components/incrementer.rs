//! Adds `step` to the `count` field of its in/out `counter` object on every update.

use crate::service::{Component, HookError, ServiceContext};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

pub const COUNTER_KEY: &str = "counter";

#[derive(Debug, Deserialize)]
struct IncrementerConfig {
    step: i64,
}

pub struct Incrementer {
    step: i64,
}

impl Default for Incrementer {
    fn default() -> Self {
        Self { step: 1 }
    }
}

#[async_trait]
impl Component for Incrementer {
    fn configuring(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        if let config @ Value::Object(_) = ctx.config() {
            let config: IncrementerConfig = serde_json::from_value(config)
                .map_err(|e| HookError::BadConfig(e.to_string()))?;
            self.step = config.step;
        }
        Ok(())
    }

    async fn updating(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        let counter = ctx
            .object(COUNTER_KEY)
            .ok_or_else(|| HookError::Failed(format!("no '{COUNTER_KEY}' object")))?;
        let step = self.step;
        counter.update_value(|value| {
            let count = value["count"].as_i64().unwrap_or(0) + step;
            value["count"] = json!(count);
        });
        debug!(uid = %ctx.uid(), counter = %counter.uid(), step, "Incremented");
        Ok(())
    }
}
