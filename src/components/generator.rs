//! Publishes one object through its `frame` output.
//!
//! The object is registered when the service starts, bumped on every update and withdrawn
//! on stop. Graphs declaring its uid as deferred see it come and go.

use crate::model::{DataObject, ObjectHandle};
use crate::service::{Component, HookError, ServiceContext};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

pub const FRAME_KEY: &str = "frame";
pub const FRAME_TYPE: &str = "Frame";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeneratorConfig {
    /// Value of the first frame.
    start: i64,
}

#[derive(Default)]
pub struct Generator {
    start: i64,
    frame: Option<ObjectHandle>,
}

#[async_trait]
impl Component for Generator {
    fn configuring(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        let config: GeneratorConfig = match ctx.config() {
            serde_json::Value::Null => GeneratorConfig::default(),
            value => serde_json::from_value(value)
                .map_err(|e| HookError::BadConfig(e.to_string()))?,
        };
        self.start = config.start;
        Ok(())
    }

    async fn starting(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        let uid = ctx
            .output_uid(FRAME_KEY)
            .ok_or_else(|| HookError::BadConfig(format!("no '{FRAME_KEY}' output declared")))?;
        let frame = DataObject::with_value(uid, FRAME_TYPE, json!({ "frame": self.start }));
        ctx.set_output(FRAME_KEY, Some(frame.clone()))
            .map_err(|e| HookError::Failed(e.to_string()))?;
        info!(uid = %ctx.uid(), frame = %frame.uid(), "Frame published");
        self.frame = Some(frame);
        Ok(())
    }

    async fn stopping(&mut self, ctx: &ServiceContext) -> Result<(), HookError> {
        if self.frame.take().is_some() {
            ctx.set_output(FRAME_KEY, None)
                .map_err(|e| HookError::Failed(e.to_string()))?;
        }
        Ok(())
    }

    async fn updating(&mut self, _ctx: &ServiceContext) -> Result<(), HookError> {
        if let Some(frame) = &self.frame {
            frame.update_value(|value| {
                let next = value["frame"].as_i64().unwrap_or(0) + 1;
                value["frame"] = json!(next);
            });
        }
        Ok(())
    }
}
