//! # Factory
//!
//! Type-name keyed constructors for components, data objects and object parsers.
//! Concrete types are plugged in at startup; the graph manager only ever asks for them by
//! the names written in the configuration tree.

use crate::framework::lock;
use crate::model::{DataObject, ObjectHandle};
use crate::service::{Component, HookError};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Name of the parser used for object types without a dedicated one.
pub const DEFAULT_PARSER: &str = "value";

type ComponentCtor = Box<dyn Fn() -> Box<dyn Component> + Send + Sync>;
type ParserCtor = Box<dyn Fn() -> Box<dyn ObjectParser> + Send + Sync>;

/// Interprets an object's configuration block and follows the graph lifecycle.
///
/// Only `create_config` is mandatory; the other stages default to no-ops.
pub trait ObjectParser: Send + Sync {
    fn create_config(&mut self, object: &ObjectHandle, config: &Value) -> Result<(), HookError>;

    fn start_config(&mut self, _object: &ObjectHandle) -> Result<(), HookError> {
        Ok(())
    }

    fn update_config(&mut self, _object: &ObjectHandle) -> Result<(), HookError> {
        Ok(())
    }

    fn stop_config(&mut self, _object: &ObjectHandle) -> Result<(), HookError> {
        Ok(())
    }

    fn destroy_config(&mut self, _object: &ObjectHandle) -> Result<(), HookError> {
        Ok(())
    }
}

/// Copies the `value` field of the block, when present, into the object.
#[derive(Debug, Default)]
pub struct ValueParser;

impl ObjectParser for ValueParser {
    fn create_config(&mut self, object: &ObjectHandle, config: &Value) -> Result<(), HookError> {
        match config {
            Value::Null => Ok(()),
            Value::Object(map) => {
                if let Some(value) = map.get("value") {
                    object.set_value(value.clone());
                }
                Ok(())
            }
            other => Err(HookError::BadConfig(format!(
                "object '{}' expects a map, got {other}",
                object.uid()
            ))),
        }
    }
}

pub struct Factory {
    components: Mutex<HashMap<String, ComponentCtor>>,
    object_types: Mutex<HashSet<String>>,
    parsers: Mutex<HashMap<String, ParserCtor>>,
    default_parsers: Mutex<HashMap<String, String>>,
}

impl Default for Factory {
    fn default() -> Self {
        Self::new()
    }
}

impl Factory {
    /// Creates a factory knowing only the built-in [`ValueParser`].
    pub fn new() -> Self {
        let factory = Self {
            components: Mutex::new(HashMap::new()),
            object_types: Mutex::new(HashSet::new()),
            parsers: Mutex::new(HashMap::new()),
            default_parsers: Mutex::new(HashMap::new()),
        };
        factory.register_parser(DEFAULT_PARSER, || ValueParser);
        factory
    }

    pub fn register_service<C, F>(&self, type_name: &str, ctor: F)
    where
        C: Component + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        lock(&self.components).insert(
            type_name.to_string(),
            Box::new(move || Box::new(ctor()) as Box<dyn Component>),
        );
    }

    pub fn register_object_type(&self, type_name: &str) {
        lock(&self.object_types).insert(type_name.to_string());
    }

    pub fn register_parser<P, F>(&self, name: &str, ctor: F)
    where
        P: ObjectParser + 'static,
        F: Fn() -> P + Send + Sync + 'static,
    {
        lock(&self.parsers).insert(
            name.to_string(),
            Box::new(move || Box::new(ctor()) as Box<dyn ObjectParser>),
        );
    }

    pub fn set_default_parser(&self, object_type: &str, parser: &str) {
        lock(&self.default_parsers).insert(object_type.to_string(), parser.to_string());
    }

    pub fn has_service_type(&self, type_name: &str) -> bool {
        lock(&self.components).contains_key(type_name)
    }

    pub fn has_object_type(&self, type_name: &str) -> bool {
        lock(&self.object_types).contains(type_name)
    }

    pub fn create(&self, type_name: &str) -> Option<Box<dyn Component>> {
        lock(&self.components).get(type_name).map(|ctor| ctor())
    }

    pub fn create_object(&self, type_name: &str, uid: &str) -> Option<ObjectHandle> {
        self.has_object_type(type_name)
            .then(|| DataObject::new(uid, type_name))
    }

    /// Parser name for an object type, falling back to [`DEFAULT_PARSER`].
    pub fn default_parser_for(&self, object_type: &str) -> String {
        lock(&self.default_parsers)
            .get(object_type)
            .cloned()
            .unwrap_or_else(|| DEFAULT_PARSER.to_string())
    }

    pub fn create_parser(&self, name: &str) -> Option<Box<dyn ObjectParser>> {
        lock(&self.parsers).get(name).map(|ctor| ctor())
    }
}
