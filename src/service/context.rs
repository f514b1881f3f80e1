use crate::framework::{HasSignals, Worker};
use crate::model::{Access, DataKey, ObjectHandle};
use crate::service::{Service, ServiceError};
use serde_json::Value;
use tracing::debug;

/// What a component sees of its service while a hook runs.
pub struct ServiceContext {
    service: Service,
}

impl ServiceContext {
    pub(crate) fn new(service: Service) -> Self {
        Self { service }
    }

    pub fn uid(&self) -> &str {
        self.service.uid()
    }

    pub fn config(&self) -> Value {
        self.service.config()
    }

    /// Object bound to `key` (input, in/out or published output).
    pub fn object(&self, key: impl Into<DataKey>) -> Option<ObjectHandle> {
        self.service.object(&key.into())
    }

    pub fn input(&self, key: &str) -> Option<ObjectHandle> {
        self.object(key)
    }

    pub fn input_at(&self, key: &str, index: usize) -> Option<ObjectHandle> {
        self.object(DataKey::indexed(key, index))
    }

    /// Uid the configuration binds to output `key`.
    pub fn output_uid(&self, key: &str) -> Option<String> {
        self.service
            .declaration()
            .objects
            .into_iter()
            .find(|o| o.access == Access::Out && o.key == key)
            .map(|o| o.uid)
    }

    /// Publishes (or withdraws, with `None`) the object of output `key` in the registry.
    ///
    /// The object must carry the uid the configuration binds to that key. Graphs waiting on
    /// that uid as a deferred object react asynchronously.
    pub fn set_output(&self, key: &str, object: Option<ObjectHandle>) -> Result<(), ServiceError> {
        let expected = self
            .output_uid(key)
            .ok_or_else(|| ServiceError::UnknownKey {
                uid: self.uid().to_string(),
                key: key.to_string(),
            })?;
        if let Some(found) = object.as_ref().filter(|o| o.uid() != expected) {
            return Err(ServiceError::OutputMismatch {
                uid: self.uid().to_string(),
                key: key.to_string(),
                expected,
                found: found.uid().to_string(),
            });
        }

        let registry = self.service.registry();
        if registry.exists(&expected) {
            let _ = registry.unregister(&expected)?;
        }

        match object {
            Some(object) => {
                let _ = registry.register_object(object.clone())?;
                self.service.set_object(DataKey::new(key), Some(object));
                debug!(uid = %self.uid(), key, object = %expected, "Output published");
            }
            None => {
                self.service.set_object(DataKey::new(key), None);
                debug!(uid = %self.uid(), key, object = %expected, "Output withdrawn");
            }
        }
        Ok(())
    }

    /// Emits one of the service's signals. Returns the number of slots reached.
    pub fn emit(&self, signal: &str, payload: Value) -> usize {
        self.service
            .signal(signal)
            .map(|s| s.emit(&payload))
            .unwrap_or(0)
    }

    /// Worker running the current hook, if any.
    pub fn worker_name(&self) -> Option<String> {
        Worker::current()
    }
}
