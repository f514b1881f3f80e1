use crate::proxy::ProxyError;
use crate::registry::RegistryError;
use crate::service::{HookError, ServiceError};

/// Errors raised while building or driving a graph.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum GraphError {
    #[error("Missing attribute '{attribute}' in '{element}' element")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("Uid '{0}' already exists")]
    DuplicateUid(String),
    #[error("Factory could not create service of type '{0}'")]
    UnknownServiceType(String),
    #[error("Factory could not create object of type '{0}'")]
    UnknownObjectType(String),
    #[error("No object parser named '{0}'")]
    UnknownParser(String),
    #[error("Object '{0}' not found")]
    UnknownObject(String),
    #[error("Object '{uid}' has type '{found}', expected '{expected}'")]
    TypeMismatch {
        uid: String,
        expected: String,
        found: String,
    },
    #[error("Object '{object}' used by service '{service}' is not declared in this configuration")]
    UndeclaredObject { service: String, object: String },
    #[error("{directive} requested for service '{uid}', but it does not exist")]
    UnknownService { directive: &'static str, uid: String },
    #[error("Configuration of object '{uid}' failed: {source}")]
    ObjectConfig { uid: String, source: HookError },
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl GraphError {
    /// True when a component asked the application to exit.
    pub fn is_exit(&self) -> bool {
        matches!(self, GraphError::Service(err) if err.is_exit())
    }
}
