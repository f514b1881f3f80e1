//! Process-level collaborators of a graph, bundled in an explicit [`Context`].
//!
//! Several independent graphs may share one context (and then see each other's objects),
//! or each test can build its own and stay isolated.

pub mod factory;
pub mod ids;

pub use factory::{Factory, ObjectParser, ValueParser, DEFAULT_PARSER};
pub use ids::{Notice, Notified, Registered, Registry, RegistryError, RegistryEvent};

use crate::framework::WorkerRegistry;
use crate::proxy::ProxyBus;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Context {
    pub registry: Arc<Registry>,
    pub factory: Arc<Factory>,
    pub bus: Arc<ProxyBus>,
    pub workers: Arc<WorkerRegistry>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(factory: Factory) -> Self {
        Self {
            factory: Arc::new(factory),
            ..Self::default()
        }
    }
}
