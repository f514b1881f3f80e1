//! # Lifecycle
//!
//! Everything that turns a configuration tree into a running graph and back:
//!
//! - [`AppManager`] - Creates, starts, updates, stops and destroys one graph
//! - [`DeferredTable`] - Objects the graph waits for, with their channels and dependents
//! - [`GraphError`] - Configuration and lifecycle errors
//! - [`setup_tracing`] - Log subscriber used by binaries and examples

pub mod app_manager;
pub mod deferred;
pub mod error;
pub mod tracing;

pub use app_manager::{AppManager, GraphState};
pub use deferred::{Dependent, DependentAction, DeferredTable};
pub use error::GraphError;
pub use self::tracing::setup_tracing;
