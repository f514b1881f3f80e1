//! Concrete components used by the demo binary and the integration tests.
//!
//! - [`Generator`] - Publishes a `Frame` object as a service output
//! - [`Printer`] - Prints its input each time it is modified
//! - [`Incrementer`] - Bumps a counter held by an in/out object
//!
//! [`register_all`] plugs them into a [`Factory`](crate::registry::Factory) under their type
//! names.

pub mod generator;
pub mod incrementer;
pub mod printer;

pub use generator::{Generator, FRAME_KEY, FRAME_TYPE};
pub use incrementer::{Incrementer, COUNTER_KEY};
pub use printer::{PrintLog, Printer, INPUT_KEY, REFRESH_SLOT};

use crate::registry::Factory;

/// Registers the demo components and the `Frame`/`Counter` object types.
pub fn register_all(factory: &Factory, log: &PrintLog) {
    factory.register_service("Generator", Generator::default);
    factory.register_service("Incrementer", Incrementer::default);
    let log = log.clone();
    factory.register_service("Printer", move || Printer::with_log(log.clone()));
    factory.register_object_type(FRAME_TYPE);
    factory.register_object_type("Counter");
}
