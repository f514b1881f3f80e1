//! Engine plumbing shared by every layer of the graph runtime.
//!
//! This module provides the low-level building blocks the services and the graph manager
//! are made of: sequential task queues, signal/slot wiring and the framework error type.
//!
//! # Main Components
//!
//! - [`Worker`] - A named sequential task queue that services can be pinned to
//! - [`WorkerRegistry`] - Process-level table of named workers
//! - [`Signal`] / [`Slot`] - Synchronous publish/subscribe primitives
//! - [`FrameworkError`] - Errors raised by the plumbing itself (closed or dropped workers)
//!
//! # Testing
//!
//! See [`mock`] module for a recording component to test graphs without writing real services.

pub mod com;
pub mod error;
pub mod mock;
pub mod worker;

pub use com::*;
pub use error::FrameworkError;
pub use worker::{Posted, Worker, WorkerLoop, WorkerRegistry, WorkerRequest};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a std mutex, recovering the guard if a previous holder panicked.
///
/// Fatal assertions inside the runtime are plain panics; the protected tables stay
/// structurally valid when that happens, so poisoning is ignored.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
