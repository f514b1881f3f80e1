//! # Framework Errors
//!
//! Errors raised by the plumbing itself rather than by a component. Component failures
//! live in [`crate::service::HookError`] and graph build failures in
//! [`crate::lifecycle::GraphError`].

/// Errors that can occur within the worker/queue layer.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum FrameworkError {
    #[error("Worker '{0}' closed")]
    WorkerClosed(String),
    #[error("Worker '{0}' dropped response channel")]
    WorkerDropped(String),
}
