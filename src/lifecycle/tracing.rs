//! # Observability & Tracing
//!
//! The [`setup_tracing`] function initializes structured logging with the `tracing` crate.
//!
//! ## Configuration
//!
//! The compact format hides the crate/module prefix (`with_target(false)`); every event
//! carries the uid of the service, object or manager it is about instead.
//!
//! - **Structured logging** with `tracing` crate
//! - **Configurable log levels** via `RUST_LOG` environment variable
//! - **Compact format** optimized for development
//!
//! ## What Gets Traced
//!
//! - **Services**: Started, Stopped, Swapped, hook errors with uid and classname
//! - **Graphs**: creation, start, stop and destroy of each manager, deferred objects
//!   appearing and disappearing
//! - **Channels**: signals and slots joining or leaving a proxy channel (`debug`)
//! - **Workers**: startup, shutdown and processed job counts
//!
//! ## Usage Examples
//!
//! ```bash
//! # Lifecycle events only
//! RUST_LOG=info cargo run
//!
//! # Channel and object bookkeeping
//! RUST_LOG=debug cargo run
//!
//! # Filter to specific modules
//! RUST_LOG=service_graph::lifecycle=debug cargo run
//! ```
//!
//! ## Trace Example
//!
//! **With `RUST_LOG=info`**:
//!
//! ```text
//! INFO create: Service created service="printer" classname="Printer" worker=None
//! INFO create: Graph created objects=1 services=2 deferred=1
//! INFO start: Started uid="generator" classname="Generator"
//! INFO Deferred object available manager="AppManager_0" object="frame" waiting=1
//! INFO Started uid="printer" classname="Printer"
//! ```
//!
//! Spans opened by the manager operations (`create`, `start`, ...) prefix the events they
//! contain; deferred-object reactions run outside of them.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false) // Events carry the uid instead of the module path
        .compact() // Compact format shows spans inline (e.g., "create:")
        .init();
}
