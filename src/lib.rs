//! # Service Graph
//!
//! > **A declarative service-graph runtime on Tokio.**
//!
//! A configuration tree names data objects, the services operating on them and the
//! signal/slot channels between them. An [`AppManager`](lifecycle::AppManager) builds that
//! graph, drives every service through its lifecycle and re-plays parts of it when objects
//! the graph waits for ("deferred" objects) appear or disappear at runtime.
//!
//! ## 🚀 Core Concepts
//!
//! ### Components and Services
//! A [`Component`](service::Component) is the user-written part: `configuring`, `starting`,
//! `stopping`, `updating` and `swapping` hooks. The runtime wraps it in a
//! [`Service`](service::Service) that owns the state machine, the worker affinity and the
//! connections, so components never deal with plumbing.
//!
//! ### Deferred Objects
//! A graph may reference an object it does not create. Services that need it are recorded in
//! the [`DeferredTable`](lifecycle::DeferredTable) and only created (and started) once the
//! object is registered; they are stopped and destroyed when it goes away. Optional
//! dependencies are swapped in and out without restarting the service.
//!
//! ### Channels
//! Connections are written `"<uid>/<member>"` and routed through the
//! [`ProxyBus`](proxy::ProxyBus). Endpoints whose owner does not exist yet simply wait.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Explicit Context
//! The [`Registry`](registry::Registry), [`Factory`](registry::Factory), proxy bus and worker
//! registry are bundled in a [`Context`](registry::Context) handed to each manager. Graphs
//! sharing a context see each other's objects; tests build their own and stay isolated.
//!
//! ### 2. Error Handling
//! Configuration problems come back as [`GraphError`](lifecycle::GraphError). Hook failures
//! are logged at the service boundary, roll the service back to its last stable state and
//! reach the caller as [`ServiceError`](service::ServiceError). Caller bugs (starting a
//! started service, swapping while stopped, ...) panic.
//!
//! ### 3. Concurrency Model
//! A service without a worker runs its operations in the awaiting task. A service pinned to
//! a [`Worker`](framework::Worker) has them marshalled onto that worker's sequential queue,
//! so one service never runs two hooks at once.
//!
//! ### 4. Observability
//! We use `tracing` everywhere with structured fields (`uid`, `classname`, `channel`, ...).
//! See the [`lifecycle::tracing`] module for details.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Engine ([`framework`])
//! Workers, signals and slots, and the recording [`MockComponent`](framework::mock::MockComponent).
//!
//! ### 2. The Data ([`model`])
//! [`DataObject`](model::DataObject) and the configuration tree ([`AppConfig`](model::AppConfig)).
//!
//! ### 3. The Collaborators ([`registry`], [`proxy`])
//! Uid registry with change notifications, type factory, channel routing.
//!
//! ### 4. The Services ([`service`])
//! Component hooks, the service state machine and its futures.
//!
//! ### 5. The Orchestrator ([`lifecycle`])
//! The graph manager and its deferred object table.
//!
//! ### 6. The Demo ([`components`])
//! A generator, a printer and an incrementer used by the demo binary and the tests.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run the demo with info logs
//! RUST_LOG=info cargo run
//!
//! # Run the tests
//! cargo test
//! ```

pub mod components;
pub mod framework;
pub mod lifecycle;
pub mod model;
pub mod proxy;
pub mod registry;
pub mod service;
