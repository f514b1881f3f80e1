//! Services: the managed wrapper around a [`Component`].
//!
//! # Main Components
//!
//! - [`Component`] - The hooks a concrete service implements
//! - [`Service`] - The runtime handle with its state machine and worker affinity
//! - [`ServiceFuture`] - Result handle of `start`/`stop`/`update`/`swap_key`
//! - [`ServiceContext`] - What a hook sees of its service (config, objects, outputs)
//!
//! # Lifecycle
//!
//! ```text
//! UNCONFIGURED --configure--> CONFIGURED
//!
//! STOPPED --start--> STARTING --> STARTED --stop--> STOPPING --> STOPPED
//!                                  |   ^
//!                             swap_key |
//!                                  v   |
//!                                 SWAPPING
//! ```
//!
//! A failing hook rolls the global status back (STOPPED for `start`, STARTED for `stop`)
//! and returns a [`ServiceError::Hook`] through the future.

pub mod component;
pub mod context;
pub mod error;
pub mod future;
pub mod handle;
pub mod state;

pub use component::{Component, Declarations, KeyConnections};
pub use context::ServiceContext;
pub use error::{HookError, ServiceError};
pub use future::{wait_all, wait_all_ok, ServiceFuture};
pub use handle::{
    Service, STARTED_SIG, START_SLOT, STOPPED_SIG, STOP_SLOT, SWAPPED_SIG, UPDATED_SIG,
    UPDATE_SLOT,
};
pub use state::{ConfigurationStatus, GlobalStatus, Stage, Status, UpdatingStatus};
