//! Pure data: the objects services operate on and the configuration tree describing a graph.

pub mod config;
pub mod object;

pub use config::*;
pub use object::*;
