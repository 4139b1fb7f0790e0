//! Rules, aliases and the registry generation writes them into.

pub mod plan;
mod registry;
mod sink;
mod types;

pub use registry::*;
pub use sink::*;
pub use types::*;
