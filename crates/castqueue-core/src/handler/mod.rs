//! Stage handler contract and registry (component C5).

pub mod registry;
pub mod types;

pub use registry::HandlerRegistry;
pub use types::{Handler, HandlerContext};
