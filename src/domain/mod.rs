pub mod conditional;
pub mod registry;

pub use conditional::*;
pub use registry::*;
