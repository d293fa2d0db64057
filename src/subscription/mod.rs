//! Which client sites care about which entities.
mod registry;
mod sled_registry;


pub use registry::*;
pub use sled_registry::*;
