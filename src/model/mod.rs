//! Leaf data types shared by the repository side and the client side.
mod change;
mod diff;
mod ids;
mod usage;

pub use change::*;
pub use diff::*;
pub use ids::*;
pub use usage::*;
