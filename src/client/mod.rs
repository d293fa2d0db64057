//! Client-site side of change propagation: which local pages use which
//! entities, and turning delivered changes into purge jobs.
mod classifier;
mod handler;
mod invalidator;
mod render_queue;
mod usage_tracker;


pub use classifier::*;
pub use handler::*;
pub use invalidator::*;
pub use render_queue::*;
pub use usage_tracker::*;
