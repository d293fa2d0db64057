//! Repository-side workers: change ingestion, per-site dispatch and log
//! pruning.
mod batch_buffer;
mod dispatcher;
mod ingestor;
mod lease;
mod prune;
mod worker;

#[cfg(test)]
mod batch_buffer_test;
#[cfg(test)]
mod ingestor_test;

pub(crate) use batch_buffer::*;
pub use dispatcher::*;
pub use ingestor::*;
pub use lease::*;
pub use prune::*;
pub use worker::*;
