//! Entity change propagation.
//!
//! A central repository records every mutation of its entities in a durable,
//! ordered change log. Dispatch workers push the changes each client site
//! subscribed to, in order and at least once, advancing a per-site cursor only
//! after the site acknowledged a whole batch. On the client side, the changes
//! are matched against recorded entity usages and the affected pages are
//! queued for re-rendering.
//!
//! Repository side: [`ChangeStore`], [`SubscriptionRegistry`], [`Dispatcher`],
//! [`Transmitter`]. Client side: [`ClientChangeHandler`], [`Invalidator`],
//! [`UsageTracker`].
mod client;
mod config;
pub(crate) mod constants;
mod dispatch;
mod errors;
mod metrics;
mod model;
mod network;
pub mod proto;
mod storage;
mod subscription;
pub mod utils;

pub use client::*;
pub use config::*;
pub use dispatch::*;
pub use errors::*;
pub use metrics::*;
pub use model::*;
pub use network::*;
pub use storage::*;
pub use subscription::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
