//! Shared helpers for unit tests: builders for change records, fixtures
//! wiring the sled-backed components over a temporary directory and an
//! in-process relay server.
mod change_builder;
mod common;
mod mock_relay;

pub use change_builder::*;
pub use common::*;
pub use mock_relay::*;
