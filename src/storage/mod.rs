//! Durable state of the repository side: the change log, the per-site
//! dispatch cursors and the rejected-change log.
mod change_store;
mod cursor_store;
mod rejected_log;
mod sled_change_store;
mod sled_cursor_store;

#[cfg(test)]
mod sled_change_store_test;

use std::path::Path;

pub use change_store::*;
pub use cursor_store::*;
pub use rejected_log::*;
pub use sled_change_store::*;
pub use sled_cursor_store::*;
use tracing::debug;
use tracing::warn;

use crate::StorageConfig;

/// Opens the sled database shared by every tree of this process.
pub fn init_sled_db(config: &StorageConfig) -> std::result::Result<sled::Db, std::io::Error> {
    init_sled_db_at(&config.db_root_dir, config.cache_capacity_in_bytes, config.flush_every())
}

pub fn init_sled_db_at(
    sled_db_root_path: impl AsRef<Path> + std::fmt::Debug,
    cache_capacity: u64,
    flush_every_ms: Option<u64>,
) -> std::result::Result<sled::Db, std::io::Error> {
    debug!("init_sled_db from path: {:?}", &sled_db_root_path);

    let db_path = sled_db_root_path.as_ref().join("dispatch");

    sled::Config::default()
        .path(&db_path)
        .cache_capacity(cache_capacity)
        .flush_every_ms(flush_every_ms)
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!("Try to open DB at this location: {:?} and failed: {:?}", db_path, e);
            std::io::Error::other(e)
        })
}
