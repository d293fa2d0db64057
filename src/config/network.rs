use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::config_error;
use crate::Result;

/// Low-level transport parameters used for connections to client sites
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    /// TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_in_ms: u64,

    /// gRPC request completion timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_in_ms: u64,

    /// Max concurrent requests per connection
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// TCP keepalive in seconds
    #[serde(default = "default_tcp_keepalive")]
    pub tcp_keepalive_in_secs: u64,

    /// HTTP2 keepalive ping interval in seconds
    #[serde(default = "default_h2_keepalive_interval")]
    pub http2_keep_alive_interval_in_secs: u64,

    /// HTTP2 keepalive timeout in seconds
    #[serde(default = "default_h2_keepalive_timeout")]
    pub http2_keep_alive_timeout_in_secs: u64,

    /// Common TCP setting for all connections
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,

    /// gzip compression of batches on the wire
    #[serde(default = "default_enable_compression")]
    pub enable_compression: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_in_ms: default_connect_timeout(),
            request_timeout_in_ms: default_request_timeout(),
            concurrency_limit: default_concurrency_limit(),
            tcp_keepalive_in_secs: default_tcp_keepalive(),
            http2_keep_alive_interval_in_secs: default_h2_keepalive_interval(),
            http2_keep_alive_timeout_in_secs: default_h2_keepalive_timeout(),
            tcp_nodelay: default_tcp_nodelay(),
            enable_compression: default_enable_compression(),
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout_in_ms == 0 {
            return Err(config_error("connect_timeout_in_ms must be > 0"));
        }
        if self.request_timeout_in_ms <= self.connect_timeout_in_ms {
            return Err(config_error(format!(
                "request_timeout_in_ms {} should exceed connect_timeout_in_ms {}",
                self.request_timeout_in_ms, self.connect_timeout_in_ms
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(config_error("concurrency_limit must be > 0"));
        }
        if self.http2_keep_alive_timeout_in_secs >= self.http2_keep_alive_interval_in_secs {
            return Err(config_error(format!(
                "http2_keep_alive_timeout_in_secs {} should be below interval {}",
                self.http2_keep_alive_timeout_in_secs, self.http2_keep_alive_interval_in_secs
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_in_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_in_ms)
    }
}

fn default_connect_timeout() -> u64 {
    2_000
}
fn default_request_timeout() -> u64 {
    30_000
}
fn default_concurrency_limit() -> usize {
    64
}
fn default_tcp_keepalive() -> u64 {
    60
}
fn default_h2_keepalive_interval() -> u64 {
    30
}
fn default_h2_keepalive_timeout() -> u64 {
    10
}
fn default_tcp_nodelay() -> bool {
    true
}
fn default_enable_compression() -> bool {
    true
}
