//! Session configuration
//!
//! All fields carry serde defaults so a partial config (or an empty one)
//! deserializes to a usable value set.

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::Client`] session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Peer host to announce to (default: 127.0.0.1)
    #[serde(default = "default_server_host")]
    pub server_host: String,

    /// Peer port (default: 11235)
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Local port the inbound socket binds to (default: 27788).
    ///
    /// `0` asks the OS for an ephemeral port; the announced port is always
    /// the one actually bound.
    #[serde(default = "default_client_port")]
    pub client_port: u16,

    /// Heartbeat re-announcement period in milliseconds (default: 300000).
    ///
    /// Five minutes by default; hosts that want a tighter liveness signal
    /// can lower this freely.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Reserved pass-through flag for synchronous-vs-asynchronous push mode.
    /// Not interpreted by the session core.
    #[serde(default)]
    pub async_push: bool,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    11235
}

fn default_client_port() -> u16 {
    27788
}

fn default_heartbeat_interval() -> u64 {
    300_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
            client_port: default_client_port(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            async_push: false,
        }
    }
}
