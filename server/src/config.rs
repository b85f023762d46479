//! Server configuration
//!
//! Every field has a default, so a config file only needs to name what it
//! changes. Command-line flags in the binary override the file.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: String,
    /// Sessions admitted at once, counting those still logging in
    pub max_players: usize,
    /// Radius, in chunks, of the square streamed around each player
    pub view_distance: i32,
    /// How long an unsubscribed chunk stays cached
    pub chunk_idle_secs: u64,
    /// Period of the chunk eviction sweep
    pub eviction_interval_secs: u64,
    pub keep_alive_interval_secs: u64,
    /// Silence after which a session is dropped
    pub keep_alive_timeout_secs: u64,
    /// First air layer of the flat terrain
    pub ground_level: usize,
    /// Packets queued for one client before it is dropped as too slow
    pub outbound_queue_len: usize,
    /// How long a single socket write may stall
    pub write_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:25565".to_string(),
            max_players: 20,
            view_distance: 5,
            chunk_idle_secs: 30,
            eviction_interval_secs: 5,
            keep_alive_interval_secs: 1,
            keep_alive_timeout_secs: 60,
            ground_level: 64,
            outbound_queue_len: 4096,
            write_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    /// Loads a JSON config file; missing fields fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ServerError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ServerError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn chunk_idle(&self) -> Duration {
        Duration::from_secs(self.chunk_idle_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs.max(1))
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_interval_secs.max(1))
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.keep_alive_timeout_secs)
    }

    pub fn outbound_capacity(&self) -> usize {
        self.outbound_queue_len.max(1)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs.max(1))
    }
}
