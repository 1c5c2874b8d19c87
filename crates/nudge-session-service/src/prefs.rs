// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted host preferences.

use std::path::PathBuf;
use std::time::Duration;

use nudge_session_proto::default_socket_path;
use serde::{Deserialize, Serialize};

use crate::registry::HubConfig;

/// Config key the prefs live under.
pub const PREFS_KEY: &str = "session_host";

/// Host settings, stored as JSON through the config service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionHostPrefs {
    /// Unix socket the hub listens on.
    pub socket_path: String,
    /// Where session records live; the platform data dir when unset.
    pub data_dir: Option<String>,
    /// Idle time before an actor is evicted.
    pub idle_timeout_ms: u64,
    /// Frames buffered per connection before broadcasts to it are dropped.
    pub outbox_capacity: usize,
}

impl Default for SessionHostPrefs {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path().display().to_string(),
            data_dir: None,
            idle_timeout_ms: 30_000,
            outbox_capacity: 256,
        }
    }
}

impl SessionHostPrefs {
    /// Socket path as a filesystem path.
    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(&self.socket_path)
    }

    /// Hub tunables derived from these prefs (default retry policy).
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            ..HubConfig::default()
        }
    }
}
