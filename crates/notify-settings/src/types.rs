//! Settings structs.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! needs the keys it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotifySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Dispatch loop queues.
    pub hub: HubSettings,
    /// Per-connection buffering and keepalive.
    pub connection: ConnectionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl NotifySettings {
    /// Reject values the hub cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.hub.validate()?;
        self.connection.validate()
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` for auto-assign).
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8084,
        }
    }
}

/// Dispatch loop queue capacities.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Capacity of the broadcast dispatch queue. Producers block when full.
    pub broadcast_capacity: usize,
    /// Capacity of the registration and unregistration intakes.
    pub intake_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            intake_capacity: 64,
        }
    }
}

impl HubSettings {
    fn validate(&self) -> Result<()> {
        if self.broadcast_capacity == 0 {
            return Err(SettingsError::out_of_range("hub.broadcastCapacity", "must be > 0"));
        }
        if self.intake_capacity == 0 {
            return Err(SettingsError::out_of_range("hub.intakeCapacity", "must be > 0"));
        }
        Ok(())
    }
}

/// Per-connection buffering and keepalive settings.
///
/// The ping period is not configurable: it is always 9/10 of `pong_wait_ms`
/// so a ping reaches the peer before either side times the connection out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Capacity of each connection's outbound send buffer.
    pub send_buffer_capacity: usize,
    /// Deadline for a single frame write, in milliseconds.
    pub write_wait_ms: u64,
    /// Maximum silence tolerated from the peer, in milliseconds.
    pub pong_wait_ms: u64,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            send_buffer_capacity: 256,
            write_wait_ms: 10_000,
            pong_wait_ms: 60_000,
            max_message_size: 512,
        }
    }
}

impl ConnectionSettings {
    /// Deadline for a single frame write.
    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    /// Liveness deadline.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    /// Keepalive ping interval, 9/10 of the liveness deadline.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    fn validate(&self) -> Result<()> {
        if self.send_buffer_capacity == 0 {
            return Err(SettingsError::out_of_range("connection.sendBufferCapacity", "must be > 0"));
        }
        if self.write_wait_ms == 0 {
            return Err(SettingsError::out_of_range("connection.writeWaitMs", "must be > 0"));
        }
        // a ping period of zero would panic in tokio::time::interval
        if self.pong_wait_ms < 10 {
            return Err(SettingsError::out_of_range("connection.pongWaitMs", "must be >= 10"));
        }
        if self.max_message_size == 0 {
            return Err(SettingsError::out_of_range("connection.maxMessageSize", "must be > 0"));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
