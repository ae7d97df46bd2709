//! Keepalive timing shared by both pumps.
//!
//! - `write_wait`: deadline for any single frame write
//! - `pong_wait`: read deadline, reset by every inbound frame (pongs included)
//! - `ping_period`: always `pong_wait * 9 / 10`, so a ping leaves before the
//!   peer's silence could exceed `pong_wait`
//! - `max_message_size`: inbound messages above this size are fatal

use std::time::Duration;

use notify_settings::ConnectionSettings;

/// Default write deadline.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Default liveness deadline.
pub const PONG_WAIT: Duration = Duration::from_secs(60);
/// Default maximum inbound message size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Keepalive timing for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Deadline for a single frame write.
    pub write_wait: Duration,
    /// Maximum silence tolerated from the peer.
    pub pong_wait: Duration,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Keepalive {
    /// Interval between keepalive pings.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl From<&ConnectionSettings> for Keepalive {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            write_wait: settings.write_wait(),
            pong_wait: settings.pong_wait(),
            max_message_size: settings.max_message_size,
        }
    }
}
