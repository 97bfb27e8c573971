//! Server and per-session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the duplex session server.
///
/// Durations are serialized as integer milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route path for the upgrade endpoint (default `"/ws"`).
    pub path: String,
    /// Inbound queue depth per session.
    pub inbound_capacity: usize,
    /// Outbound queue depth per session.
    pub outbound_capacity: usize,
    /// Read buffer size in bytes for the upgraded connection.
    pub read_buffer_size: usize,
    /// Write buffer size in bytes for the upgraded connection.
    pub write_buffer_size: usize,
    /// Maximum inbound message size in bytes; `None` leaves the protocol
    /// default in place.
    pub max_message_size: Option<usize>,
    /// Upgrade handshake timeout.
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,
    /// Maximum allowed silence before a session is presumed dead. Also the
    /// per-receive read deadline.
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Deadline applied to each individual write.
    #[serde(with = "duration_ms")]
    pub write_deadline: Duration,
    /// Delay between sending the close notification and releasing the
    /// connection.
    #[serde(with = "duration_ms")]
    pub close_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 0,
            path: "/ws".into(),
            inbound_capacity: 1000,
            outbound_capacity: 1000,
            read_buffer_size: 1024,
            write_buffer_size: 1024,
            max_message_size: None,
            handshake_timeout: Duration::from_secs(3),
            heartbeat_interval: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
            close_grace: Duration::from_millis(500),
        }
    }
}

impl ServerConfig {
    /// Snapshot the per-session portion of this configuration.
    #[must_use]
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            inbound_capacity: self.inbound_capacity,
            outbound_capacity: self.outbound_capacity,
            heartbeat_interval: self.heartbeat_interval,
            write_deadline: self.write_deadline,
            close_grace: self.close_grace,
        }
    }
}

/// Per-session configuration snapshot, captured when a pooled session is
/// reset for a new connection.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// Inbound queue depth.
    pub inbound_capacity: usize,
    /// Outbound queue depth.
    pub outbound_capacity: usize,
    /// Maximum allowed silence; also the per-receive read deadline.
    pub heartbeat_interval: Duration,
    /// Deadline applied to each individual write.
    pub write_deadline: Duration,
    /// Delay between close notification and connection release.
    pub close_grace: Duration,
}

impl SessionConfig {
    /// Interval at which the writer emits liveness probes: 80% of the
    /// heartbeat interval.
    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        self.heartbeat_interval.mul_f64(0.8)
    }

    /// Interval at which the liveness monitor polls: 10% of the heartbeat
    /// interval, floored at 1ms.
    #[must_use]
    pub fn monitor_interval(&self) -> Duration {
        self.heartbeat_interval
            .mul_f64(0.1)
            .max(Duration::from_millis(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        ServerConfig::default().session()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
