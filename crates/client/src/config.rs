//! Session configuration, with environment overrides.

use std::time::Duration;

use crate::ws::ReconnectConfig;

/// Transport-level keepalive.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    /// Time between pings while connected.
    pub interval: Duration,
    /// How long to wait for a pong (or any inbound frame) after a ping.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Everything that tunes a [`Session`](crate::ws::Session).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    /// Applied to every correlated request without an explicit timeout.
    /// `None` waits until the response or a disconnect.
    pub request_timeout: Option<Duration>,
    /// Frames held while the session is not ready. Further sends fail with
    /// `QueueFull`.
    pub outbound_queue_capacity: usize,
    /// Event type subscribed to after every successful authentication.
    /// `None` disables the automatic subscription.
    pub auto_subscribe: Option<String>,
    /// Disconnect after this long without application traffic. The session
    /// does not reconnect on its own after an idle disconnect.
    pub idle_timeout: Option<Duration>,
    /// Upper bound for the transport's connect handshake.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            request_timeout: Some(Duration::from_secs(30)),
            outbound_queue_capacity: 256,
            auto_subscribe: Some(homelink_shared::STATE_CHANGED.to_string()),
            idle_timeout: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    /// Defaults overlaid with environment variables.
    ///
    /// Environment variables:
    /// - `HOMELINK_RECONNECT_MAX_ATTEMPTS`: ceiling before giving up (0 = never)
    /// - `HOMELINK_RECONNECT_INITIAL_DELAY_MS` / `HOMELINK_RECONNECT_MAX_DELAY_MS`
    /// - `HOMELINK_HEARTBEAT_INTERVAL_SECS` / `HOMELINK_HEARTBEAT_TIMEOUT_SECS`
    ///   (an interval of 0 disables the heartbeat)
    /// - `HOMELINK_REQUEST_TIMEOUT_SECS`: 0 disables the default request timeout
    /// - `HOMELINK_OUTBOUND_QUEUE_CAPACITY`
    /// - `HOMELINK_IDLE_TIMEOUT_SECS`: 0 disables the idle disconnect
    /// - `HOMELINK_SUBSCRIBE_EVENT_TYPE`: empty disables the automatic subscription
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let number = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring {}={:?}: not a number", key, raw);
                    None
                }
            }
        };

        if let Some(n) = number("HOMELINK_RECONNECT_MAX_ATTEMPTS") {
            config.reconnect.max_attempts = n.min(u32::MAX as u64) as u32;
        }
        if let Some(n) = number("HOMELINK_RECONNECT_INITIAL_DELAY_MS") {
            config.reconnect.initial_delay_ms = n.min(u32::MAX as u64) as u32;
        }
        if let Some(n) = number("HOMELINK_RECONNECT_MAX_DELAY_MS") {
            config.reconnect.max_delay_ms = n.min(u32::MAX as u64) as u32;
        }
        if let Some(n) = number("HOMELINK_HEARTBEAT_INTERVAL_SECS") {
            config.heartbeat.enabled = n > 0;
            if n > 0 {
                config.heartbeat.interval = Duration::from_secs(n);
            }
        }
        if let Some(n) = number("HOMELINK_HEARTBEAT_TIMEOUT_SECS") {
            config.heartbeat.timeout = Duration::from_secs(n.max(1));
        }
        if let Some(n) = number("HOMELINK_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = (n > 0).then(|| Duration::from_secs(n));
        }
        if let Some(n) = number("HOMELINK_OUTBOUND_QUEUE_CAPACITY") {
            config.outbound_queue_capacity = n as usize;
        }
        if let Some(n) = number("HOMELINK_IDLE_TIMEOUT_SECS") {
            config.idle_timeout = (n > 0).then(|| Duration::from_secs(n));
        }
        if let Some(event_type) = lookup("HOMELINK_SUBSCRIBE_EVENT_TYPE") {
            let event_type = event_type.trim();
            config.auto_subscribe = (!event_type.is_empty()).then(|| event_type.to_string());
        }

        config
    }
}
