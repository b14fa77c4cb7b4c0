//! Observable session state and the reconnect backoff policy.

use std::time::Duration;

use rand::Rng;

/// Connection state for the WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, ConnectionState::Connecting)
    }
}

/// Authentication progress on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    NotAuthenticated,
    Authenticating,
    Authenticated,
}

/// Snapshot published to observers on every change.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    pub connection: ConnectionState,
    pub auth: AuthState,
    /// Reconnection attempts since the last authenticated session.
    pub reconnect_attempt: u32,
    /// Set once the reconnect ceiling is hit; cleared by the next `connect()`.
    pub unreachable: bool,
    /// Most recent failure worth showing to a user (auth rejection, unreachable).
    pub last_error: Option<String>,
}

impl SessionStatus {
    /// Connected and authenticated: application traffic flows immediately.
    pub fn is_ready(&self) -> bool {
        self.connection.is_connected() && self.auth == AuthState::Authenticated
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnect attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
    /// Random extra delay as a fraction of the computed delay (0.0 = none)
    pub jitter: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(attempt as i32);
        (delay as u32).min(self.max_delay_ms)
    }

    /// Delay for `attempt` with jitter applied, never above the cap.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for_attempt(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let extra = if jitter > 0.0 && base > 0 {
            rand::thread_rng().gen_range(0.0..=jitter) * base as f32
        } else {
            0.0
        };
        let total = (base as f32 + extra) as u32;
        Duration::from_millis(total.min(self.max_delay_ms) as u64)
    }

    /// Whether `attempts` already used up the ceiling.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}
