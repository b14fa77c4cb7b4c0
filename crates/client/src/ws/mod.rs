//! WebSocket session with the hub.
//!
//! This module provides:
//! - Connect, authenticate and subscribe as one managed lifecycle
//! - Request/response correlation by message id, with optional timeouts
//! - Auto-reconnect with exponential backoff and a heartbeat
//! - Fan-out of pushed events to registered listeners
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐ ┌──────────┐ ┌──────────┐
//! │ Session  │ │ Session  │ │ Session  │   cloneable handles
//! │ (ui)     │ │ (service)│ │ (demo)   │
//! └──────────┘ └──────────┘ └──────────┘
//!       │            │            │
//!       └────────────┼────────────┘
//!                    ▼  commands
//!         ┌─────────────────────┐
//!         │    session task     │──► status (watch)
//!         │ correlation · queue │
//!         │ backoff · heartbeat │──► listeners
//!         └─────────────────────┘
//!                    │  text frames / (epoch, event)
//!                    ▼
//!         ┌─────────────────────┐
//!         │      Transport      │
//!         │ (tokio-tungstenite) │
//!         └─────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let session = Session::with_websocket(&EnvCredentials, SessionConfig::from_env())?;
//! session.add_listener(|event: &Event| println!("{}", event.event_type));
//! session.connect().await?;
//! let states = session.get_states().await?;
//! ```

mod connection;
mod correlation;
mod listeners;
mod outbound;
mod session;
mod transport;

#[cfg(test)]
mod mock;

pub use connection::{AuthState, ConnectionState, ReconnectConfig, SessionStatus};
pub use listeners::{EventListener, ListenerId, ListenerRegistry};
pub use session::{EventSubscription, Session};
pub use transport::{
    DisconnectReason, Epoch, Transport, TransportEvent, TransportSink, TungsteniteTransport,
};
