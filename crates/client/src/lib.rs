//! Homelink Client - persistent session with a home-automation hub
//!
//! This crate contains the WebSocket session core (authentication,
//! request/response correlation, reconnection, event fan-out), the
//! credential and configuration layers around it, and a small REST client.

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod rest;
pub mod services;
pub mod ws;

pub use config::{HeartbeatConfig, SessionConfig};
pub use credentials::{CredentialProvider, Credentials, EnvCredentials, SecretsFile, StaticCredentials};
pub use error::{Result, SessionError};
pub use rest::RestClient;
pub use services::ServiceCall;
pub use ws::{
    AuthState, ConnectionState, EventListener, ListenerId, ReconnectConfig, Session, SessionStatus,
    Transport, TransportEvent, TungsteniteTransport,
};
