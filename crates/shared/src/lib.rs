//! Shared wire types for the homelink hub client.
//!
//! Everything that crosses the WebSocket or REST channel lives here so the
//! session core and any tooling agree on one encoding.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
