//! Errors surfaced by the session core.

use std::time::Duration;

use homelink_shared::{ProtocolError, ServerError};

/// Convenience alias used throughout the client.
pub type Result<T, E = SessionError> = std::result::Result<T, E>;

/// Every way a session operation can fail.
///
/// Transport failures are recovered inside the session; callers only see
/// them as [`SessionError::ConnectionLost`] on requests that were already on
/// the wire.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Missing or invalid server URL or access token. Fatal at construction.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("connection lost")]
    ConnectionLost,
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("encoding error: {0}")]
    Encoding(String),
    #[error("decoding error: {0}")]
    Decoding(String),
    /// The server answered with `success: false`.
    #[error("server error {code}: {message}")]
    Server { code: String, message: String },
    #[error("outbound queue is full ({0} frames waiting)")]
    QueueFull(usize),
    #[error("server unreachable after {attempts} reconnection attempts")]
    Unreachable { attempts: u32 },
    /// The session task has stopped.
    #[error("session closed")]
    Closed,
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Encode(msg) => SessionError::Encoding(msg),
            ProtocolError::Decode { .. } => SessionError::Decoding(err.to_string()),
            ProtocolError::Malformed(msg) => SessionError::Protocol(msg),
        }
    }
}

impl From<ServerError> for SessionError {
    fn from(err: ServerError) -> Self {
        SessionError::Server {
            code: err.code,
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_errors_map_to_taxonomy() {
        assert_eq!(
            SessionError::from(ProtocolError::Encode("bad".into())),
            SessionError::Encoding("bad".into())
        );
        assert!(matches!(
            SessionError::from(ProtocolError::Decode {
                kind: "result".into(),
                reason: "missing field `id`".into()
            }),
            SessionError::Decoding(ref m) if m.contains("result")
        ));
        assert_eq!(
            SessionError::from(ProtocolError::Malformed("eof".into())),
            SessionError::Protocol("eof".into())
        );
    }

    #[test]
    fn test_server_error_conversion() {
        let err: SessionError = ServerError::new("unauthorized", "nope").into();
        assert_eq!(err.to_string(), "server error unauthorized: nope");
    }
}
