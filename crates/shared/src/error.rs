//! Shared error types for the WebSocket protocol and the REST channel.

use serde::{Deserialize, Serialize};

/// A frame that could not be turned into a protocol message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, not an object, or no string `type` field.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// The `type` was recognised but the body did not match it.
    #[error("failed to decode `{kind}` message: {reason}")]
    Decode { kind: String, reason: String },
    /// An outbound payload could not be serialized into a JSON object.
    #[error("failed to encode message: {0}")]
    Encode(String),
}

/// Error payload attached to a `result` frame with `success: false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServerError {
    pub code: String,
    pub message: String,
}

impl ServerError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Body the hub returns alongside non-2xx REST responses.
#[derive(Debug, Clone, Deserialize)]
struct RestErrorBody {
    message: Option<String>,
}

/// Attempt to pull a human-readable message out of a REST error body.
pub fn try_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<RestErrorBody>(body).ok()?;
    parsed.message.filter(|m| !m.trim().is_empty())
}

/// REST client error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

impl ApiError {
    /// Build an HTTP error, preferring the hub's `message` over the raw body.
    pub fn http(status: u16, body: String) -> Self {
        let body = try_error_message(&body).unwrap_or(body);
        ApiError::Http { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_prefers_message_field() {
        let err = ApiError::http(404, r#"{"message": "Entity not found."}"#.to_string());
        assert_eq!(
            err,
            ApiError::Http {
                status: 404,
                body: "Entity not found.".to_string()
            }
        );
    }

    #[test]
    fn test_http_error_keeps_plain_body() {
        let err = ApiError::http(401, "401: Unauthorized".to_string());
        assert_eq!(err.to_string(), "HTTP 401: 401: Unauthorized");
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::new("not_found", "Service not found.");
        assert_eq!(err.to_string(), "not_found: Service not found.");
    }
}
