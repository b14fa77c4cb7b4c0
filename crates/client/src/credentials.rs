//! Where the hub URL and long-lived access token come from.
//!
//! Credentials are read once when a session is built. A missing or malformed
//! value is a configuration error, never something to retry.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SessionError};

/// Source of the hub URL and access token.
pub trait CredentialProvider: Send + Sync {
    fn server_url(&self) -> Result<Url>;
    fn access_token(&self) -> Result<String>;
}

/// Resolved pair, validated once.
#[derive(Clone)]
pub struct Credentials {
    pub server_url: Url,
    access_token: String,
}

impl Credentials {
    /// Pull both values from `provider`, failing on the first missing one.
    pub fn load(provider: &dyn CredentialProvider) -> Result<Self> {
        let server_url = provider.server_url()?;
        let access_token = provider.access_token()?;
        if access_token.trim().is_empty() {
            return Err(SessionError::Configuration(
                "access token is empty".to_string(),
            ));
        }
        Ok(Self {
            server_url,
            access_token,
        })
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn websocket_url(&self) -> Result<Url> {
        websocket_url(&self.server_url)
    }

    pub fn rest_base_url(&self) -> Result<Url> {
        rest_base_url(&self.server_url)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server_url", &self.server_url.as_str())
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Credentials known up front.
#[derive(Clone)]
pub struct StaticCredentials {
    server_url: String,
    access_token: String,
}

impl StaticCredentials {
    pub fn new(server_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            access_token: access_token.into(),
        }
    }
}

impl CredentialProvider for StaticCredentials {
    fn server_url(&self) -> Result<Url> {
        parse_url(&self.server_url)
    }

    fn access_token(&self) -> Result<String> {
        Ok(self.access_token.clone())
    }
}

/// Reads `HOMELINK_SERVER_URL` and `HOMELINK_ACCESS_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentials;

pub const ENV_SERVER_URL: &str = "HOMELINK_SERVER_URL";
pub const ENV_ACCESS_TOKEN: &str = "HOMELINK_ACCESS_TOKEN";

impl CredentialProvider for EnvCredentials {
    fn server_url(&self) -> Result<Url> {
        let raw = std::env::var(ENV_SERVER_URL).map_err(|_| {
            SessionError::Configuration(format!("{} is not set", ENV_SERVER_URL))
        })?;
        parse_url(&raw)
    }

    fn access_token(&self) -> Result<String> {
        std::env::var(ENV_ACCESS_TOKEN)
            .map_err(|_| SessionError::Configuration(format!("{} is not set", ENV_ACCESS_TOKEN)))
    }
}

/// JSON secrets file:
///
/// ```json
/// { "server_url": "https://hub.local:8123", "access_token": "..." }
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct SecretsFile {
    pub server_url: Option<String>,
    pub access_token: Option<String>,
}

impl SecretsFile {
    /// `<config dir>/homelink/secrets.json`, e.g. `~/.config/homelink/secrets.json`.
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("homelink").join("secrets.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SessionError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            SessionError::Configuration(format!("invalid secrets file {}: {}", path.display(), e))
        })
    }
}

impl CredentialProvider for SecretsFile {
    fn server_url(&self) -> Result<Url> {
        let raw = self.server_url.as_deref().ok_or_else(|| {
            SessionError::Configuration("secrets file has no server_url".to_string())
        })?;
        parse_url(raw)
    }

    fn access_token(&self) -> Result<String> {
        self.access_token.clone().ok_or_else(|| {
            SessionError::Configuration("secrets file has no access_token".to_string())
        })
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw.trim())
        .map_err(|e| SessionError::Configuration(format!("invalid server URL {:?}: {}", raw, e)))
}

/// WebSocket endpoint for a hub URL.
///
/// `http(s)` becomes `ws(s)`; a bare host gets the `/api/websocket` path.
/// `ws(s)` URLs are used as given.
pub fn websocket_url(server: &Url) -> Result<Url> {
    let scheme = match server.scheme() {
        "ws" | "wss" => return Ok(server.clone()),
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(SessionError::Configuration(format!(
                "unsupported URL scheme {:?}",
                other
            )))
        }
    };
    let mut url = server.clone();
    url.set_scheme(scheme)
        .map_err(|_| SessionError::Configuration(format!("cannot use {} as ws URL", server)))?;
    if url.path().trim_end_matches('/').is_empty() {
        url.set_path("/api/websocket");
    }
    Ok(url)
}

/// Base URL for the REST channel (`.../api/` is appended by the REST client).
pub fn rest_base_url(server: &Url) -> Result<Url> {
    let scheme = match server.scheme() {
        "http" | "https" => server.scheme().to_string(),
        "ws" => "http".to_string(),
        "wss" => "https".to_string(),
        other => {
            return Err(SessionError::Configuration(format!(
                "unsupported URL scheme {:?}",
                other
            )))
        }
    };
    let mut url = server.clone();
    url.set_scheme(&scheme)
        .map_err(|_| SessionError::Configuration(format!("cannot use {} as REST URL", server)))?;
    url.set_path("/");
    url.set_query(None);
    Ok(url)
}
