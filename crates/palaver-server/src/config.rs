//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.  Call credentials default to unset:
//! the rest of the system works and only token issuance fails, per the
//! fail-at-operation policy.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket (axum) server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Explicit path for the SQLite database file.
    /// Env: `DB_PATH`
    /// Default: unset (platform data directory).
    pub db_path: Option<PathBuf>,

    /// Keyed-hash secret shared with the external identity issuer
    /// (hex-encoded, 64 chars).
    /// Env: `AUTH_SECRET`
    /// Default: all-zeros (development only).
    pub auth_secret: [u8; 32],

    /// Application id registered with the external media framework.
    /// Env: `CALL_APP_ID`
    /// Default: unset (call tokens unavailable).
    pub call_app_id: Option<String>,

    /// Media-framework signing secret (hex-encoded, 64 chars).
    /// Env: `CALL_APP_SECRET`
    /// Default: unset (call tokens unavailable).
    pub call_app_secret: Option<[u8; 32]>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Palaver"`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            db_path: None,
            auth_secret: [0u8; 32],
            call_app_id: None,
            call_app_secret: None,
            instance_name: "Palaver".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(hex_secret) = std::env::var("AUTH_SECRET") {
            match parse_hex_secret(&hex_secret) {
                Ok(secret) => config.auth_secret = secret,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SECRET, using default (dev-only)"
                    );
                }
            }
        }

        if let Ok(app_id) = std::env::var("CALL_APP_ID") {
            if !app_id.is_empty() {
                config.call_app_id = Some(app_id);
            }
        }

        if let Ok(hex_secret) = std::env::var("CALL_APP_SECRET") {
            match parse_hex_secret(&hex_secret) {
                Ok(secret) => config.call_app_secret = Some(secret),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid CALL_APP_SECRET, leaving call tokens unconfigured"
                    );
                }
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte array.
pub(crate) fn parse_hex_secret(raw: &str) -> Result<[u8; 32], String> {
    let raw = raw.trim();
    if raw.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", raw.len()));
    }

    let bytes = hex::decode(raw).map_err(|e| format!("invalid hex: {e}"))?;
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&bytes);
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.auth_secret, [0u8; 32]);
        assert!(config.call_app_id.is_none());
        assert!(config.call_app_secret.is_none());
    }

    #[test]
    fn test_parse_hex_secret() {
        let hex = "ab".repeat(32);
        let secret = parse_hex_secret(&hex).unwrap();
        assert_eq!(secret, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_secret_wrong_length() {
        assert!(parse_hex_secret("abcd").is_err());
    }

    #[test]
    fn test_parse_hex_secret_non_hex() {
        assert!(parse_hex_secret(&"zz".repeat(32)).is_err());
    }
}
