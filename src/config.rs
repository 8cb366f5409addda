//! Server configuration.
//!
//! Every field has a default, so a collaborator can load a partial config
//! from a file and leave the rest alone:
//!
//! ```
//! use catwire::config::ServerConfig;
//!
//! let config: ServerConfig =
//!     serde_json::from_str(r#"{"url_prefix": "kitten", "request_timeout": 2.5}"#).unwrap();
//! assert_eq!(config.url_prefix, "kitten");
//! assert!(config.keep_alive);
//! ```

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::protocol::{DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_HEAD_SIZE};

/// Default TCP address: loopback, any free port.
pub const DEFAULT_TCP_ADDR: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(Ipv4Addr::LOCALHOST),
    0,
);

/// Configuration for a [`Server`](crate::Server).
///
/// Serializes without the token; the `config` built-in serves it that way.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP listen address. `None` disables the TCP listener.
    pub tcp_addr: Option<SocketAddr>,
    /// Bind a unix socket listener (ignored where unsupported).
    pub local_socket: bool,
    /// Unix socket path. Generated under the temp dir when absent.
    pub socket_path: Option<PathBuf>,
    /// Shared secret for private methods. Random when absent.
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Leading path segment every request must carry. Empty for none.
    pub url_prefix: String,
    /// Largest accepted request body, in bytes.
    pub max_request_size: usize,
    /// Largest accepted request head, in bytes.
    pub max_head_size: usize,
    /// Upper bound for reading a request and writing its reply, in seconds
    /// when loaded from a file.
    #[serde(deserialize_with = "seconds", serialize_with = "as_seconds")]
    pub request_timeout: Option<Duration>,
    /// Honour `Connection: keep-alive`.
    pub keep_alive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: Some(DEFAULT_TCP_ADDR),
            local_socket: cfg!(unix),
            socket_path: None,
            token: None,
            url_prefix: String::new(),
            max_request_size: DEFAULT_MAX_BODY_SIZE,
            max_head_size: DEFAULT_MAX_HEAD_SIZE,
            request_timeout: None,
            keep_alive: true,
        }
    }
}

impl ServerConfig {
    /// The prefix without surrounding slashes.
    pub(crate) fn normalized_prefix(&self) -> &str {
        self.url_prefix.trim_matches('/')
    }
}

fn seconds<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs: Option<f64> = Option::deserialize(deserializer)?;
    match secs {
        None => Ok(None),
        Some(s) if s.is_finite() && s > 0.0 => Ok(Some(Duration::from_secs_f64(s))),
        Some(s) => Err(serde::de::Error::custom(format!(
            "request_timeout must be a positive number of seconds, got {}",
            s
        ))),
    }
}

fn as_seconds<S>(timeout: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    timeout.map(|t| t.as_secs_f64()).serialize(serializer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();

        assert_eq!(config.tcp_addr, Some(DEFAULT_TCP_ADDR));
        assert_eq!(config.local_socket, cfg!(unix));
        assert_eq!(config.max_request_size, 1024 * 1024);
        assert_eq!(config.max_head_size, 64 * 1024);
        assert!(config.request_timeout.is_none());
        assert!(config.keep_alive);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_partial_file_config() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "tcp_addr": null,
                "socket_path": "/tmp/kitten.sock",
                "token": "s3cret",
                "request_timeout": 0.5
            }"#,
        )
        .unwrap();

        assert!(config.tcp_addr.is_none());
        assert_eq!(config.socket_path, Some(PathBuf::from("/tmp/kitten.sock")));
        assert_eq!(config.token.as_deref(), Some("s3cret"));
        assert_eq!(config.request_timeout, Some(Duration::from_millis(500)));
        assert!(config.keep_alive);
    }

    #[test]
    fn test_rejects_negative_timeout() {
        let result: std::result::Result<ServerConfig, _> =
            serde_json::from_str(r#"{"request_timeout": -1}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialized_without_token() {
        let config = ServerConfig {
            token: Some("s3cret".to_string()),
            request_timeout: Some(Duration::from_millis(1500)),
            ..Default::default()
        };

        let value = serde_json::to_value(&config).unwrap();
        assert!(value.get("token").is_none());
        assert!(!value.to_string().contains("s3cret"));
        assert_eq!(value["request_timeout"], 1.5);
        assert_eq!(value["tcp_addr"], "127.0.0.1:0");

        let back: ServerConfig = serde_json::from_value(value).unwrap();
        assert_eq!(back.request_timeout, config.request_timeout);
    }

    #[test]
    fn test_normalized_prefix() {
        let config = ServerConfig {
            url_prefix: "/kitten/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.normalized_prefix(), "kitten");
    }
}
