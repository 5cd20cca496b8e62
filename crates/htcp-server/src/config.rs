//! Server configuration

use anyhow::Result;
use serde::Deserialize;

/// Tunable server settings
///
/// `max_connections` caps concurrent TCP connections making protocol
/// progress; `handle_connections` caps handlers running at once and may
/// not exceed it. Invalid combinations are rejected before a server is
/// built.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the listener
    pub host: String,
    pub port: u16,

    /// Name used in log output
    #[serde(default = "default_name")]
    pub name: String,

    /// Capacity of the connection semaphore
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Capacity of the processing semaphore
    #[serde(default = "default_handle_connections")]
    pub handle_connections: usize,

    /// Diagnostic verbosity, consumed by the binary when installing the
    /// tracing subscriber
    #[serde(default = "default_enable_logging")]
    pub enable_logging: bool,
    #[serde(default = "default_logging_level")]
    pub logging_level: String,

    /// Require the DH handshake before the first frame
    #[serde(default)]
    pub dh_encryption: bool,

    /// Require a matching `_auth` package as the first post-handshake
    /// frame
    #[serde(default)]
    pub connect_passkey: Option<String>,
}

fn default_name() -> String {
    "htcp_server".to_string()
}

fn default_max_connections() -> usize {
    100
}

fn default_handle_connections() -> usize {
    90
}

fn default_enable_logging() -> bool {
    true
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl ServerConfig {
    /// Config with defaults for everything but the bind address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            name: default_name(),
            max_connections: default_max_connections(),
            handle_connections: default_handle_connections(),
            enable_logging: default_enable_logging(),
            logging_level: default_logging_level(),
            dh_encryption: false,
            connect_passkey: None,
        }
    }

    /// Check the admission bounds and passkey shape
    pub fn validate(&self) -> Result<()> {
        if self.max_connections < 1 {
            anyhow::bail!("max_connections must be at least 1");
        }
        if self.handle_connections < 1 {
            anyhow::bail!("handle_connections must be at least 1");
        }
        if self.handle_connections > self.max_connections {
            anyhow::bail!(
                "handle_connections ({}) cannot exceed max_connections ({})",
                self.handle_connections,
                self.max_connections
            );
        }
        if matches!(self.connect_passkey.as_deref(), Some("")) {
            anyhow::bail!("connect_passkey must be non-empty when set");
        }
        Ok(())
    }

    /// Address the listener binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `host:port` stamped into response packages as `from`
    pub fn advertised_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new("127.0.0.1", 9576);
        assert_eq!(config.name, "htcp_server");
        assert_eq!(config.max_connections, 100);
        assert_eq!(config.handle_connections, 90);
        assert!(!config.dh_encryption);
        assert!(config.connect_passkey.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_handle_above_max_rejected() {
        let mut config = ServerConfig::new("127.0.0.1", 9576);
        config.max_connections = 10;
        config.handle_connections = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_bounds_rejected() {
        let mut config = ServerConfig::new("127.0.0.1", 9576);
        config.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::new("127.0.0.1", 9576);
        config.handle_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_passkey_rejected() {
        let mut config = ServerConfig::new("127.0.0.1", 9576);
        config.connect_passkey = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: ServerConfig = serde_json::from_value(serde_json::json!({
            "host": "0.0.0.0",
            "port": 9576,
            "dh_encryption": true,
            "connect_passkey": "hunter2"
        }))
        .unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:9576");
        assert_eq!(config.max_connections, 100);
        assert!(config.dh_encryption);
        assert_eq!(config.connect_passkey.as_deref(), Some("hunter2"));
    }
}
