//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::constants::{DEFAULT_PEER_PORT, DEFAULT_SERVER_HOST, DEFAULT_SERVER_PORT};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Central server host
    pub server_host: String,

    /// Central server port
    pub server_port: u16,

    /// Address the peer listener binds to
    pub listen_host: String,

    /// Port the peer listener binds to, 0 for any free port
    pub listen_port: u16,

    /// Timeout for a single outbound peer connect
    pub peer_connect_timeout_ms: u64,

    /// How long to wait for the peer to pierce our firewall after asking the
    /// server to broker an indirect connection
    pub indirect_timeout_ms: u64,

    /// How long to wait for a GetPeerAddress reply
    pub address_timeout_ms: u64,

    /// How long to wait for the Login reply
    pub login_timeout_ms: u64,

    /// Attempts made to deliver a peer message before giving up
    pub send_max_attempts: u32,

    /// Pause between delivery attempts
    pub send_retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: DEFAULT_SERVER_HOST.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            listen_host: "0.0.0.0".to_string(),
            listen_port: DEFAULT_PEER_PORT,
            peer_connect_timeout_ms: 5_000,
            indirect_timeout_ms: 20_000,
            address_timeout_ms: 10_000,
            login_timeout_ms: 15_000,
            send_max_attempts: 40,
            send_retry_delay_ms: 500,
        }
    }
}

impl ClientConfig {
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)?
        } else {
            ClientConfig::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `SOULSEEK_SERVER` and `SOULSEEK_PORT` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(host) = std::env::var("SOULSEEK_SERVER") {
            self.server_host = host;
        }
        if let Some(port) = std::env::var("SOULSEEK_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
        {
            self.server_port = port;
        }
        self
    }

    pub fn peer_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.peer_connect_timeout_ms)
    }

    pub fn indirect_timeout(&self) -> Duration {
        Duration::from_millis(self.indirect_timeout_ms)
    }

    pub fn address_timeout(&self) -> Duration {
        Duration::from_millis(self.address_timeout_ms)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }
}
