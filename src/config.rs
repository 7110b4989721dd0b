//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_UPSTREAM_ENDPOINT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub websocket: WebSocketConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upstream recognizer configuration.
///
/// ## The rotation constraint:
/// The upstream closes any streaming sub-session after `max_session_secs`.
/// `rotation_interval_secs` must stay strictly below that limit so a fresh
/// sub-session is always open before the old one is cut off; validation
/// enforces the ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// WebSocket endpoint of the streaming recognizer.
    pub endpoint: String,
    /// How often to rotate to a fresh recognizer sub-session, in seconds.
    pub rotation_interval_secs: u64,
    /// Hard upstream per-sub-session limit, in seconds.
    pub max_session_secs: u64,
}

/// Client-facing WebSocket transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Deadline for any single write to the client, in seconds.
    pub write_timeout_secs: u64,
    /// Client is considered gone after this long without a pong, in seconds.
    pub read_timeout_secs: u64,
    /// Largest inbound frame accepted from the client, in bytes.
    pub max_message_bytes: usize,
    /// Depth of the bounded audio queue between relay and session manager.
    pub audio_queue_depth: usize,
    /// Depth of the bounded result queue feeding the output relay.
    pub result_queue_depth: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            upstream: UpstreamConfig {
                endpoint: "ws://127.0.0.1:9090/v1/recognize".to_string(),
                rotation_interval_secs: 55, // Upstream cuts sessions at 60s
                max_session_secs: 60,
            },
            websocket: WebSocketConfig {
                write_timeout_secs: 10,
                read_timeout_secs: 60,
                max_message_bytes: 32_000,
                audio_queue_depth: 8,
                result_queue_depth: 32,
            },
        }
    }
}

impl UpstreamConfig {
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs)
    }
}

impl WebSocketConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Keepalive ping period: 9/10 of the read timeout, so a healthy client
    /// always gets a ping (and a chance to pong) before it is declared gone.
    pub fn ping_period(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
            .mul_f64(0.9)
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_UPSTREAM_ENDPOINT=wss://stt.example.com/v1`: Override upstream
    /// - `HOST` / `PORT`: Deployment-platform overrides without the prefix
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup prevents runtime failures,
    /// most importantly a rotation interval that would let the upstream cut
    /// a sub-session off mid-stream.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.upstream.endpoint.is_empty() {
            return Err(anyhow::anyhow!("Upstream endpoint cannot be empty"));
        }

        if self.upstream.rotation_interval_secs == 0 {
            return Err(anyhow::anyhow!("Rotation interval must be greater than 0"));
        }

        if self.upstream.rotation_interval_secs >= self.upstream.max_session_secs {
            return Err(anyhow::anyhow!(
                "Rotation interval ({}s) must be strictly below the upstream session limit ({}s)",
                self.upstream.rotation_interval_secs,
                self.upstream.max_session_secs
            ));
        }

        if self.websocket.write_timeout_secs == 0 || self.websocket.read_timeout_secs == 0 {
            return Err(anyhow::anyhow!("WebSocket timeouts must be greater than 0"));
        }

        if self.websocket.max_message_bytes == 0 {
            return Err(anyhow::anyhow!("Max message size must be greater than 0"));
        }

        if self.websocket.audio_queue_depth == 0 || self.websocket.result_queue_depth == 0 {
            return Err(anyhow::anyhow!("Queue depths must be greater than 0"));
        }

        Ok(())
    }
}
