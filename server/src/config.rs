//! Server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Database URL
    pub database_url: String,
    /// Secret used to verify session-token signatures (HS256)
    pub jwt_secret: String,
    /// Hex-encoded 32-byte key for at-rest message encryption
    pub message_key: String,
    /// Directory attachment content is written to
    pub upload_dir: String,
    /// Maximum inbound message payload size in bytes
    pub max_message_size: usize,
    /// WebSocket ping interval in seconds (also used as keepalive timeout base)
    pub ws_ping_interval: u64,
    /// Maximum total WebSocket connections (0 = unlimited)
    pub max_connections: usize,
    /// Maximum WebSocket connections per IP address (0 = unlimited)
    pub max_connections_per_ip: usize,
    /// Comma-separated list of allowed CORS origins (empty = permissive)
    pub cors_origins: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = ServerConfig {
            host: env::var("CR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("CR_PORT")
                .unwrap_or_else(|_| "4040".to_string())
                .parse()
                .context("Invalid CR_PORT")?,
            database_url: env::var("CR_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://./data/courier.db".to_string()),
            jwt_secret: env::var("CR_JWT_SECRET").context("CR_JWT_SECRET must be set")?,
            message_key: env::var("CR_MESSAGE_KEY").context("CR_MESSAGE_KEY must be set")?,
            upload_dir: env::var("CR_UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
            max_message_size: env::var("CR_MAX_MESSAGE_SIZE")
                .unwrap_or_else(|_| "1048576".to_string()) // 1MB
                .parse()
                .context("Invalid CR_MAX_MESSAGE_SIZE")?,
            ws_ping_interval: env::var("CR_WS_PING_INTERVAL")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .context("Invalid CR_WS_PING_INTERVAL")?,
            max_connections: env::var("CR_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .context("Invalid CR_MAX_CONNECTIONS")?,
            max_connections_per_ip: env::var("CR_MAX_CONNECTIONS_PER_IP")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("Invalid CR_MAX_CONNECTIONS_PER_IP")?,
            cors_origins: env::var("CR_CORS_ORIGINS").ok(),
        };

        Ok(config)
    }
}
