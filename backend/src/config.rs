//! Configuration management for the Stock Valuation Engine
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with SVE_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT verification configuration
    pub jwt: JwtConfig,

    /// Valuation engine behaviour
    pub engine: EngineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JwtConfig {
    /// Secret the identity provider signs access tokens with
    pub secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// Upper bound on any ledger-mutating transaction, lock waits included
    pub transaction_timeout_secs: u64,

    /// Whether NCR status changes require the NCR's period to be OPEN
    pub ncr_status_period_gated: bool,

    /// Capacity of the outbound event channel
    pub event_buffer: usize,
}

impl EngineConfig {
    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_secs(self.transaction_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transaction_timeout_secs: 30,
            ncr_status_period_gated: false,
            event_buffer: 1024,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var("SVE_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("engine.transaction_timeout_secs", 30)?
            .set_default("engine.ncr_status_period_gated", false)?
            .set_default("engine.event_buffer", 1024)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (SVE_ prefix)
            .add_source(
                Environment::with_prefix("SVE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}
