//! Identity Provisioner Configuration System
//!
//! This crate provides TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Which store adapters to wire up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Remote auth provider + table REST API
    #[default]
    Http,
    /// Process-local stores, for local development and tests. Nothing is
    /// persisted: each process starts empty.
    Memory,
}

impl std::str::FromStr for Backend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::ValidationError(format!("unknown backend '{}'", other))),
        }
    }
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backend: Backend,
    pub credentials: CredentialStoreConfig,
    pub records: RecordStoreConfig,
    pub reconcile: ReconcileConfig,
}

/// Credential store (auth provider admin API) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialStoreConfig {
    /// Base URL of the provider, e.g. "https://project.example.co"
    pub base_url: String,
    /// Service key sent as `apikey` and bearer token
    pub service_key: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Page size used when listing credentials
    pub page_size: u32,
}

impl Default for CredentialStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            service_key: String::new(),
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            page_size: 100,
        }
    }
}

/// Relational store (table REST API) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordStoreConfig {
    pub base_url: String,
    pub service_key: String,
    pub profiles_table: String,
    pub roles_table: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            service_key: String::new(),
            profiles_table: "profiles".to_string(),
            roles_table: "user_roles".to_string(),
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Reconciliation behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Re-reads of an absent profile/role after create before inserting
    pub poll_attempts: u32,
    /// First delay between re-reads in milliseconds (doubles each attempt)
    pub poll_initial_delay_ms: u64,
    /// Cap on the delay between re-reads in milliseconds
    pub poll_max_delay_ms: u64,
    /// Role assigned when a create request names none
    pub default_role: String,
    /// Create credentials already confirmed
    pub confirm_on_create: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 5,
            poll_initial_delay_ms: 50,
            poll_max_delay_ms: 400,
            default_role: "agent".to_string(),
            confirm_on_create: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Check that the selected backend has what it needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == Backend::Http {
            if self.credentials.base_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "credentials.base_url is required for the http backend".to_string(),
                ));
            }
            if self.credentials.service_key.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "credentials.service_key is required for the http backend".to_string(),
                ));
            }
            if self.records.base_url.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "records.base_url is required for the http backend".to_string(),
                ));
            }
            if self.records.service_key.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "records.service_key is required for the http backend".to_string(),
                ));
            }
        }

        if self.reconcile.poll_max_delay_ms < self.reconcile.poll_initial_delay_ms {
            return Err(ConfigError::ValidationError(
                "reconcile.poll_max_delay_ms must be >= poll_initial_delay_ms".to_string(),
            ));
        }

        Ok(())
    }
}
