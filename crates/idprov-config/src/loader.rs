//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "idprov.toml",
    "config.toml",
    "./config/idprov.toml",
    "/etc/idprov/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup)? {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup);

        Ok(config)
    }

    /// Find the configuration file to use.
    ///
    /// An explicitly requested file that does not exist is an error; the
    /// standard search paths are optional.
    fn find_config_file<F>(&self, lookup: &F) -> Result<Option<PathBuf>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::ValidationError(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        if let Some(path) = lookup("IDPROV_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
            warn!(?path, "IDPROV_CONFIG points to a missing file, ignoring");
        }

        Ok(CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply `IDPROV_*` overrides on top of file/default values.
fn apply_overrides<F>(config: &mut AppConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("IDPROV_BACKEND") {
        match val.parse() {
            Ok(backend) => config.backend = backend,
            Err(e) => warn!(error = %e, "Ignoring IDPROV_BACKEND"),
        }
    }

    // Credential store
    if let Some(val) = lookup("IDPROV_AUTH_URL") {
        config.credentials.base_url = val;
    }
    if let Some(val) = lookup("IDPROV_AUTH_SERVICE_KEY") {
        config.credentials.service_key = val;
    }
    if let Some(timeout) = lookup("IDPROV_AUTH_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.credentials.timeout_ms = timeout;
    }
    if let Some(size) = lookup("IDPROV_AUTH_PAGE_SIZE").and_then(|v| v.parse().ok()) {
        config.credentials.page_size = size;
    }

    // Relational store
    if let Some(val) = lookup("IDPROV_DB_URL") {
        config.records.base_url = val;
    }
    if let Some(val) = lookup("IDPROV_DB_SERVICE_KEY") {
        config.records.service_key = val;
    }
    if let Some(val) = lookup("IDPROV_DB_PROFILES_TABLE") {
        config.records.profiles_table = val;
    }
    if let Some(val) = lookup("IDPROV_DB_ROLES_TABLE") {
        config.records.roles_table = val;
    }
    if let Some(timeout) = lookup("IDPROV_DB_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        config.records.timeout_ms = timeout;
    }

    // Reconciliation
    if let Some(attempts) = lookup("IDPROV_POLL_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.reconcile.poll_attempts = attempts;
    }
    if let Some(delay) = lookup("IDPROV_POLL_INITIAL_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.reconcile.poll_initial_delay_ms = delay;
    }
    if let Some(delay) = lookup("IDPROV_POLL_MAX_DELAY_MS").and_then(|v| v.parse().ok()) {
        config.reconcile.poll_max_delay_ms = delay;
    }
    if let Some(val) = lookup("IDPROV_DEFAULT_ROLE") {
        config.reconcile.default_role = val;
    }
    if let Some(val) = lookup("IDPROV_CONFIRM_ON_CREATE") {
        config.reconcile.confirm_on_create = val.parse().unwrap_or(true);
    }
}
