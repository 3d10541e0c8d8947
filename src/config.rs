// Session engine configuration
// All defaults are enumerated here at construction time; nothing is
// looked up ad hoc at the point of use.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Configuration surface of the session engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum concurrent usable sessions per user; creating beyond the
    /// cap evicts the least recently active session
    pub max_sessions_per_user: usize,
    /// Sliding lifetime of the refresh credential, in days
    pub refresh_token_lifetime_days: i64,
    /// Cap on refreshes per session
    pub max_refresh_count: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_user: 10,
            refresh_token_lifetime_days: 30,
            max_refresh_count: 1000,
        }
    }
}

impl SessionConfig {
    /// Refresh credential lifetime as a duration
    pub fn refresh_token_lifetime(&self) -> Duration {
        Duration::days(self.refresh_token_lifetime_days)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_sessions_per_user == 0 {
            return Err("max_sessions_per_user must be at least 1".to_string());
        }
        if self.refresh_token_lifetime_days <= 0 {
            return Err("refresh_token_lifetime_days must be positive".to_string());
        }
        if self.max_refresh_count == 0 {
            return Err("max_refresh_count must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SessionConfig, String> {
    let path = path.as_ref();
    info!("Loading session configuration from: {}", path.display());

    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

    let config: SessionConfig = serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse YAML config: {}", e))?;

    config.validate()?;

    info!(
        "Session configuration loaded: max_sessions_per_user={}, refresh_token_lifetime_days={}, max_refresh_count={}",
        config.max_sessions_per_user, config.refresh_token_lifetime_days, config.max_refresh_count
    );

    Ok(config)
}

/// Load configuration with fallback options
pub fn load_config_with_fallback() -> SessionConfig {
    // Try loading from environment variable first
    if let Ok(config_path) = std::env::var("SESSION_CONFIG_PATH") {
        match load_config(&config_path) {
            Ok(config) => return config,
            Err(e) => warn!(
                "Failed to load config from SESSION_CONFIG_PATH ({}): {}",
                config_path, e
            ),
        }
    }

    // Try common config file locations
    let paths = ["session.yaml", "session.yml", "config/session.yaml"];

    for path in paths {
        if Path::new(path).exists() {
            match load_config(path) {
                Ok(config) => return config,
                Err(e) => warn!("Failed to load config from '{}': {}", path, e),
            }
        }
    }

    info!("No session configuration file found, using defaults");
    SessionConfig::default()
}
