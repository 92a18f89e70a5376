// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Core configuration shared by the server and agent binaries.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL for the persistent store.
    pub database_url: String,
    /// Minimum-enforced scan interval (the scheduler rejects anything shorter).
    pub scan_interval: Duration,
    /// Maximum concurrent updates across the fleet.
    pub max_concurrent_updates: u32,
    /// Grace period given to a container on stop, before SIGKILL.
    pub stop_grace_period: Duration,
    /// Hour-of-day (UTC, 0-23) the auto-update maintenance window opens.
    /// Equal to `maintenance_end_hour` means "always open".
    pub maintenance_start_hour: u32,
    /// Hour-of-day (UTC, 0-23) the auto-update maintenance window closes.
    pub maintenance_end_hour: u32,
    /// Registry credentials as `host_pattern=username:secret` triples, parsed
    /// from `DOCKWARDEN_REGISTRY_CREDENTIALS`. Kept as raw strings here since
    /// `dockwarden-core` doesn't depend on `dockwarden-registry`; the binary
    /// composition root turns these into `RegistryCredential` values.
    pub registry_credentials: Vec<(String, String, String)>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Optional (with defaults):
    /// - `DOCKWARDEN_DATABASE_URL` (default: `sqlite:.data/dockwarden.db?mode=rwc`)
    /// - `DOCKWARDEN_SCAN_INTERVAL_SECS` (default: 300, minimum enforced: 300)
    /// - `DOCKWARDEN_MAX_CONCURRENT_UPDATES` (default: 3)
    /// - `DOCKWARDEN_STOP_GRACE_SECS` (default: 10)
    /// - `DOCKWARDEN_MAINTENANCE_START_HOUR` / `DOCKWARDEN_MAINTENANCE_END_HOUR`
    ///   (default: 0/0, meaning the window is always open)
    /// - `DOCKWARDEN_REGISTRY_CREDENTIALS` (default: empty; `;`-separated
    ///   `host_pattern=username:secret` entries)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("DOCKWARDEN_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:.data/dockwarden.db?mode=rwc".to_string());

        let scan_interval_secs: u64 = std::env::var("DOCKWARDEN_SCAN_INTERVAL_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DOCKWARDEN_SCAN_INTERVAL_SECS", "must be an integer")
            })?;

        if scan_interval_secs < MIN_SCAN_INTERVAL_SECS {
            return Err(ConfigError::Invalid(
                "DOCKWARDEN_SCAN_INTERVAL_SECS",
                "must be at least 300 seconds (5 minutes)",
            ));
        }

        let max_concurrent_updates: u32 = std::env::var("DOCKWARDEN_MAX_CONCURRENT_UPDATES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "DOCKWARDEN_MAX_CONCURRENT_UPDATES",
                    "must be a positive integer",
                )
            })?;

        let stop_grace_secs: u64 = std::env::var("DOCKWARDEN_STOP_GRACE_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DOCKWARDEN_STOP_GRACE_SECS", "must be an integer")
            })?;

        let maintenance_start_hour: u32 = std::env::var("DOCKWARDEN_MAINTENANCE_START_HOUR")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DOCKWARDEN_MAINTENANCE_START_HOUR", "must be 0-23")
            })?;
        let maintenance_end_hour: u32 = std::env::var("DOCKWARDEN_MAINTENANCE_END_HOUR")
            .unwrap_or_else(|_| "0".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("DOCKWARDEN_MAINTENANCE_END_HOUR", "must be 0-23")
            })?;
        if maintenance_start_hour > 23 || maintenance_end_hour > 23 {
            return Err(ConfigError::Invalid(
                "DOCKWARDEN_MAINTENANCE_START_HOUR/DOCKWARDEN_MAINTENANCE_END_HOUR",
                "must be 0-23",
            ));
        }

        let registry_credentials = std::env::var("DOCKWARDEN_REGISTRY_CREDENTIALS")
            .unwrap_or_default()
            .split(';')
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let (host_pattern, rest) = entry.split_once('=')?;
                let (username, secret) = rest.split_once(':')?;
                Some((host_pattern.to_string(), username.to_string(), secret.to_string()))
            })
            .collect();

        Ok(Self {
            database_url,
            scan_interval: Duration::from_secs(scan_interval_secs),
            max_concurrent_updates,
            stop_grace_period: Duration::from_secs(stop_grace_secs),
            maintenance_start_hour,
            maintenance_end_hour,
            registry_credentials,
        })
    }
}

/// Minimum scan interval per the scheduler's boundary contract.
pub const MIN_SCAN_INTERVAL_SECS: u64 = 300;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_interval_below_five_minutes() {
        // SAFETY: tests run single-threaded within this process for env mutation.
        unsafe {
            std::env::set_var("DOCKWARDEN_SCAN_INTERVAL_SECS", "60");
        }
        let result = Config::from_env();
        unsafe {
            std::env::remove_var("DOCKWARDEN_SCAN_INTERVAL_SECS");
        }
        assert!(matches!(result, Err(ConfigError::Invalid(_, _))));
    }

    #[test]
    fn accepts_interval_of_exactly_five_minutes() {
        unsafe {
            std::env::set_var("DOCKWARDEN_SCAN_INTERVAL_SECS", "300");
        }
        let result = Config::from_env();
        unsafe {
            std::env::remove_var("DOCKWARDEN_SCAN_INTERVAL_SECS");
        }
        assert!(result.is_ok());
    }
}
