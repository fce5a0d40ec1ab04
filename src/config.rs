//! Configuration loaded from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file) is a valid configuration.

use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Upper bound for every duration setting: one hundred years.
pub const MAX_DURATION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub watchdog: WatchdogConfig,
    pub notifications: NotificationConfig,
}

/// Immutable settings handed to a gateway adapter at construction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Upper bound for any single gateway call.
    pub timeout_secs: u64,
    /// Where the gateway posts asynchronous results.
    pub result_url: String,
    /// Where the browser lands after the hosted payment page.
    pub return_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            result_url: "http://localhost:8000/api/payments/result/".to_string(),
            return_url: "http://localhost:3000/payment/return".to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// A non-terminal payment older than this is escalated.
    pub max_age_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 180,
            sweep_interval_secs: 60,
        }
    }
}

impl WatchdogConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Operator addresses alerted when a payment needs verification.
    pub operators: Vec<String>,
}

impl AppConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| PaymentError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.gateway.timeout_secs == 0 {
            return Err(PaymentError::ConfigError(
                "gateway.timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.watchdog.sweep_interval_secs == 0 {
            return Err(PaymentError::ConfigError(
                "watchdog.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        for (name, secs) in [
            ("gateway.timeout_secs", self.gateway.timeout_secs),
            ("watchdog.max_age_secs", self.watchdog.max_age_secs),
            ("watchdog.sweep_interval_secs", self.watchdog.sweep_interval_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(PaymentError::ConfigError(format!(
                    "{} must not exceed {}",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        Ok(())
    }
}
