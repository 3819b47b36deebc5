//! Application configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! All optional:
//! - `CART_TTL_HOURS` - Inactivity window before a cart expires (default: 72)
//! - `CART_ABANDON_AFTER_HOURS` - Idle time before a cart is marked abandoned (default: 24)
//! - `CHECKOUT_TTL_MINUTES` - Lifetime of a checkout session (default: 30)
//! - `SWEEP_INTERVAL_SECS` - Period of the expiration sweep (default: 300)
//! - `METRICS_PORT` - Port of the `/metrics` endpoint (default: 9090)
//! - `DEFAULT_CURRENCY` - Currency code for new carts (default: USD)
//! - `SCYLLA_URI` - ScyllaDB contact point; in-memory stores are used when unset

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Time-to-live policies for carts and checkout sessions
#[derive(Debug, Clone)]
pub struct LifecyclePolicy {
    pub cart_ttl: Duration,
    pub cart_abandon_after: Duration,
    pub checkout_ttl: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            cart_ttl: Duration::hours(72),
            cart_abandon_after: Duration::hours(24),
            checkout_ttl: Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub policy: LifecyclePolicy,
    pub sweep_interval: StdDuration,
    pub metrics_port: u16,
    pub default_currency: String,
    pub scylla_uri: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: LifecyclePolicy::default(),
            sweep_interval: StdDuration::from_secs(300),
            metrics_port: 9090,
            default_currency: "USD".to_string(),
            scylla_uri: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment (and a `.env` file if present).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` when a variable is set but cannot
    /// be parsed or is not positive.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let cart_ttl_hours: i64 = parse_positive(&lookup, "CART_TTL_HOURS", 72)?;
        let abandon_hours: i64 = parse_positive(&lookup, "CART_ABANDON_AFTER_HOURS", 24)?;
        let checkout_minutes: i64 = parse_positive(&lookup, "CHECKOUT_TTL_MINUTES", 30)?;
        let sweep_secs: u64 = parse_positive(&lookup, "SWEEP_INTERVAL_SECS", 300)?;
        let metrics_port: u16 = parse_positive(&lookup, "METRICS_PORT", defaults.metrics_port)?;

        let default_currency = lookup("DEFAULT_CURRENCY")
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or(defaults.default_currency);

        Ok(Self {
            policy: LifecyclePolicy {
                cart_ttl: Duration::hours(cart_ttl_hours),
                cart_abandon_after: Duration::hours(abandon_hours),
                checkout_ttl: Duration::minutes(checkout_minutes),
            },
            sweep_interval: StdDuration::from_secs(sweep_secs),
            metrics_port,
            default_currency,
            scylla_uri: lookup("SCYLLA_URI").filter(|u| !u.trim().is_empty()),
        })
    }
}

fn parse_positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    let value = raw
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;

    if value <= T::default() {
        return Err(ConfigError::InvalidEnvVar(key.to_string(), "must be positive".to_string()));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.policy.cart_ttl, Duration::hours(72));
        assert_eq!(config.policy.cart_abandon_after, Duration::hours(24));
        assert_eq!(config.policy.checkout_ttl, Duration::minutes(30));
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.default_currency, "USD");
        assert!(config.scylla_uri.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("CART_TTL_HOURS", "48"),
            ("CHECKOUT_TTL_MINUTES", "15"),
            ("DEFAULT_CURRENCY", "eur"),
            ("SCYLLA_URI", "127.0.0.1:9042"),
        ]))
        .unwrap();
        assert_eq!(config.policy.cart_ttl, Duration::hours(48));
        assert_eq!(config.policy.checkout_ttl, Duration::minutes(15));
        assert_eq!(config.default_currency, "EUR");
        assert_eq!(config.scylla_uri.as_deref(), Some("127.0.0.1:9042"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("CART_TTL_HOURS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "CART_TTL_HOURS"));

        let err = AppConfig::from_lookup(lookup_from(&[("METRICS_PORT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar(key, _) if key == "METRICS_PORT"));
    }
}
