//! Service configuration, read from the environment.

use std::time::Duration;

use crate::domain::aggregates::PaymentPolicy;
use crate::services::PaymentSettings;
use crate::{Result, StorefrontError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. Without it the service runs on in-memory storage.
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub port: u16,
    pub currency: String,
    pub min_payment_amount: i64,
    pub refund_window_days: i64,
    pub gateway_timeout: Duration,
    pub max_gateway_attempts: u32,
    pub gateway_retry_delay: Duration,
    pub mock_gateway_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            nats_url: None,
            port: 8083,
            currency: "NGN".to_string(),
            min_payment_amount: 1000,
            refund_window_days: 30,
            gateway_timeout: Duration::from_secs(10),
            max_gateway_attempts: 3,
            gateway_retry_delay: Duration::from_millis(200),
            mock_gateway_base_url: "http://localhost:8090/pay".to_string(),
        }
    }
}

impl Config {
    /// Loads `.env` (if present) and overlays environment variables on the defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            nats_url: std::env::var("NATS_URL").ok().filter(|v| !v.is_empty()),
            port: parse_var("PORT", defaults.port)?,
            currency: std::env::var("STORE_CURRENCY").unwrap_or(defaults.currency),
            min_payment_amount: parse_var("MIN_PAYMENT_AMOUNT", defaults.min_payment_amount)?,
            refund_window_days: parse_var("REFUND_WINDOW_DAYS", defaults.refund_window_days)?,
            gateway_timeout: Duration::from_secs(parse_var("GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout.as_secs())?),
            max_gateway_attempts: parse_var("MAX_GATEWAY_ATTEMPTS", defaults.max_gateway_attempts)?,
            gateway_retry_delay: Duration::from_millis(parse_var("GATEWAY_RETRY_DELAY_MS", defaults.gateway_retry_delay.as_millis() as u64)?),
            mock_gateway_base_url: std::env::var("MOCK_GATEWAY_BASE_URL").unwrap_or(defaults.mock_gateway_base_url),
        })
    }

    pub fn payment_settings(&self) -> PaymentSettings {
        PaymentSettings {
            policy: PaymentPolicy {
                minimum_amount: self.min_payment_amount,
                refund_window: chrono::Duration::days(self.refund_window_days),
            },
            currency: self.currency.clone(),
            gateway_timeout: self.gateway_timeout,
            max_gateway_attempts: self.max_gateway_attempts.max(1),
            retry_base_delay: self.gateway_retry_delay,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| StorefrontError::validation(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_payment_settings() {
        let settings = Config::default().payment_settings();
        assert_eq!(settings.policy, PaymentPolicy::default());
        assert_eq!(settings.max_gateway_attempts, 3);
        assert_eq!(settings.currency, "NGN");
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        std::env::set_var("STOREFRONT_TEST_PORT", "eighty");
        assert!(parse_var::<u16>("STOREFRONT_TEST_PORT", 1).is_err());
        std::env::remove_var("STOREFRONT_TEST_PORT");
        assert_eq!(parse_var::<u16>("STOREFRONT_TEST_PORT", 1).unwrap(), 1);
    }
}
