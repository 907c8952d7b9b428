//! Process configuration, read from the environment (and `.env` via dotenvy in `main`).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::aggregates::TransitionPolicy;
use crate::payments::webhook::DEFAULT_TOLERANCE_SECS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
    pub currency: String,
    pub webhook_tolerance_secs: i64,
}

impl fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base", &self.api_base)
            .field("currency", &self.currency)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub port: u16,
    pub jwt_secret: String,
    pub frontend_url: String,
    pub nats_url: Option<String>,
    pub order_status_policy: TransitionPolicy,
    pub stripe: StripeConfig,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_max_connections", &self.database_max_connections)
            .field("port", &self.port)
            .field("frontend_url", &self.frontend_url)
            .field("nats_url", &self.nats_url)
            .field("order_status_policy", &self.order_status_policy)
            .field("stripe", &self.stripe)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);
        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            database_max_connections: env.parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            port: env.parsed("PORT", 4000)?,
            jwt_secret: env.required("JWT_SECRET")?,
            frontend_url: env.or("FRONTEND_URL", "http://localhost:3000").trim_end_matches('/').to_string(),
            nats_url: env.optional("NATS_URL"),
            order_status_policy: env.parsed("ORDER_STATUS_POLICY", TransitionPolicy::Strict)?,
            stripe: StripeConfig {
                secret_key: env.required("STRIPE_SECRET_KEY")?,
                webhook_secret: env.required("STRIPE_WEBHOOK_SECRET")?,
                api_base: env.or("STRIPE_API_BASE", "https://api.stripe.com"),
                currency: env.or("CHECKOUT_CURRENCY", "usd").to_lowercase(),
                webhook_tolerance_secs: env.parsed("WEBHOOK_TOLERANCE_SECS", DEFAULT_TOLERANCE_SECS)?,
            },
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid { key, reason: e.to_string() }),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 4] = [
        ("DATABASE_URL", "postgres://localhost/storefront"),
        ("JWT_SECRET", "secret"),
        ("STRIPE_SECRET_KEY", "sk_test"),
        ("STRIPE_WEBHOOK_SECRET", "whsec_test"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(env(&REQUIRED)).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.database_max_connections, 10);
        assert_eq!(config.frontend_url, "http://localhost:3000");
        assert_eq!(config.order_status_policy, TransitionPolicy::Strict);
        assert_eq!(config.stripe.currency, "usd");
        assert_eq!(config.stripe.webhook_tolerance_secs, 300);
        assert!(config.nats_url.is_none());
    }

    #[test]
    fn test_missing_required() {
        let err = Config::from_lookup(env(&REQUIRED[..3])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("STRIPE_WEBHOOK_SECRET")));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("PORT", "8080"), ("ORDER_STATUS_POLICY", "Unrestricted"), ("FRONTEND_URL", "https://shop.test/")]);
        let config = Config::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.order_status_policy, TransitionPolicy::Unrestricted);
        assert_eq!(config.frontend_url, "https://shop.test");

        let mut bad = REQUIRED.to_vec();
        bad.push(("PORT", "http"));
        assert!(matches!(Config::from_lookup(env(&bad)), Err(ConfigError::Invalid { key: "PORT", .. })));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = Config::from_lookup(env(&REQUIRED)).unwrap();
        let printed = format!("{config:?}");
        assert!(!printed.contains("whsec_test"));
        assert!(!printed.contains("sk_test"));
    }
}
