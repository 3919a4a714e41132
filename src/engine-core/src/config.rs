//! Configuration loading from environment variables, superset of the
//! live-loop and monitoring/alerting keys (see Design Notes on the two
//! source `config.py` variants — this crate assumes the superset).

use std::env;

use crate::error::ConfigError;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            var: key.to_string(),
            value: v,
        }),
        Err(_) => Ok(default),
    }
}

/// A venue credential that must be present when that venue is enabled.
/// Mirrors the original `config.py::_require` — crashes startup rather
/// than silently running with an empty credential.
fn require_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
}

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub kalshi_enabled: bool,
    pub polymarket_enabled: bool,

    pub kalshi_api_key: Option<String>,
    pub kalshi_api_secret: Option<String>,
    pub kalshi_use_demo: bool,

    pub polymarket_api_key: Option<String>,
    pub polymarket_api_secret: Option<String>,
    pub polymarket_api_passphrase: Option<String>,
    pub polymarket_private_key: Option<String>,
    pub polymarket_funder_address: Option<String>,

    pub bankroll_usd: rust_decimal::Decimal,
    pub kelly_fraction: rust_decimal::Decimal,
    pub max_position_fraction: rust_decimal::Decimal,
    pub max_total_exposure: rust_decimal::Decimal,
    pub min_edge_threshold: rust_decimal::Decimal,
    pub max_daily_loss_usd: rust_decimal::Decimal,

    pub dry_run: bool,
    pub poll_interval_seconds: u64,
    pub snapshot_interval_seconds: u64,

    pub recordings_dir: String,
    pub event_store_path: String,

    pub alert_drawdown_threshold_usd: rust_decimal::Decimal,
}

impl Config {
    /// Load from the environment, reading a `.env` file first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load from environment variables only; skips `.env` discovery so
    /// tests can control the environment exactly.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        use rust_decimal::Decimal;
        use rust_decimal_macros::dec;

        let kalshi_enabled = env_bool("KALSHI_ENABLED", true);
        let polymarket_enabled = env_bool("POLYMARKET_ENABLED", true);

        // Required only when the venue is actually enabled: a disabled
        // venue has no business demanding credentials for it.
        let (kalshi_api_key, kalshi_api_secret) = if kalshi_enabled {
            (Some(require_env("KALSHI_API_KEY")?), Some(require_env("KALSHI_API_SECRET")?))
        } else {
            (env::var("KALSHI_API_KEY").ok(), env::var("KALSHI_API_SECRET").ok())
        };

        let (polymarket_api_key, polymarket_api_secret, polymarket_api_passphrase, polymarket_private_key, polymarket_funder_address) =
            if polymarket_enabled {
                (
                    Some(require_env("POLYMARKET_API_KEY")?),
                    Some(require_env("POLYMARKET_API_SECRET")?),
                    Some(require_env("POLYMARKET_API_PASSPHRASE")?),
                    Some(require_env("POLYMARKET_PRIVATE_KEY")?),
                    Some(require_env("POLYMARKET_FUNDER_ADDRESS")?),
                )
            } else {
                (
                    env::var("POLYMARKET_API_KEY").ok(),
                    env::var("POLYMARKET_API_SECRET").ok(),
                    env::var("POLYMARKET_API_PASSPHRASE").ok(),
                    env::var("POLYMARKET_PRIVATE_KEY").ok(),
                    env::var("POLYMARKET_FUNDER_ADDRESS").ok(),
                )
            };

        Ok(Self {
            kalshi_enabled,
            polymarket_enabled,

            kalshi_api_key,
            kalshi_api_secret,
            kalshi_use_demo: env_bool("KALSHI_USE_DEMO", false),

            polymarket_api_key,
            polymarket_api_secret,
            polymarket_api_passphrase,
            polymarket_private_key,
            polymarket_funder_address,

            bankroll_usd: env_parse("BANKROLL_USD", dec!(1000))?,
            kelly_fraction: env_parse("KELLY_FRACTION", dec!(0.25))?,
            max_position_fraction: env_parse("MAX_POSITION_FRACTION", dec!(0.08))?,
            max_total_exposure: env_parse("MAX_TOTAL_EXPOSURE", dec!(0.25))?,
            min_edge_threshold: env_parse("MIN_EDGE_THRESHOLD", dec!(0.015))?,
            max_daily_loss_usd: env_parse("MAX_DAILY_LOSS_USD", dec!(50))?,

            dry_run: env_bool("DRY_RUN", true),
            poll_interval_seconds: env_parse("POLL_INTERVAL_SECONDS", 60u64)?,
            snapshot_interval_seconds: env_parse("SNAPSHOT_INTERVAL_SECONDS", 60u64)?,

            recordings_dir: env::var("RECORDINGS_DIR").unwrap_or_else(|_| "data/recordings".to_string()),
            event_store_path: env::var("EVENT_STORE_PATH").unwrap_or_else(|_| "data/events.db".to_string()),

            alert_drawdown_threshold_usd: env_parse("ALERT_DRAWDOWN_THRESHOLD_USD", Decimal::from(100))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_when_unset() {
        for key in ["BANKROLL_USD", "DRY_RUN"] {
            env::remove_var(key);
        }
        // Venues disabled so this test covers only the numeric/bool
        // defaults, not the required-credential path (see below).
        env::set_var("KALSHI_ENABLED", "false");
        env::set_var("POLYMARKET_ENABLED", "false");

        let config = Config::from_env_only().unwrap();
        env::remove_var("KALSHI_ENABLED");
        env::remove_var("POLYMARKET_ENABLED");
        assert!(!config.kalshi_enabled);
        assert!(!config.polymarket_enabled);
        assert!(config.dry_run);
        assert_eq!(config.bankroll_usd, rust_decimal_macros::dec!(1000));
    }

    #[test]
    #[serial]
    fn invalid_numeric_value_errors() {
        env::set_var("KALSHI_ENABLED", "false");
        env::set_var("POLYMARKET_ENABLED", "false");
        env::set_var("BANKROLL_USD", "not-a-number");
        let result = Config::from_env_only();
        env::remove_var("BANKROLL_USD");
        env::remove_var("KALSHI_ENABLED");
        env::remove_var("POLYMARKET_ENABLED");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    #[serial]
    fn missing_kalshi_credentials_is_fatal_when_enabled() {
        env::set_var("KALSHI_ENABLED", "true");
        env::set_var("POLYMARKET_ENABLED", "false");
        env::remove_var("KALSHI_API_KEY");
        env::remove_var("KALSHI_API_SECRET");

        let result = Config::from_env_only();
        env::remove_var("KALSHI_ENABLED");
        env::remove_var("POLYMARKET_ENABLED");
        assert!(matches!(result, Err(ConfigError::MissingVar(var)) if var == "KALSHI_API_KEY"));
    }

    #[test]
    #[serial]
    fn missing_polymarket_credentials_is_fatal_when_enabled() {
        env::set_var("KALSHI_ENABLED", "false");
        env::set_var("POLYMARKET_ENABLED", "true");
        for key in [
            "POLYMARKET_API_KEY",
            "POLYMARKET_API_SECRET",
            "POLYMARKET_API_PASSPHRASE",
            "POLYMARKET_PRIVATE_KEY",
            "POLYMARKET_FUNDER_ADDRESS",
        ] {
            env::remove_var(key);
        }

        let result = Config::from_env_only();
        env::remove_var("KALSHI_ENABLED");
        env::remove_var("POLYMARKET_ENABLED");
        assert!(matches!(result, Err(ConfigError::MissingVar(var)) if var == "POLYMARKET_API_KEY"));
    }
}
