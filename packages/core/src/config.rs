use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::alerts::engine::{AlertConfig, DEFAULT_EXPIRING_SOON_WINDOW_DAYS};
use crate::cli::Cli;
use crate::inventory::ledger::DEFAULT_LOW_STOCK_THRESHOLD;
use crate::inventory::LedgerConfig;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://pharmacy-locator.db";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub low_stock_default_threshold: u32,
    pub expiring_soon_window_days: i64,
    pub price_drop_alert_pct: Decimal,
    pub alert_sweep_interval_seconds: u64,
    /// Per-key in-memory price history cap. `None` disables compaction.
    pub price_history_retention: Option<usize>,
    /// Alerts are only logged when unset.
    pub alert_webhook_url: Option<String>,
}

fn parse_var<T: FromStr>(name: &str, raw: Option<String>, default: T) -> Result<T, String> {
    match raw {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| format!("{} must be a valid number, got {:?}", name, value)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build the config from any variable source. `lookup` returns `None`
    /// for unset variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let bind_address = lookup("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let low_stock_default_threshold = parse_var(
            "LOW_STOCK_DEFAULT_THRESHOLD",
            lookup("LOW_STOCK_DEFAULT_THRESHOLD"),
            DEFAULT_LOW_STOCK_THRESHOLD,
        )?;

        let expiring_soon_window_days = parse_var(
            "EXPIRING_SOON_WINDOW_DAYS",
            lookup("EXPIRING_SOON_WINDOW_DAYS"),
            DEFAULT_EXPIRING_SOON_WINDOW_DAYS,
        )?;
        if expiring_soon_window_days < 0 {
            return Err("EXPIRING_SOON_WINDOW_DAYS must not be negative".to_string());
        }

        let price_drop_alert_pct = parse_var(
            "PRICE_DROP_ALERT_PCT",
            lookup("PRICE_DROP_ALERT_PCT"),
            Decimal::new(10, 2),
        )?;
        if price_drop_alert_pct < Decimal::ZERO || price_drop_alert_pct >= Decimal::ONE {
            return Err(format!(
                "PRICE_DROP_ALERT_PCT must be in [0, 1), got {}",
                price_drop_alert_pct
            ));
        }

        let alert_sweep_interval_seconds = parse_var(
            "ALERT_SWEEP_INTERVAL_SECONDS",
            lookup("ALERT_SWEEP_INTERVAL_SECONDS"),
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?;
        if alert_sweep_interval_seconds == 0 {
            return Err("ALERT_SWEEP_INTERVAL_SECONDS must be positive".to_string());
        }

        let price_history_retention = lookup("PRICE_HISTORY_RETENTION")
            .map(|raw| {
                raw.trim()
                    .parse::<usize>()
                    .map_err(|_| format!("PRICE_HISTORY_RETENTION must be a valid number, got {:?}", raw))
            })
            .transpose()?;

        let alert_webhook_url = lookup("ALERT_WEBHOOK_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            database_url,
            bind_address,
            low_stock_default_threshold,
            expiring_soon_window_days,
            price_drop_alert_pct,
            alert_sweep_interval_seconds,
            price_history_retention,
            alert_webhook_url,
        })
    }

    /// Command-line flags win over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Result<Self, String> {
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(bind) = &cli.bind {
            self.bind_address = bind.clone();
        }
        if let Some(interval) = cli.sweep_interval {
            if interval == 0 {
                return Err("--sweep-interval must be positive".to_string());
            }
            self.alert_sweep_interval_seconds = interval;
        }
        Ok(self)
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            low_stock_default_threshold: self.low_stock_default_threshold,
        }
    }

    pub fn alert_config(&self) -> AlertConfig {
        AlertConfig {
            expiring_soon_window_days: self.expiring_soon_window_days,
            price_drop_pct: self.price_drop_alert_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.low_stock_default_threshold, 10);
        assert_eq!(config.expiring_soon_window_days, 30);
        assert_eq!(config.price_drop_alert_pct, Decimal::new(10, 2));
        assert_eq!(config.alert_sweep_interval_seconds, 300);
        assert_eq!(config.price_history_retention, None);
        assert_eq!(config.alert_webhook_url, None);
    }

    #[test]
    fn variables_override_defaults() {
        let config = config_from(&[
            ("LOW_STOCK_DEFAULT_THRESHOLD", "4"),
            ("EXPIRING_SOON_WINDOW_DAYS", "14"),
            ("PRICE_DROP_ALERT_PCT", "0.25"),
            ("ALERT_SWEEP_INTERVAL_SECONDS", "60"),
            ("PRICE_HISTORY_RETENTION", "100"),
            ("ALERT_WEBHOOK_URL", "https://hooks.example.com/pharmacy"),
        ])
        .unwrap();

        assert_eq!(config.low_stock_default_threshold, 4);
        assert_eq!(config.alert_config().expiring_soon_window_days, 14);
        assert_eq!(config.alert_config().price_drop_pct, Decimal::new(25, 2));
        assert_eq!(config.alert_sweep_interval_seconds, 60);
        assert_eq!(config.price_history_retention, Some(100));
        assert_eq!(config.ledger_config().low_stock_default_threshold, 4);
        assert!(config.alert_webhook_url.is_some());
    }

    #[test]
    fn price_drop_pct_must_be_a_fraction() {
        assert!(config_from(&[("PRICE_DROP_ALERT_PCT", "1.0")]).is_err());
        assert!(config_from(&[("PRICE_DROP_ALERT_PCT", "-0.1")]).is_err());
        assert!(config_from(&[("PRICE_DROP_ALERT_PCT", "0")]).is_ok());
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        assert!(config_from(&[("ALERT_SWEEP_INTERVAL_SECONDS", "0")]).is_err());
    }

    #[test]
    fn non_numeric_value_is_rejected() {
        let err = config_from(&[("LOW_STOCK_DEFAULT_THRESHOLD", "ten")]).unwrap_err();
        assert!(err.contains("LOW_STOCK_DEFAULT_THRESHOLD"));
    }

    #[test]
    fn cli_flags_take_precedence() {
        let cli = Cli {
            database_url: Some("sqlite::memory:".into()),
            bind: Some("127.0.0.1:9000".into()),
            sweep_interval: Some(30),
        };
        let config = config_from(&[("ALERT_SWEEP_INTERVAL_SECONDS", "600")])
            .unwrap()
            .apply_cli(&cli)
            .unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.alert_sweep_interval_seconds, 30);
    }
}
