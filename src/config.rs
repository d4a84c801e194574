//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::Currency;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database URL (`sqlite::memory:` or `sqlite://path`)
    pub database_url: String,

    /// Service name
    pub service_name: String,

    /// Service fee rate as a fraction of the principal amount
    pub fee_rate: f64,

    /// Exchange rate per non-reference currency, expressed as units of
    /// that currency per one unit of the reference currency
    pub rates: HashMap<Currency, f64>,
}

impl Default for Config {
    fn default() -> Self {
        let mut rates = HashMap::new();
        rates.insert(Currency::USD, 0.25);
        rates.insert(Currency::EUR, 0.22);
        rates.insert(Currency::GBP, 0.19);

        Self {
            database_url: "sqlite::memory:".to_string(),
            service_name: "teller-core".to_string(),
            fee_rate: 0.05,
            rates,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// `TELLER_FEE_RATE` and one `TELLER_RATE_<CODE>` per non-reference
    /// currency are required; startup fails hard if any is absent or
    /// not a positive number. `TELLER_DATABASE_URL` is optional.
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.rates.clear();

        if let Ok(url) = std::env::var("TELLER_DATABASE_URL") {
            config.database_url = url;
        }

        config.fee_rate = require_env_number("TELLER_FEE_RATE")?;

        for currency in Currency::ALL {
            if currency == Currency::REFERENCE {
                continue;
            }
            let var = format!("TELLER_RATE_{}", currency.code());
            config.rates.insert(currency, require_env_number(&var)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check fee and rate values
    ///
    /// The fee rate must lie in `[0, 1)` and every non-reference
    /// currency must carry a positive rate.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.fee_rate.is_finite() || self.fee_rate < 0.0 || self.fee_rate >= 1.0 {
            return Err(crate::Error::Config(format!(
                "Fee rate must be in [0, 1), got {}",
                self.fee_rate
            )));
        }

        for currency in Currency::ALL {
            if currency == Currency::REFERENCE {
                continue;
            }
            match self.rates.get(&currency) {
                None => {
                    return Err(crate::Error::Config(format!(
                        "Missing exchange rate for {}",
                        currency
                    )));
                }
                Some(rate) if !rate.is_finite() || *rate <= 0.0 => {
                    return Err(crate::Error::Config(format!(
                        "Exchange rate for {} must be positive, got {}",
                        currency, rate
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

fn require_env_number(var: &str) -> crate::Result<f64> {
    let raw = std::env::var(var)
        .map_err(|_| crate::Error::Config(format!("Missing environment variable {}", var)))?;
    let value: f64 = raw
        .parse()
        .map_err(|_| crate::Error::Config(format!("{} is not a number: {}", var, raw)))?;
    if !value.is_finite() || value <= 0.0 {
        return Err(crate::Error::Config(format!(
            "{} must be a positive number, got {}",
            var, raw
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.service_name, "teller-core");
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_missing_rate() {
        let mut config = Config::default();
        config.rates.remove(&Currency::EUR);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_positive_rate() {
        let mut config = Config::default();
        config.rates.insert(Currency::USD, 0.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_fee_rate() {
        let mut config = Config::default();
        config.fee_rate = 1.0;
        assert!(config.validate().is_err());

        config.fee_rate = -0.01;
        assert!(config.validate().is_err());
    }
}
