//! Exchange rates, fee arithmetic, and the fee pool
//!
//! Pure computation, no I/O. Rates are fixed at startup: one positive
//! value per non-reference currency, expressed as units of that
//! currency per one unit of the reference currency. Cross-currency
//! conversion pivots through the reference currency, which makes it
//! consistent but not perfectly invertible under floating point.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::types::Currency;
use crate::Result;

/// Running total of collected fees, in reference-currency minor units
///
/// Owned by the [`ExchangePolicy`] instance that collects into it; no
/// static state. Cloning shares the same total. The total is
/// monotonically non-decreasing and is incremented exactly once per
/// committed fee-bearing operation, after the storage commit.
#[derive(Debug, Clone, Default)]
pub struct FeePool {
    collected: Arc<Mutex<f64>>,
}

impl FeePool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, amount: f64) {
        *self.collected.lock() += amount;
    }

    /// Total collected so far
    pub fn total(&self) -> f64 {
        *self.collected.lock()
    }
}

/// Immutable conversion and fee rules plus the pool they feed
#[derive(Debug, Clone)]
pub struct ExchangePolicy {
    fee_rate: f64,
    rates: HashMap<Currency, f64>,
    pool: FeePool,
}

impl ExchangePolicy {
    /// Build from validated configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            fee_rate: config.fee_rate,
            rates: config.rates.clone(),
            pool: FeePool::new(),
        })
    }

    /// Convert an amount between currencies
    ///
    /// Identity when `from == to`; otherwise into the reference
    /// currency by dividing by `from`'s rate, out of it by multiplying
    /// by `to`'s rate, pivoting through the reference for cross pairs.
    pub fn convert(&self, amount: f64, from: Currency, to: Currency) -> f64 {
        if from == to {
            return amount;
        }

        let in_reference = if from == Currency::REFERENCE {
            amount
        } else {
            amount / self.rate(from)
        };

        if to == Currency::REFERENCE {
            in_reference
        } else {
            in_reference * self.rate(to)
        }
    }

    /// Fee on a principal amount, rounded to the nearest minor unit
    pub fn fee(&self, amount: i64) -> i64 {
        (amount as f64 * self.fee_rate).round() as i64
    }

    /// Add a committed fee to the pool, converted to the reference
    /// currency
    ///
    /// Must be called exactly once per committed fee-bearing operation,
    /// after the storage commit succeeds. Fees of rolled-back
    /// operations are never counted.
    pub fn collect_fee(&self, fee: i64, currency: Currency) {
        let in_reference = self.convert(fee as f64, currency, Currency::REFERENCE);
        self.pool.add(in_reference);
    }

    /// Total fees collected, in reference-currency minor units
    pub fn collected_fees(&self) -> f64 {
        self.pool.total()
    }

    // The rate table is complete for every non-reference currency by
    // construction (from_config validates), so indexing cannot miss.
    fn rate(&self, currency: Currency) -> f64 {
        self.rates[&currency]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_policy() -> ExchangePolicy {
        ExchangePolicy::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn test_convert_identity() {
        let policy = test_policy();
        assert_eq!(policy.convert(1234.0, Currency::USD, Currency::USD), 1234.0);
    }

    #[test]
    fn test_convert_to_reference() {
        let policy = test_policy();
        // 0.25 USD per PLN, so 100 USD = 400 PLN
        assert_eq!(policy.convert(100.0, Currency::USD, Currency::PLN), 400.0);
    }

    #[test]
    fn test_convert_from_reference() {
        let policy = test_policy();
        assert_eq!(policy.convert(400.0, Currency::PLN, Currency::USD), 100.0);
    }

    #[test]
    fn test_convert_cross_pivots_through_reference() {
        let policy = test_policy();
        // 100 USD -> 400 PLN -> 88 EUR
        let direct = policy.convert(100.0, Currency::USD, Currency::EUR);
        let via_reference = policy.convert(
            policy.convert(100.0, Currency::USD, Currency::PLN),
            Currency::PLN,
            Currency::EUR,
        );
        assert!((direct - 88.0).abs() < 1e-9);
        assert!((direct - via_reference).abs() < 1e-9);
    }

    #[test]
    fn test_convert_round_trip() {
        let policy = test_policy();
        for currency in Currency::ALL {
            let there = policy.convert(1000.0, currency, Currency::REFERENCE);
            let back = policy.convert(there, Currency::REFERENCE, currency);
            assert!((back - 1000.0).abs() < 1e-6, "{} round trip drifted", currency);
        }
    }

    #[test]
    fn test_fee_rounds_to_minor_unit() {
        let policy = test_policy();
        assert_eq!(policy.fee(1000), 50);
        assert_eq!(policy.fee(501), 25); // 25.05 rounds down
        assert_eq!(policy.fee(510), 26); // 25.5 rounds up
    }

    #[test]
    fn test_collect_fee_accumulates_in_reference() {
        let policy = test_policy();
        policy.collect_fee(50, Currency::PLN);
        policy.collect_fee(25, Currency::USD); // 100 PLN
        assert!((policy.collected_fees() - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_pool_shared_between_clones() {
        let policy = test_policy();
        let clone = policy.clone();
        policy.collect_fee(10, Currency::PLN);
        assert!((clone.collected_fees() - 10.0).abs() < 1e-9);
    }
}
