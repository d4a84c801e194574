//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `teller_operations_total` - Committed operations, by kind
//! - `teller_operations_failed_total` - Failed operations, by kind
//! - `teller_fee_pool_minor_units` - Fee pool total in the reference currency
//!
//! Everything is registered on an instance-level registry so several
//! engines can coexist in one process (tests in particular).

use prometheus::{Gauge, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed operations by kind
    pub operations_total: IntCounterVec,

    /// Failed operations by kind
    pub operations_failed: IntCounterVec,

    /// Fee pool total (reference-currency minor units)
    pub fee_pool: Gauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("teller_operations_total", "Committed operations by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operations_failed = IntCounterVec::new(
            Opts::new(
                "teller_operations_failed_total",
                "Failed operations by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(operations_failed.clone()))?;

        let fee_pool = Gauge::new(
            "teller_fee_pool_minor_units",
            "Fee pool total in reference-currency minor units",
        )?;
        registry.register(Box::new(fee_pool.clone()))?;

        Ok(Self {
            operations_total,
            operations_failed,
            fee_pool,
            registry,
        })
    }

    /// Record an operation outcome
    pub fn observe(&self, kind: &str, ok: bool) {
        if ok {
            self.operations_total.with_label_values(&[kind]).inc();
        } else {
            self.operations_failed.with_label_values(&[kind]).inc();
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_do_not_collide() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.observe("deposit", true);
        a.observe("deposit", false);

        assert_eq!(a.operations_total.with_label_values(&["deposit"]).get(), 1);
        assert_eq!(b.operations_total.with_label_values(&["deposit"]).get(), 0);
    }
}
