//! Per-client privacy budget accounting.
//!
//! Epsilon is fixed when a client is registered and consumed monotonically,
//! one round at a time. Once the remainder cannot cover another round the
//! client must stop contributing.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Privacy budget of one client.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyBudget {
    /// Total epsilon for the budget window
    pub epsilon: f64,
    /// Epsilon spent by each contributed round
    pub consumed_per_round: f64,
    /// Epsilon spent so far
    #[serde(default)]
    pub consumed: f64,
}

impl PrivacyBudget {
    /// New, unspent budget.
    pub fn new(epsilon: f64, consumed_per_round: f64) -> Result<Self, GateError> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(GateError::PrivacyBudgetExhausted {
                client_id: None,
                epsilon,
            });
        }
        if !(consumed_per_round.is_finite() && consumed_per_round > 0.0) {
            return Err(GateError::InvalidArgument(format!(
                "per-round epsilon must be positive, got {}",
                consumed_per_round
            )));
        }
        Ok(Self {
            epsilon,
            consumed_per_round,
            consumed: 0.0,
        })
    }

    /// Epsilon not yet spent.
    pub fn remaining(&self) -> f64 {
        (self.epsilon - self.consumed).max(0.0)
    }

    /// Whether another round can be paid for.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() + f64::EPSILON < self.consumed_per_round
    }
}

/// Thread-safe ledger of client budgets.
#[derive(Debug, Default)]
pub struct PrivacyLedger {
    budgets: Mutex<HashMap<String, PrivacyBudget>>,
}

impl PrivacyLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a client's budget.
    pub fn register(&self, client_id: impl Into<String>, budget: PrivacyBudget) {
        self.budgets.lock().insert(client_id.into(), budget);
    }

    /// Budget snapshot for a client.
    pub fn budget(&self, client_id: &str) -> Option<PrivacyBudget> {
        self.budgets.lock().get(client_id).copied()
    }

    /// Spend one round of budget and return the epsilon to noise with.
    pub fn charge(&self, client_id: &str) -> Result<f64, GateError> {
        let mut budgets = self.budgets.lock();
        let budget = budgets.get_mut(client_id).ok_or_else(|| {
            GateError::InvalidArgument(format!("no privacy budget for client {}", client_id))
        })?;
        if budget.is_exhausted() {
            log::warn!(
                "client {} privacy budget exhausted ({:.4} remaining)",
                client_id,
                budget.remaining()
            );
            return Err(GateError::PrivacyBudgetExhausted {
                client_id: Some(client_id.to_string()),
                epsilon: budget.remaining(),
            });
        }
        budget.consumed += budget.consumed_per_round;
        Ok(budget.consumed_per_round)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.budgets.lock().len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.budgets.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charge_until_exhausted() {
        let ledger = PrivacyLedger::new();
        ledger.register("a", PrivacyBudget::new(1.0, 0.25).unwrap());

        for _ in 0..4 {
            assert!((ledger.charge("a").unwrap() - 0.25).abs() < 1e-12);
        }
        let err = ledger.charge("a").unwrap_err();
        assert!(matches!(
            err,
            GateError::PrivacyBudgetExhausted { client_id: Some(ref id), .. } if id == "a"
        ));
        assert_eq!(ledger.budget("a").unwrap().remaining(), 0.0);
    }

    #[test]
    fn test_consumption_is_monotone() {
        let ledger = PrivacyLedger::new();
        ledger.register("a", PrivacyBudget::new(3.0, 1.0).unwrap());
        let mut last = 0.0;
        while ledger.charge("a").is_ok() {
            let consumed = ledger.budget("a").unwrap().consumed;
            assert!(consumed > last);
            last = consumed;
        }
        assert!((last - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_client() {
        let ledger = PrivacyLedger::new();
        assert!(matches!(
            ledger.charge("ghost"),
            Err(GateError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_invalid_budget() {
        assert!(PrivacyBudget::new(0.0, 0.1).is_err());
        assert!(PrivacyBudget::new(1.0, 0.0).is_err());
    }
}
