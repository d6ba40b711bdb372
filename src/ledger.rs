//! Advisory cost accounting across inference tiers.
//!
//! The ledger is the only cross-task mutable state in a run. Appends go
//! through a mutex; reads take a point-in-time snapshot. It never blocks or
//! cancels an already-issued call — an overrun is logged and carried in the
//! snapshot for the caller to act on.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Inference tier a call was billed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Batched low-cost screening pass.
    Screen,
    /// Per-channel high-fidelity re-classification.
    Escalate,
}

impl Tier {
    pub fn label(&self) -> &'static str {
        match self {
            Tier::Screen => "screen",
            Tier::Escalate => "escalate",
        }
    }
}

/// Per-million-token USD rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_per_million_usd: f64,
    pub output_per_million_usd: f64,
    pub cached_input_per_million_usd: f64,
}

/// Token usage reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_input_tokens: u64,
}

impl CallUsage {
    /// USD cost of this call at the given rates. Cached input tokens are a
    /// subset of input tokens and are billed at the cached rate instead.
    pub fn cost_usd(&self, rates: &ModelRates) -> f64 {
        let fresh_input = self.input_tokens.saturating_sub(self.cached_input_tokens);
        (fresh_input as f64 * rates.input_per_million_usd
            + self.cached_input_tokens as f64 * rates.cached_input_per_million_usd
            + self.output_tokens as f64 * rates.output_per_million_usd)
            / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TierSpend {
    pub calls: u32,
    pub spent_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Default)]
struct Inner {
    screen: TierSpend,
    escalate: TierSpend,
}

/// Read-only snapshot for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub cost_limit_usd: f64,
    pub spent_usd: f64,
    pub utilization: f64,
    pub exceeded: bool,
    pub screen: TierSpend,
    pub escalate: TierSpend,
}

/// Append-only cost ledger scoped to one run.
#[derive(Debug)]
pub struct BudgetLedger {
    cost_limit_usd: f64,
    screen_rates: ModelRates,
    escalate_rates: ModelRates,
    inner: Mutex<Inner>,
}

impl BudgetLedger {
    pub fn new(cost_limit_usd: f64, screen_rates: ModelRates, escalate_rates: ModelRates) -> Self {
        Self { cost_limit_usd, screen_rates, escalate_rates, inner: Mutex::new(Inner::default()) }
    }

    /// Append one call's usage under `tier` and return its USD cost.
    ///
    /// Crossing the ceiling logs a warning — nothing is blocked.
    pub fn record_call(&self, tier: Tier, usage: &CallUsage) -> f64 {
        let rates = match tier {
            Tier::Screen => &self.screen_rates,
            Tier::Escalate => &self.escalate_rates,
        };
        let cost = usage.cost_usd(rates);

        let mut inner = self.inner.lock().expect("ledger mutex poisoned");
        let was_within = inner.screen.spent_usd + inner.escalate.spent_usd <= self.cost_limit_usd;
        let slot = match tier {
            Tier::Screen => &mut inner.screen,
            Tier::Escalate => &mut inner.escalate,
        };
        slot.calls += 1;
        slot.spent_usd += cost;
        slot.input_tokens += usage.input_tokens;
        slot.output_tokens += usage.output_tokens;

        let spent = inner.screen.spent_usd + inner.escalate.spent_usd;
        drop(inner);

        debug!(tier = tier.label(), cost_usd = cost, total_usd = spent, "call recorded");
        if was_within && spent > self.cost_limit_usd {
            warn!(
                spent_usd = spent,
                limit_usd = self.cost_limit_usd,
                "budget ceiling exceeded (advisory — run continues)"
            );
        }
        cost
    }

    pub fn spent(&self) -> f64 {
        let inner = self.inner.lock().expect("ledger mutex poisoned");
        inner.screen.spent_usd + inner.escalate.spent_usd
    }

    pub fn remaining(&self) -> f64 {
        (self.cost_limit_usd - self.spent()).max(0.0)
    }

    /// Fraction of the ceiling consumed; may exceed 1.0.
    pub fn utilization(&self) -> f64 {
        if self.cost_limit_usd <= 0.0 {
            return 0.0;
        }
        self.spent() / self.cost_limit_usd
    }

    pub fn is_exceeded(&self) -> bool {
        self.spent() > self.cost_limit_usd
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.inner.lock().expect("ledger mutex poisoned");
        let spent = inner.screen.spent_usd + inner.escalate.spent_usd;
        LedgerSnapshot {
            taken_at: Utc::now(),
            cost_limit_usd: self.cost_limit_usd,
            spent_usd: spent,
            utilization: if self.cost_limit_usd > 0.0 { spent / self.cost_limit_usd } else { 0.0 },
            exceeded: spent > self.cost_limit_usd,
            screen: inner.screen,
            escalate: inner.escalate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rates(input: f64, output: f64) -> ModelRates {
        ModelRates {
            input_per_million_usd: input,
            output_per_million_usd: output,
            cached_input_per_million_usd: input / 10.0,
        }
    }

    fn ledger(limit: f64) -> BudgetLedger {
        BudgetLedger::new(limit, rates(0.15, 0.60), rates(2.50, 10.0))
    }

    #[test]
    fn cost_splits_cached_input() {
        let usage = CallUsage { input_tokens: 1_000_000, output_tokens: 0, cached_input_tokens: 500_000 };
        let r = rates(1.0, 0.0);
        // 500k fresh at 1.0 + 500k cached at 0.1
        assert!((usage.cost_usd(&r) - 0.55).abs() < 1e-9);
    }

    #[test]
    fn record_accumulates_per_tier() {
        let l = ledger(10.0);
        l.record_call(Tier::Screen, &CallUsage { input_tokens: 1_000_000, ..Default::default() });
        l.record_call(Tier::Escalate, &CallUsage { input_tokens: 1_000_000, ..Default::default() });
        let snap = l.snapshot();
        assert_eq!(snap.screen.calls, 1);
        assert_eq!(snap.escalate.calls, 1);
        assert!((snap.screen.spent_usd - 0.15).abs() < 1e-9);
        assert!((snap.escalate.spent_usd - 2.50).abs() < 1e-9);
        assert!((snap.spent_usd - 2.65).abs() < 1e-9);
    }

    #[test]
    fn overrun_is_advisory() {
        let l = ledger(0.01);
        l.record_call(Tier::Escalate, &CallUsage { input_tokens: 1_000_000, ..Default::default() });
        assert!(l.is_exceeded());
        assert_eq!(l.remaining(), 0.0);
        assert!(l.utilization() > 1.0);
        // nothing prevents further appends
        l.record_call(Tier::Escalate, &CallUsage { input_tokens: 1_000_000, ..Default::default() });
        assert_eq!(l.snapshot().escalate.calls, 2);
    }

    #[test]
    fn zero_limit_utilization_is_zero() {
        let l = BudgetLedger::new(0.0, rates(1.0, 1.0), rates(1.0, 1.0));
        assert_eq!(l.utilization(), 0.0);
    }
}
