use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::alerts::evaluators::RuleEvaluator;
use crate::types::alert::{AlertRule, RuleKind};
use crate::types::tick::NormalizedTick;

/// Rolling percent change against a per-symbol baseline.
///
/// The baseline is the first price seen in the current period; once the
/// period elapses the baseline resets to the incoming tick and that tick
/// never triggers. The window is NOT reset on trigger — repeat firings are
/// suppressed by the engine's cooldown, not here.
pub struct PriceChangeEvaluator {
    baselines: DashMap<String, (Decimal, DateTime<Utc>)>,
}

impl PriceChangeEvaluator {
    pub fn new() -> Self {
        PriceChangeEvaluator {
            baselines: DashMap::new(),
        }
    }
}

impl Default for PriceChangeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEvaluator for PriceChangeEvaluator {
    fn name(&self) -> &'static str {
        "price_change_percent"
    }

    fn can_evaluate(&self, rule: &AlertRule) -> bool {
        rule.kind == RuleKind::PriceChangePercent
    }

    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String> {
        let period = rule.period();
        let mut entry = self
            .baselines
            .entry(tick.symbol.clone())
            .or_insert((tick.price, tick.timestamp));
        let (first_price, period_start) = *entry;

        if tick.timestamp - period_start > period {
            *entry = (tick.price, tick.timestamp);
            return None;
        }
        if first_price <= Decimal::ZERO {
            return None;
        }

        let change = (tick.price - first_price) / first_price * Decimal::from(100);
        if change.abs() > rule.threshold {
            Some(format!(
                "{} price changed {}% (from {} to {}) within {}m, threshold {}%",
                tick.symbol,
                change.round_dp(2).normalize(),
                first_price.normalize(),
                tick.price.normalize(),
                period.num_minutes(),
                rule.threshold.normalize()
            ))
        } else {
            None
        }
    }
}
