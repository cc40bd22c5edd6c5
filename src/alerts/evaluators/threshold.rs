use crate::alerts::evaluators::RuleEvaluator;
use crate::types::alert::{AlertRule, RuleKind};
use crate::types::tick::NormalizedTick;

/// Stateless price threshold crossings. Equality never triggers.
pub struct PriceThresholdEvaluator;

impl PriceThresholdEvaluator {
    pub fn new() -> Self {
        PriceThresholdEvaluator
    }
}

impl Default for PriceThresholdEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEvaluator for PriceThresholdEvaluator {
    fn name(&self) -> &'static str {
        "price_threshold"
    }

    fn can_evaluate(&self, rule: &AlertRule) -> bool {
        matches!(rule.kind, RuleKind::PriceAbove | RuleKind::PriceBelow)
    }

    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String> {
        match rule.kind {
            RuleKind::PriceAbove if tick.price > rule.threshold => Some(format!(
                "{} price {} is above threshold {}",
                tick.symbol,
                tick.price.normalize(),
                rule.threshold.normalize()
            )),
            RuleKind::PriceBelow if tick.price < rule.threshold => Some(format!(
                "{} price {} is below threshold {}",
                tick.symbol,
                tick.price.normalize(),
                rule.threshold.normalize()
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::evaluators::testutil::{at, rule, tick_at};
    use rust_decimal::Decimal;

    #[test]
    fn above_is_strict() {
        let evaluator = PriceThresholdEvaluator::new();
        let r = rule(RuleKind::PriceAbove, 50000);
        let ts = at(0, 0);

        let triggered = evaluator.evaluate(&r, &tick_at(ts, Decimal::from(50001), Decimal::ONE));
        assert!(triggered.unwrap().contains("BTCUSDT"));

        assert!(evaluator
            .evaluate(&r, &tick_at(ts, Decimal::from(50000), Decimal::ONE))
            .is_none());
        assert!(evaluator
            .evaluate(&r, &tick_at(ts, Decimal::from(49999), Decimal::ONE))
            .is_none());
    }

    #[test]
    fn below_is_strict() {
        let evaluator = PriceThresholdEvaluator::new();
        let r = rule(RuleKind::PriceBelow, 50000);
        let ts = at(0, 0);

        assert!(evaluator
            .evaluate(&r, &tick_at(ts, Decimal::from(49999), Decimal::ONE))
            .is_some());
        assert!(evaluator
            .evaluate(&r, &tick_at(ts, Decimal::from(50000), Decimal::ONE))
            .is_none());
    }

    #[test]
    fn only_claims_threshold_kinds() {
        let evaluator = PriceThresholdEvaluator::new();
        assert!(evaluator.can_evaluate(&rule(RuleKind::PriceAbove, 1)));
        assert!(evaluator.can_evaluate(&rule(RuleKind::PriceBelow, 1)));
        assert!(!evaluator.can_evaluate(&rule(RuleKind::VolumeSpike, 1)));
    }
}
