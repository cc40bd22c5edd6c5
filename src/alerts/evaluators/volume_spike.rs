use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::alerts::evaluators::RuleEvaluator;
use crate::types::alert::{AlertRule, RuleKind};
use crate::types::tick::NormalizedTick;

/// Detects ticks whose volume dwarfs the rolling per-symbol average.
///
/// The window holds (timestamp, volume) pairs evicted by event-time age;
/// the average excludes the incoming tick so a spike does not dilute its
/// own baseline. Comparison is strictly greater-than.
pub struct VolumeSpikeEvaluator {
    windows: DashMap<String, VecDeque<(DateTime<Utc>, Decimal)>>,
}

impl VolumeSpikeEvaluator {
    pub fn new() -> Self {
        VolumeSpikeEvaluator {
            windows: DashMap::new(),
        }
    }
}

impl Default for VolumeSpikeEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEvaluator for VolumeSpikeEvaluator {
    fn name(&self) -> &'static str {
        "volume_spike"
    }

    fn can_evaluate(&self, rule: &AlertRule) -> bool {
        rule.kind == RuleKind::VolumeSpike
    }

    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String> {
        let mut window = self.windows.entry(tick.symbol.clone()).or_default();
        window.push_back((tick.timestamp, tick.volume));

        let cutoff = tick.timestamp - rule.period();
        while let Some((ts, _)) = window.front() {
            if *ts < cutoff {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < 2 {
            return None;
        }

        let prior = window.len() - 1;
        let sum: Decimal = window.iter().take(prior).map(|(_, v)| *v).sum();
        let avg = sum / Decimal::from(prior as i64);
        if avg.is_zero() {
            return None;
        }

        let ratio = tick.volume / avg;
        if ratio > rule.threshold {
            Some(format!(
                "{} volume {} is {}x the rolling average {} (threshold {}x)",
                tick.symbol,
                tick.volume.normalize(),
                ratio.round_dp(2).normalize(),
                avg.round_dp(4).normalize(),
                rule.threshold.normalize()
            ))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::evaluators::testutil::{at, rule, tick_at};

    fn vol(v: &str) -> Decimal {
        v.parse().unwrap()
    }

    #[test]
    fn ratio_equal_to_threshold_does_not_trigger() {
        let evaluator = VolumeSpikeEvaluator::new();
        let r = rule(RuleKind::VolumeSpike, 3);
        let price = Decimal::from(100);

        assert!(evaluator.evaluate(&r, &tick_at(at(0, 0), price, vol("1"))).is_none());
        assert!(evaluator.evaluate(&r, &tick_at(at(1, 0), price, vol("1"))).is_none());
        // avg of prior entries = 1, ratio = 3 exactly: strict comparison.
        assert!(evaluator.evaluate(&r, &tick_at(at(2, 0), price, vol("3"))).is_none());
    }

    #[test]
    fn ratio_above_threshold_triggers() {
        let evaluator = VolumeSpikeEvaluator::new();
        let r = rule(RuleKind::VolumeSpike, 3);
        let price = Decimal::from(100);

        evaluator.evaluate(&r, &tick_at(at(0, 0), price, vol("1")));
        evaluator.evaluate(&r, &tick_at(at(1, 0), price, vol("1")));
        let triggered = evaluator.evaluate(&r, &tick_at(at(2, 0), price, vol("3.01")));
        assert!(triggered.unwrap().contains("3.01"));
    }

    #[test]
    fn single_entry_never_triggers() {
        let evaluator = VolumeSpikeEvaluator::new();
        let r = rule(RuleKind::VolumeSpike, 1);

        assert!(evaluator
            .evaluate(&r, &tick_at(at(0, 0), Decimal::from(100), vol("1000")))
            .is_none());
    }

    #[test]
    fn zero_average_never_triggers() {
        let evaluator = VolumeSpikeEvaluator::new();
        let r = rule(RuleKind::VolumeSpike, 1);
        let price = Decimal::from(100);

        evaluator.evaluate(&r, &tick_at(at(0, 0), price, vol("0")));
        assert!(evaluator.evaluate(&r, &tick_at(at(1, 0), price, vol("10"))).is_none());
    }

    #[test]
    fn entries_outside_period_are_evicted() {
        let evaluator = VolumeSpikeEvaluator::new();
        let r = rule(RuleKind::VolumeSpike, 1);
        let price = Decimal::from(100);

        evaluator.evaluate(&r, &tick_at(at(0, 0), price, vol("1")));
        // Ten minutes later the first entry is out of the 5m window, so the
        // window is back to a single entry.
        assert!(evaluator.evaluate(&r, &tick_at(at(10, 0), price, vol("50"))).is_none());
        assert_eq!(evaluator.windows.get("BTCUSDT").unwrap().len(), 1);
    }
}
