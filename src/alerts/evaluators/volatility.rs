use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::alerts::evaluators::RuleEvaluator;
use crate::types::alert::{AlertRule, RuleKind};
use crate::types::tick::NormalizedTick;

/// Population standard deviation of percent returns over a rolling
/// per-symbol price window.
///
/// Returns whose predecessor price is zero are skipped rather than
/// dividing; a malformed feed must never break evaluation.
pub struct VolatilityEvaluator {
    windows: DashMap<String, VecDeque<(DateTime<Utc>, Decimal)>>,
}

impl VolatilityEvaluator {
    pub fn new() -> Self {
        VolatilityEvaluator {
            windows: DashMap::new(),
        }
    }

    fn stddev_of_returns(prices: &[Decimal]) -> Option<f64> {
        let mut returns = Vec::with_capacity(prices.len().saturating_sub(1));
        for pair in prices.windows(2) {
            let prev = pair[0];
            if prev.is_zero() {
                continue;
            }
            let r = (pair[1] - prev) / prev * Decimal::from(100);
            returns.push(r.to_f64().unwrap_or(0.0));
        }
        if returns.is_empty() {
            return None;
        }
        let mean = returns.iter().sum::<f64>() / returns.len() as f64;
        let variance =
            returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
        Some(variance.sqrt())
    }
}

impl Default for VolatilityEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEvaluator for VolatilityEvaluator {
    fn name(&self) -> &'static str {
        "volatility"
    }

    fn can_evaluate(&self, rule: &AlertRule) -> bool {
        rule.kind == RuleKind::Volatility
    }

    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String> {
        let mut window = self.windows.entry(tick.symbol.clone()).or_default();
        window.push_back((tick.timestamp, tick.price));

        let cutoff = tick.timestamp - rule.period();
        while let Some((ts, _)) = window.front() {
            if *ts < cutoff {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() < 3 {
            return None;
        }

        let prices: Vec<Decimal> = window.iter().map(|(_, p)| *p).collect();
        drop(window);

        let volatility = Self::stddev_of_returns(&prices)?;
        let threshold = rule.threshold.to_f64().unwrap_or(f64::MAX);
        if volatility > threshold {
            Some(format!(
                "{} volatility {:.2}% over {}m exceeds threshold {}%",
                tick.symbol,
                volatility,
                rule.period().num_minutes(),
                rule.threshold.normalize()
            ))
        } else {
            None
        }
    }
}
