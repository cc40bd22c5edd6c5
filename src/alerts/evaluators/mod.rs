use std::sync::Arc;

use crate::types::alert::AlertRule;
use crate::types::tick::NormalizedTick;

pub mod price_change;
pub mod threshold;
pub mod volatility;
pub mod volume_spike;

pub use price_change::PriceChangeEvaluator;
pub use threshold::PriceThresholdEvaluator;
pub use volatility::VolatilityEvaluator;
pub use volume_spike::VolumeSpikeEvaluator;

/// Evaluates one family of rule kinds, holding whatever per-symbol state
/// the family needs. Evaluation never fails; a tick either triggers a rule
/// or it does not.
pub trait RuleEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_evaluate(&self, rule: &AlertRule) -> bool;

    /// Returns the notification message when the rule triggers.
    fn evaluate(&self, rule: &AlertRule, tick: &NormalizedTick) -> Option<String>;
}

/// The evaluator set shipped with the engine, in dispatch order.
pub fn default_evaluators() -> Vec<Arc<dyn RuleEvaluator>> {
    vec![
        Arc::new(PriceThresholdEvaluator::new()),
        Arc::new(PriceChangeEvaluator::new()),
        Arc::new(VolumeSpikeEvaluator::new()),
        Arc::new(VolatilityEvaluator::new()),
    ]
}
