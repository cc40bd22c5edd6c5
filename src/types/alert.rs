use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The condition family an alert rule evaluates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    PriceAbove,
    PriceBelow,
    PriceChangePercent,
    VolumeSpike,
    Volatility,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::PriceAbove => "price_above",
            RuleKind::PriceBelow => "price_below",
            RuleKind::PriceChangePercent => "price_change_percent",
            RuleKind::VolumeSpike => "volume_spike",
            RuleKind::Volatility => "volatility",
        }
    }

    pub fn parse(s: &str) -> Option<RuleKind> {
        match s {
            "price_above" => Some(RuleKind::PriceAbove),
            "price_below" => Some(RuleKind::PriceBelow),
            "price_change_percent" => Some(RuleKind::PriceChangePercent),
            "volume_spike" => Some(RuleKind::VolumeSpike),
            "volatility" => Some(RuleKind::Volatility),
            _ => None,
        }
    }

    /// Whether the kind evaluates over a rolling window.
    pub fn is_rolling(&self) -> bool {
        matches!(
            self,
            RuleKind::PriceChangePercent | RuleKind::VolumeSpike | RuleKind::Volatility
        )
    }
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_PERIOD_MINUTES: i64 = 5;

/// A user-defined alert rule targeting a single instrument.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub name: String,
    pub instrument_id: i64,
    pub kind: RuleKind,
    pub threshold: Decimal,
    pub period_minutes: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    /// Rolling-window length; defaults to five minutes for rolling kinds.
    pub fn period(&self) -> Duration {
        Duration::minutes(self.period_minutes.unwrap_or(DEFAULT_PERIOD_MINUTES))
    }
}

/// Fields required to create a rule; the repository assigns id and created_at.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewAlertRule {
    pub name: String,
    pub instrument_id: i64,
    pub kind: RuleKind,
    pub threshold: Decimal,
    pub period_minutes: Option<i64>,
    pub is_active: bool,
}

/// An immutable record of a rule firing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertHistory {
    pub id: Uuid,
    pub rule_id: i64,
    pub instrument_id: i64,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
}

impl AlertHistory {
    pub fn record(rule_id: i64, instrument_id: i64, message: String, triggered_at: DateTime<Utc>) -> Self {
        AlertHistory {
            id: Uuid::new_v4(),
            rule_id,
            instrument_id,
            message,
            triggered_at,
        }
    }
}
