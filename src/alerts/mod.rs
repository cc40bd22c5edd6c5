use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::aggregator::InstrumentCache;
use crate::config::AlertsConfig;
use crate::error::Result;
use crate::pipeline::handler::TickHandler;
use crate::storage::{AlertHistoryRepository, AlertRuleRepository};
use crate::types::alert::{AlertHistory, AlertRule};
use crate::types::tick::NormalizedTick;

pub mod evaluators;
pub mod notify;

use evaluators::{default_evaluators, RuleEvaluator};
use notify::{NotificationChannel, Notifier};

/// Read-through cache over the active rule set.
///
/// Tick rates are orders of magnitude above rule-mutation rates, so the
/// engine serves rules from memory and refreshes on an interval; mutation
/// paths call `invalidate` to force the next read through to the
/// repository.
pub struct RuleCache {
    repo: Arc<dyn AlertRuleRepository>,
    refresh: StdDuration,
    cached: RwLock<Option<(Instant, Arc<Vec<AlertRule>>)>>,
}

impl RuleCache {
    pub fn new(repo: Arc<dyn AlertRuleRepository>, refresh: StdDuration) -> Self {
        RuleCache {
            repo,
            refresh,
            cached: RwLock::new(None),
        }
    }

    pub async fn get_active(&self) -> Result<Arc<Vec<AlertRule>>> {
        {
            let cached = self.cached.read().await;
            if let Some((fetched_at, rules)) = cached.as_ref() {
                if fetched_at.elapsed() < self.refresh {
                    return Ok(rules.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some((fetched_at, rules)) = cached.as_ref() {
            if fetched_at.elapsed() < self.refresh {
                return Ok(rules.clone());
            }
        }
        let rules = Arc::new(self.repo.get_all_active().await?);
        *cached = Some((Instant::now(), rules.clone()));
        Ok(rules)
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

/// Evaluates every admitted tick against the active rules and fires
/// cooldown-gated notifications.
pub struct AlertEngine {
    rules: RuleCache,
    instruments: Arc<InstrumentCache>,
    history: Arc<dyn AlertHistoryRepository>,
    evaluators: Vec<Arc<dyn RuleEvaluator>>,
    notifier: Notifier,
    cooldown: Duration,
    last_triggered: DashMap<i64, DateTime<Utc>>,
}

impl AlertEngine {
    pub fn new(
        config: &AlertsConfig,
        rule_repo: Arc<dyn AlertRuleRepository>,
        instruments: Arc<InstrumentCache>,
        history: Arc<dyn AlertHistoryRepository>,
        channels: Vec<Arc<dyn NotificationChannel>>,
    ) -> Self {
        AlertEngine {
            rules: RuleCache::new(
                rule_repo,
                StdDuration::from_secs(config.rule_cache_refresh_seconds),
            ),
            instruments,
            history,
            evaluators: default_evaluators(),
            notifier: Notifier::new(channels, config.max_concurrent_notifications),
            cooldown: Duration::seconds(config.cooldown_seconds),
            last_triggered: DashMap::new(),
        }
    }

    /// Force the next rule read through to the repository, e.g. after a
    /// rule mutation via the management surface.
    pub async fn invalidate_rules(&self) {
        self.rules.invalidate().await;
    }

    /// Stamp the rule's last-trigger time iff its cooldown has elapsed.
    /// The map entry guard makes the read-modify-write atomic per rule.
    fn try_acquire_cooldown(&self, rule_id: i64, now: DateTime<Utc>) -> bool {
        match self.last_triggered.entry(rule_id) {
            Entry::Occupied(mut occupied) => {
                if now - *occupied.get() < self.cooldown {
                    false
                } else {
                    occupied.insert(now);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(now);
                true
            }
        }
    }
}

#[async_trait]
impl TickHandler for AlertEngine {
    fn name(&self) -> &'static str {
        "alert_engine"
    }

    async fn handle(&self, tick: &NormalizedTick) -> Result<()> {
        let rules = self.rules.get_active().await?;
        if rules.is_empty() {
            return Ok(());
        }

        let Some(instrument) = self.instruments.get(&tick.symbol, &tick.exchange) else {
            // No tick has registered the pair yet; nothing can reference it.
            return Ok(());
        };

        for rule in rules
            .iter()
            .filter(|r| r.is_active && r.instrument_id == instrument.id)
        {
            let Some(evaluator) = self.evaluators.iter().find(|e| e.can_evaluate(rule)) else {
                warn!(rule_id = rule.id, kind = %rule.kind, "no evaluator for rule kind");
                continue;
            };
            let Some(message) = evaluator.evaluate(rule, tick) else {
                continue;
            };

            let now = Utc::now();
            if !self.try_acquire_cooldown(rule.id, now) {
                continue;
            }

            info!(rule_id = rule.id, rule = %rule.name, %message, "alert triggered");
            if let Err(e) = self
                .history
                .add(AlertHistory::record(
                    rule.id,
                    instrument.id,
                    message.clone(),
                    now,
                ))
                .await
            {
                warn!(rule_id = rule.id, error = %e, "failed to append alert history");
            }
            self.notifier.broadcast(&message).await;
        }
        Ok(())
    }
}
