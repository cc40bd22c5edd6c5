use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::tick::SourceType;

/// Health of one (exchange, source-type) feed, owned by its adapter and
/// periodically snapshotted into persistence by the status probe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExchangeStatus {
    pub exchange: String,
    pub source_type: SourceType,
    pub is_online: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}
