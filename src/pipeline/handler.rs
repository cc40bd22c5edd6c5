use async_trait::async_trait;

use crate::error::Result;
use crate::types::tick::NormalizedTick;

/// A downstream consumer of admitted ticks.
///
/// Handlers run sequentially in registration order for each tick; a failing
/// handler is logged and must not prevent the others from running.
#[async_trait]
pub trait TickHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, tick: &NormalizedTick) -> Result<()>;
}
