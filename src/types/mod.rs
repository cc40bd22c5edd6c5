pub mod alert;
pub mod candle;
pub mod instrument;
pub mod status;
pub mod tick;

pub use alert::{AlertHistory, AlertRule, NewAlertRule, RuleKind};
pub use candle::{Candle, CandleInterval, CandleKey};
pub use instrument::Instrument;
pub use status::ExchangeStatus;
pub use tick::{NormalizedTick, RawTick, SourceType};
