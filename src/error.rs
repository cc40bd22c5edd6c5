use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Pipeline Errors
    #[error("pipeline already started")]
    PipelineAlreadyStarted,

    #[error("pipeline not started")]
    PipelineNotStarted,

    #[error("handler registered after pipeline start")]
    HandlerRegisteredAfterStart,

    #[error("pipeline queue closed")]
    QueueClosed,

    // Adapter Errors
    #[error("adapter {0} is not idle")]
    AdapterNotIdle(String),

    #[error("adapter {0} is not running")]
    AdapterNotRunning(String),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("feed decode error: {0}")]
    FeedDecode(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    // Dedup Backend Errors
    #[error("dedup backend unavailable: {0}")]
    DedupBackend(String),

    // Persistence Errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("instrument not found: {symbol}@{exchange}")]
    InstrumentNotFound { symbol: String, exchange: String },

    #[error("alert rule not found: {0}")]
    AlertRuleNotFound(i64),

    // Notification Errors
    #[error("notification channel io error: {0}")]
    ChannelIo(#[from] std::io::Error),

    // Data Errors
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    #[error("invalid volume: {0}")]
    InvalidVolume(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Configuration Errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown rule kind: {0}")]
    UnknownRuleKind(String),

    #[error("unknown channel type: {0}")]
    UnknownChannelType(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::DedupBackend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
