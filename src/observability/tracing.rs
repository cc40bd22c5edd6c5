use tracing::Span;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// One logical scope per consumed tick; handler logs nest under it.
pub fn tick_span(exchange: &str, symbol: &str) -> Span {
    tracing::debug_span!("tick", exchange = %exchange, symbol = %symbol)
}
