pub mod data;
pub mod engine;
pub mod errors;
pub mod models;
pub mod utils;

use tracing::info;
use tracing_subscriber::EnvFilter;

pub use engine::backfill::TickSource;
pub use engine::pass::{PassOutcome, PassReport, SkipReason, TrendlineEngine};
pub use errors::EngineError;
pub use models::candle::{Bar, Tick};
pub use models::config::EngineConfig;
pub use models::intent::RenderIntent;
pub use models::signal::{SignalDirection, WickRange};

/// Install the global `tracing` subscriber, filtered by `RUST_LOG` (default
/// `info`). Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .is_ok();

    if installed {
        info!("RSI trendline engine v{}", env!("CARGO_PKG_VERSION"));
    }
}
