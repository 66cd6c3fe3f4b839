//! Subscriber setup for binaries and demos.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Environment variable holding filter directives, e.g. `calcgraph=trace`.
pub const LOG_ENV: &str = "CALCGRAPH_LOG";

/// Installs a global subscriber writing to stderr, with progress bars for
/// running executions. `verbose` raises the default level from INFO to DEBUG
/// (1) or TRACE (2 and above); directives in [`LOG_ENV`] take precedence.
pub fn init_logging(verbose: u8) -> Result<(), TryInitError> {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .with_env_var(LOG_ENV)
        .from_env_lossy();

    let indicatif = IndicatifLayer::new();
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(indicatif.get_stderr_writer())
        .with_ansi(true)
        .without_time();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt)
        .with(indicatif)
        .try_init()
}
