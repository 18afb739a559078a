//! Tracing setup for the command-line binary.

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "TRIAGE_LOG";

/// Initialize the logging system.
///
/// Log level is controlled via the `TRIAGE_LOG` environment variable using
/// `EnvFilter` syntax, e.g. `TRIAGE_LOG=debug` or
/// `TRIAGE_LOG=analysis_service=debug,batch_db=info`. Defaults to `info`.
/// Logs go to stderr so command output on stdout stays machine-readable.
pub fn init() -> Result<()> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
