//! tracing-subscriber setup. Logs go to stderr; stdout carries the report.

use tracing_subscriber::EnvFilter;

use crate::commands::LogFormatArg;
use crate::config::Verbosity;
use crate::error::{CliError, CliResult};

/// Build the filter: `RUST_LOG` wins, otherwise the verbosity level
#[must_use]
pub fn filter_for(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.log_filter()))
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns error if a global subscriber is already installed
pub fn init(verbosity: Verbosity, format: LogFormatArg) -> CliResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter_for(verbosity))
        .with_writer(std::io::stderr)
        .with_target(false);

    let installed = match format {
        LogFormatArg::Text => builder.try_init(),
        LogFormatArg::Json => builder.json().try_init(),
    };
    installed.map_err(|e| CliError::config(format!("failed to initialize logging: {e}")))
}
