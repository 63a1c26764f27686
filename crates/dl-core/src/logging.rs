//! Logging initialization.

use std::sync::Once;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable logs on stderr.
    #[default]
    Pretty,
    /// One JSON object per line on stderr.
    Json,
}

/// Default filter directive for the CLI verbosity flags.
pub fn default_level(debug: bool, verbose: bool) -> &'static str {
    if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `level`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging(format: LogFormat, level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let registry = tracing_subscriber::registry().with(filter);
        let result = match format {
            LogFormat::Json => registry
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init(),
            LogFormat::Pretty => registry
                .with(fmt::layer().with_writer(std::io::stderr))
                .try_init(),
        };
        if let Err(e) = result {
            eprintln!("logging already initialized: {e}");
        }
    });
}
