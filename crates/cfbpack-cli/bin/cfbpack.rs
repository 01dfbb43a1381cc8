//! cfbpack binary entry point.
//!
//! This is a thin wrapper around the cfbpack-cli library that:
//! 1. Initializes logging
//! 2. Parses command-line arguments
//! 3. Validates configuration
//! 4. Runs the requested command

use anyhow::Result;
use cfbpack_cli::{CliConfig, run};

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = CliConfig::from_args();
    tracing::debug!(
        "Configuration loaded: sector_size={}, max_size={}, command={:?}",
        config.sector_size,
        config.max_size,
        config.command
    );

    config.validate()?;
    run(&config)
}
