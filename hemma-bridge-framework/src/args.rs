//! CLI argument parsing for bridges.

use std::path::PathBuf;

use clap::Args;

use crate::LoggingConfig;

/// Common CLI arguments, flattened into the bridge binary's own parser.
#[derive(Args, Debug, Clone, Default)]
pub struct BridgeArgs {
    /// Path to a JSON5 configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Shorthand for `--log-level debug`.
    #[arg(short, long)]
    pub debug: bool,
}

impl BridgeArgs {
    /// Apply the CLI overrides to the configured logging settings.
    ///
    /// An explicit `--log-level` wins over `--debug`.
    pub fn effective_logging(&self, configured: &LoggingConfig) -> LoggingConfig {
        let mut logging = configured.clone();
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        } else if self.debug {
            logging.level = "debug".to_string();
        }
        logging
    }
}
