//! Hemma Common Library
//!
//! This crate provides shared types and utilities for the Hemma bridge:
//!
//! - [`message`] - The schema-less bus message (`Message`, `MessageKind`)
//! - [`serialization`] - JSON/CBOR encoding and decoding
//! - [`frame`] - Serial line framing
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`log_stream`] - Live log fan-out for remote debugging
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod frame;
pub mod log_stream;
pub mod message;
pub mod serialization;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use frame::{FrameDecoder, encode_frame};
pub use log_stream::LogStream;
pub use message::{Message, MessageKind};
pub use serialization::{Format, decode, encode};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// When a [`LogStream`] is given, every line is also published on it as
/// plain text, minus the targets the stream excludes.
///
/// # Example
///
/// ```ignore
/// use hemma_common::{LoggingConfig, LogFormat, init_tracing};
///
/// let config = LoggingConfig {
///     level: "info".to_string(),
///     format: LogFormat::Json,
/// };
/// init_tracing(&config, None)?;
/// ```
pub fn init_tracing(config: &LoggingConfig, log_stream: Option<LogStream>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, filter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stream_layer = log_stream.map(|stream| {
        let targets = stream.clone();
        fmt::layer()
            .with_ansi(false)
            .with_writer(stream)
            .with_filter(filter::filter_fn(move |metadata| {
                targets.accepts(metadata.target())
            }))
    });

    let registry = tracing_subscriber::registry().with(stream_layer);

    match config.format {
        LogFormat::Text => {
            registry
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            registry
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
