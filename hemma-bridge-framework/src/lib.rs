//! Hemma Bridge Framework
//!
//! The routing core of the Hemma bridge plus the lifecycle plumbing around it.
//!
//! # Overview
//!
//! This framework provides:
//! - [`Router`], which relays requests, replies and broadcasts between
//!   [`Source`]s as if they shared one bus
//! - [`CommandIdAllocator`] and [`PendingResponses`], the correlation state
//!   behind request fan-out
//! - [`BridgeConfig`] trait for configuration loading and validation
//! - [`BridgeRunner`] for managing bridge lifecycle (startup, shutdown, signal handling)
//! - [`BridgeArgs`] for common CLI argument parsing
//!
//! # Example
//!
//! ```ignore
//! use hemma_bridge_framework::{BridgeConfig, BridgeRunner, Router, Source};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MyBridgeConfig::load_or_default(None)?;
//!     let mut runner = BridgeRunner::new("mybridge", config)?;
//!
//!     let capacity = runner.config().router().channel_capacity;
//!     let (serial, serial_endpoint) = Source::channel("serial", capacity);
//!     let (websocket, websocket_endpoint) = Source::channel("websocket", capacity);
//!
//!     // Hand the endpoints to transport adapters...
//!
//!     let router = Router::new(vec![serial, websocket], runner.config().router());
//!     runner.spawn(router.run(runner.shutdown_token()));
//!
//!     // Run until Ctrl+C
//!     runner.run().await?;
//!     Ok(())
//! }
//! ```

pub mod allocator;
mod args;
mod config;
mod error;
pub mod pending;
pub mod router;
pub mod source;
mod runner;

pub use allocator::{CORRELATION_ID_MODULUS, CommandIdAllocator, CorrelationId};
pub use args::BridgeArgs;
pub use config::{BridgeConfig, RouterConfig};
pub use error::{BridgeError, Result};
pub use pending::PendingResponses;
pub use router::Router;
pub use runner::BridgeRunner;
pub use source::{Inbound, ReplyChannel, Source, SourceEndpoint};

// Re-export commonly used types from hemma-common
pub use hemma_common::{LogFormat, LoggingConfig, Message, MessageKind};
pub use tokio_util::sync::CancellationToken;
