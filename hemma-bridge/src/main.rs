//! Hemma bridge.
//!
//! Connects a serial-attached Hemma controller to websocket clients and
//! relays requests, replies and broadcasts between them.

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use hemma_bridge::announce::{self, Announcement};
use hemma_bridge::cli::Cli;
use hemma_bridge::config::HemmaBridgeConfig;
use hemma_bridge::serial;
use hemma_bridge::websocket::{self, LOG_STREAM_EXCLUDED_TARGETS, WebSocketServer};
use hemma_bridge_framework::{BridgeConfig, BridgeRunner, Router, Source};
use hemma_common::LogStream;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration, then let the command line override it
    let mut config = HemmaBridgeConfig::load_or_default(cli.bridge.config.as_deref())?;
    config.apply_cli(&cli);
    config.validate_config()?;

    let log_stream = config.websocket.log_stream.then(|| {
        LOG_STREAM_EXCLUDED_TARGETS
            .iter()
            .fold(LogStream::default(), |stream, target| stream.excluding(*target))
    });

    // Create the bridge runner
    let mut runner =
        BridgeRunner::new_with_args("hemma-bridge", config, Some(&cli.bridge), log_stream.clone())?;
    let config = runner.config().clone();
    let name = config.resolved_name();
    tracing::info!(name = %name, "Bridge identity");

    // Open both transports before anything starts running
    let capacity = config.router.channel_capacity;
    let (serial_source, serial_endpoint) = Source::channel(serial::SOURCE_NAME, capacity);
    let (websocket_source, websocket_endpoint) = Source::channel(websocket::SOURCE_NAME, capacity);

    let device = serial::open(&config.serial)?;
    let server = WebSocketServer::bind(&config.websocket.address(), capacity).await?;

    if let Some(stream) = log_stream {
        let address = config
            .websocket
            .log_stream_address()
            .context("No port left for the log stream")?;
        let listener = TcpListener::bind(&address)
            .await
            .with_context(|| format!("Failed to bind log stream to {}", address))?;
        let shutdown = runner.shutdown_token();
        runner.spawn(websocket::serve_log_stream(listener, stream, shutdown));
    }

    let shutdown = runner.shutdown_token();
    let router = Router::new(vec![serial_source, websocket_source], &config.router);
    runner.spawn(router.run(shutdown.clone()));
    runner.spawn_critical(
        "serial device",
        serial::run(
            device,
            serial_endpoint,
            config.serial.read_buffer_size,
            shutdown.clone(),
        ),
    );
    runner.spawn(server.serve(websocket_endpoint, shutdown.clone()));

    if config.announce.enabled {
        match Announcement::register(&name, &config.announce.domain, config.websocket.port) {
            Ok(announcement) => runner.spawn(announce::run(announcement, shutdown)),
            Err(e) => tracing::warn!(error = %format!("{:#}", e), "Service not announced"),
        }
    }

    // Run until Ctrl+C or a fatal serial error
    runner.run().await?;
    Ok(())
}
