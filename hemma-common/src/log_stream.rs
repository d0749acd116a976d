//! Live log fan-out.
//!
//! [`LogStream`] is a `tracing_subscriber` writer that publishes every
//! formatted log line on a broadcast channel, so a debug server can relay
//! them to remote clients.

use std::io;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;

/// Default number of lines buffered for slow subscribers.
pub const DEFAULT_LOG_STREAM_CAPACITY: usize = 1024;

/// Broadcast sink for formatted log lines.
#[derive(Debug, Clone)]
pub struct LogStream {
    sender: broadcast::Sender<String>,
    excluded_targets: Arc<Vec<String>>,
}

impl LogStream {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            excluded_targets: Arc::new(Vec::new()),
        }
    }

    /// Never stream events whose target starts with `prefix`.
    ///
    /// The component that relays the stream must exclude its own events,
    /// otherwise every relayed line would produce another one.
    pub fn excluding(mut self, prefix: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.excluded_targets).push(prefix.into());
        self
    }

    /// Whether events from `target` are streamed.
    pub fn accepts(&self, target: &str) -> bool {
        !self
            .excluded_targets
            .iter()
            .any(|prefix| target.starts_with(prefix.as_str()))
    }

    /// Subscribe to lines logged from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Publish a line directly.
    pub fn publish(&self, line: impl Into<String>) {
        // No subscribers is the normal idle state.
        let _ = self.sender.send(line.into());
    }
}

impl Default for LogStream {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_STREAM_CAPACITY)
    }
}

/// Writer handed out per log event.
pub struct LogStreamWriter {
    stream: LogStream,
}

impl io::Write for LogStreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stream.sender.receiver_count() > 0 {
            let line = String::from_utf8_lossy(buf);
            self.stream.publish(line.trim_end());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogStream {
    type Writer = LogStreamWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogStreamWriter {
            stream: self.clone(),
        }
    }
}
