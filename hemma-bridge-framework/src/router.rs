//! The message router.
//!
//! One monitor loop per [`Source`] classifies inbound messages:
//! - requests are fanned out to every other source under a fresh
//!   correlation id, and each sink's answer (or a timeout error) is sent
//!   back to the requester;
//! - replies are handed to the [`PendingResponses`] table;
//! - broadcasts are reshaped and pushed to every other source.
//!
//! Fan-out runs as its own task so a slow sink never stalls the loop that
//! reads the requester's transport.

use std::sync::Arc;
use std::time::Duration;

use hemma_common::message::{KEY_NAME, Value};
use hemma_common::{Message, MessageKind};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::allocator::{CommandIdAllocator, CorrelationId};
use crate::config::RouterConfig;
use crate::pending::PendingResponses;
use crate::source::{Inbound, ReplyChannel, Source};

/// Outbound side of a registered source.
#[derive(Debug, Clone)]
struct Sink {
    name: Arc<str>,
    outgoing: mpsc::Sender<Message>,
}

/// State shared by every monitor loop and fan-out task.
#[derive(Debug)]
struct Shared {
    sinks: Vec<Sink>,
    allocator: CommandIdAllocator,
    pending: Arc<PendingResponses>,
    response_timeout: Duration,
}

/// Relays messages between a fixed set of sources.
#[derive(Debug)]
pub struct Router {
    sources: Vec<Source>,
    allocator: CommandIdAllocator,
    pending: Arc<PendingResponses>,
    response_timeout: Duration,
}

impl Router {
    /// Create a router over `sources`. The set cannot change afterwards.
    pub fn new(sources: Vec<Source>, config: &RouterConfig) -> Self {
        let response_timeout = config.response_timeout();
        Self {
            sources,
            allocator: CommandIdAllocator::new(),
            pending: Arc::new(PendingResponses::new(response_timeout)),
            response_timeout,
        }
    }

    /// Use `allocator` for correlation ids instead of a fresh one.
    pub fn with_allocator(mut self, allocator: CommandIdAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    /// The table of replies in flight.
    pub fn pending(&self) -> Arc<PendingResponses> {
        self.pending.clone()
    }

    /// Run every monitor loop until `shutdown` is cancelled or all sources
    /// have closed.
    ///
    /// Cancellation abandons in-flight fan-outs without notifying the
    /// requesters.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut sinks = Vec::with_capacity(self.sources.len());
        let mut streams = Vec::with_capacity(self.sources.len());

        for source in self.sources {
            let (name, incoming, outgoing) = source.into_parts();
            sinks.push(Sink {
                name: name.into(),
                outgoing,
            });
            streams.push(incoming);
        }

        info!(sources = sinks.len(), "Router started");

        let shared = Arc::new(Shared {
            sinks,
            allocator: self.allocator,
            pending: self.pending,
            response_timeout: self.response_timeout,
        });

        let mut monitors = JoinSet::new();
        for (origin, incoming) in streams.into_iter().enumerate() {
            monitors.spawn(monitor(shared.clone(), origin, incoming, shutdown.clone()));
        }

        while monitors.join_next().await.is_some() {}

        info!("Router stopped");
    }
}

async fn monitor(
    shared: Arc<Shared>,
    origin: usize,
    mut incoming: mpsc::Receiver<Inbound>,
    shutdown: CancellationToken,
) {
    let source = shared.sinks[origin].name.clone();
    debug!(source = %source, "Monitoring source");

    let mut fan_outs = JoinSet::new();

    loop {
        let inbound = tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = fan_outs.join_next(), if !fan_outs.is_empty() => continue,
            inbound = incoming.recv() => match inbound {
                Some(inbound) => inbound,
                None => {
                    info!(source = %source, "Source closed");
                    break;
                }
            },
        };

        let Inbound { message, reply } = inbound;
        trace!(source = %source, kind = %message.kind(), "Received message");

        match message.kind() {
            MessageKind::Request => {
                if let Some(request) = shared.prepare_request(&source, message, &reply).await {
                    fan_outs.spawn(shared.clone().fan_out(origin, request, reply));
                }
            }
            MessageKind::Reply => shared.handle_reply(&source, message),
            MessageKind::Broadcast => shared.broadcast(origin, message).await,
            MessageKind::Unknown => {
                debug!(source = %source, "Dropping message with no name, id or data");
            }
        }
    }

    // A closed source still lets its in-flight requests finish.
    tokio::select! {
        _ = shutdown.cancelled() => fan_outs.shutdown().await,
        _ = async { while fan_outs.join_next().await.is_some() {} } => {}
    }

    debug!(source = %source, "Monitor stopped");
}

/// A request whose id has been swapped for a correlation id.
struct Request {
    message: Message,
    original_id: Value,
    correlation_id: CorrelationId,
}

impl Shared {
    /// Check and rewrite a request. Answers requests without an id directly.
    async fn prepare_request(
        &self,
        source: &str,
        mut message: Message,
        reply: &ReplyChannel,
    ) -> Option<Request> {
        if message.id().is_none() {
            let name = message
                .get(KEY_NAME)
                .cloned()
                .unwrap_or(Value::Null);
            warn!(source = %source, name = ?message.name(), "Request without id");
            reply
                .send(Message::error("Missing id").with(KEY_NAME, name))
                .await;
            return None;
        }

        let correlation_id = self.allocator.next();
        let original_id = message
            .replace_id(u64::from(correlation_id))
            .unwrap_or(Value::Null);
        message.ensure_args();

        info!(
            source = %source,
            name = ?message.name(),
            address = ?message.address(),
            correlation_id = %correlation_id,
            "Forwarding request"
        );

        Some(Request {
            message,
            original_id,
            correlation_id,
        })
    }

    /// Forward a request to every sink except its origin and report each
    /// sink's outcome on `reply`.
    async fn fan_out(self: Arc<Self>, origin: usize, request: Request, reply: ReplyChannel) {
        let mut attempts = JoinSet::new();

        for (index, sink) in self.sinks.iter().enumerate() {
            if index == origin {
                continue;
            }
            attempts.spawn(self.clone().forward(
                sink.clone(),
                request.message.clone(),
                request.correlation_id,
                request.original_id.clone(),
                reply.clone(),
            ));
        }

        while attempts.join_next().await.is_some() {}
    }

    async fn forward(
        self: Arc<Self>,
        sink: Sink,
        message: Message,
        correlation_id: CorrelationId,
        original_id: Value,
        reply: ReplyChannel,
    ) {
        if sink.outgoing.send(message).await.is_err() {
            debug!(sink = %sink.name, "Sink closed, request not forwarded");
        }

        let response = match self
            .pending
            .await_response(correlation_id, self.response_timeout)
            .await
        {
            Some(mut response) => {
                debug!(sink = %sink.name, correlation_id = %correlation_id, "Reply received");
                response.replace_id(original_id);
                response
            }
            None => {
                info!(sink = %sink.name, correlation_id = %correlation_id, "Request timed out");
                Message::error("Timeout")
            }
        };

        if !reply.send(response).await {
            debug!(sink = %sink.name, "Requester went away before the reply");
        }
    }

    fn handle_reply(&self, source: &str, message: Message) {
        let Some(id) = message.id_u64() else {
            warn!(source = %source, id = ?message.id(), "Reply with non-integer id dropped");
            return;
        };
        let Ok(correlation_id) = CorrelationId::try_from(id) else {
            warn!(source = %source, id, "Reply with out-of-range id dropped");
            return;
        };

        if self.pending.deliver(correlation_id, message) {
            debug!(source = %source, correlation_id = %correlation_id, "Reply delivered");
        } else {
            debug!(source = %source, correlation_id = %correlation_id, "Reply has no waiter");
        }
    }

    async fn broadcast(&self, origin: usize, mut message: Message) {
        message.unpack_event();

        let source = &self.sinks[origin].name;
        debug!(source = %source, name = ?message.name(), "Broadcasting");

        for (index, sink) in self.sinks.iter().enumerate() {
            if index == origin {
                continue;
            }
            if sink.outgoing.send(message.clone()).await.is_err() {
                debug!(sink = %sink.name, "Sink closed, broadcast skipped");
            }
        }
    }
}
