//! WebSocket adapter and log stream server.
//!
//! Every client connection gets its own write queue. A request's reply goes
//! to the queue of the connection it came from, while everything the router
//! sends to the websocket source is copied to all connected clients.
//!
//! Clients may send CBOR in binary frames or JSON in text frames. The bridge
//! always answers with CBOR binary frames.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use futures::{SinkExt, StreamExt};
use hemma_bridge_framework::{Inbound, Message, ReplyChannel, SourceEndpoint};
use hemma_common::{Format, LogStream, decode, encode};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Name of the websocket source.
pub const SOURCE_NAME: &str = "websocket";

/// Log targets kept off the log stream, so streaming never logs about itself.
pub const LOG_STREAM_EXCLUDED_TARGETS: &[&str] =
    &["hemma_bridge::websocket", "tokio_tungstenite", "tungstenite"];

/// Write queues of the open connections.
#[derive(Debug, Clone, Default)]
struct Clients {
    queues: Arc<Mutex<HashMap<u64, mpsc::Sender<Message>>>>,
    next_id: Arc<AtomicU64>,
}

impl Clients {
    fn register(&self, queue: mpsc::Sender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, queue);
        id
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Queue `message` on every connection.
    fn broadcast(&self, message: &Message) {
        let queues: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, queue)| (*id, queue.clone()))
            .collect();

        for (id, queue) in queues {
            if let Err(mpsc::error::TrySendError::Full(_)) = queue.try_send(message.clone()) {
                warn!(client = id, "Client queue full, message dropped");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, mpsc::Sender<Message>>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// WebSocket server feeding one router source.
pub struct WebSocketServer {
    listener: TcpListener,
    clients: Clients,
    queue_capacity: usize,
}

impl WebSocketServer {
    /// Bind the server. `queue_capacity` bounds each connection's write queue.
    pub async fn bind(address: &str, queue_capacity: usize) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to bind websocket server to {}", address))?;

        Ok(Self {
            listener,
            clients: Clients::default(),
            queue_capacity,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections and relay messages until shutdown.
    pub async fn serve(self, endpoint: SourceEndpoint, shutdown: CancellationToken) {
        let SourceEndpoint {
            inbound,
            mut outbound,
            ..
        } = endpoint;

        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "WebSocket server listening");
        }

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(message) = outbound.recv() => self.clients.broadcast(&message),
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let connection = Connection {
                            clients: self.clients.clone(),
                            inbound: inbound.clone(),
                            queue_capacity: self.queue_capacity,
                            addr,
                        };
                        connections.spawn(connection.run(stream, shutdown.clone()));
                    }
                    Err(e) => warn!(error = %e, "WebSocket accept failed"),
                },
            }
        }

        connections.shutdown().await;
        debug!("WebSocket server stopped");
    }
}

/// State of one client connection.
struct Connection {
    clients: Clients,
    inbound: mpsc::Sender<Inbound>,
    queue_capacity: usize,
    addr: SocketAddr,
}

impl Connection {
    async fn run(self, stream: TcpStream, shutdown: CancellationToken) {
        let socket = match accept_async(stream).await {
            Ok(socket) => socket,
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "WebSocket handshake failed");
                return;
            }
        };

        let (queue, mut pending) = mpsc::channel(self.queue_capacity);
        let id = self.clients.register(queue.clone());
        let reply = ReplyChannel::new(queue);
        info!(addr = %self.addr, client = id, "Client connected");

        let (mut sink, mut frames) = socket.split();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(message) = pending.recv() => {
                    let bytes = match encode(&message, Format::Cbor) {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!(client = id, error = %e, "Failed to encode message");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Frame::Binary(bytes)).await {
                        debug!(client = id, error = %e, "Write failed");
                        break;
                    }
                }
                frame = frames.next() => match frame {
                    Some(Ok(frame)) => {
                        if frame.is_close() {
                            break;
                        }
                        let Some(message) = decode_frame(id, frame) else {
                            continue;
                        };
                        if self.inbound.send(Inbound::new(message, reply.clone())).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(client = id, error = %e, "Read failed");
                        break;
                    }
                    None => break,
                },
            }
        }

        self.clients.remove(id);
        info!(addr = %self.addr, client = id, "Client disconnected");
    }
}

/// Decode a client frame. Binary frames carry CBOR and text frames JSON.
fn decode_frame(client: u64, frame: Frame) -> Option<Message> {
    let decoded = match frame {
        Frame::Binary(data) => decode::<Message>(&data, Format::Cbor),
        Frame::Text(text) => decode::<Message>(text.as_bytes(), Format::Json),
        _ => return None,
    };

    match decoded {
        Ok(message) => {
            debug!(client, kind = %message.kind(), "Client message received");
            Some(message)
        }
        Err(e) => {
            warn!(client, error = %e, "Undecodable frame skipped");
            None
        }
    }
}

/// Serve log lines from `stream` as text frames to every client of
/// `listener`. Client frames are ignored.
pub async fn serve_log_stream(listener: TcpListener, stream: LogStream, shutdown: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Log stream listening");
    }

    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((socket, addr)) => {
                    connections.spawn(stream_logs(socket, addr, stream.subscribe(), shutdown.clone()));
                }
                Err(e) => warn!(error = %e, "Log stream accept failed"),
            },
        }
    }

    connections.shutdown().await;
}

async fn stream_logs(
    socket: TcpStream,
    addr: SocketAddr,
    mut lines: broadcast::Receiver<String>,
    shutdown: CancellationToken,
) {
    let socket = match accept_async(socket).await {
        Ok(socket) => socket,
        Err(e) => {
            debug!(%addr, error = %e, "Log stream handshake failed");
            return;
        }
    };
    debug!(%addr, "Log stream client connected");

    let (mut sink, mut frames) = socket.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.recv() => match line {
                Ok(line) => {
                    if sink.send(Frame::Text(line)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(%addr, skipped, "Log stream client lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = frames.next() => match frame {
                Some(Ok(frame)) if !frame.is_close() => {}
                _ => break,
            },
        }
    }

    debug!(%addr, "Log stream client disconnected");
}
