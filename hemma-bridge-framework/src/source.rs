//! The contract between transport adapters and the router.
//!
//! A [`Source`] is the router's view of one transport: an inbound stream of
//! [`Inbound`] items (a message plus the [`ReplyChannel`] its answer goes
//! to) and an outbound sink of messages. The adapter holds the other end,
//! a [`SourceEndpoint`], and owns the transport's lifecycle.

use hemma_common::Message;
use tokio::sync::mpsc;

/// A decoded message and where its reply should go.
#[derive(Debug)]
pub struct Inbound {
    pub message: Message,
    pub reply: ReplyChannel,
}

impl Inbound {
    pub fn new(message: Message, reply: ReplyChannel) -> Self {
        Self { message, reply }
    }
}

/// Destination for the response to one inbound message.
#[derive(Debug, Clone)]
pub struct ReplyChannel {
    sender: mpsc::Sender<Message>,
}

impl ReplyChannel {
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Push a reply. Returns `false` when the receiving side is gone.
    pub async fn send(&self, message: Message) -> bool {
        self.sender.send(message).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Router-side half of a transport.
#[derive(Debug)]
pub struct Source {
    name: String,
    incoming: mpsc::Receiver<Inbound>,
    outgoing: mpsc::Sender<Message>,
}

impl Source {
    pub fn new(
        name: impl Into<String>,
        incoming: mpsc::Receiver<Inbound>,
        outgoing: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            name: name.into(),
            incoming,
            outgoing,
        }
    }

    /// Create a source together with the endpoint its adapter drives.
    ///
    /// Both directions are bounded by `capacity`, so a slow transport
    /// applies backpressure to whoever writes to it.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Source, SourceEndpoint) {
        let name = name.into();
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let source = Source::new(name.clone(), inbound_rx, outbound_tx.clone());
        let endpoint = SourceEndpoint {
            name,
            inbound: inbound_tx,
            outbound: outbound_rx,
            loopback: ReplyChannel::new(outbound_tx),
        };

        (source, endpoint)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn into_parts(self) -> (String, mpsc::Receiver<Inbound>, mpsc::Sender<Message>) {
        (self.name, self.incoming, self.outgoing)
    }
}

/// Adapter-side half of a transport.
#[derive(Debug)]
pub struct SourceEndpoint {
    /// Name shared with the router-side [`Source`].
    pub name: String,
    /// Decoded messages headed for the router.
    pub inbound: mpsc::Sender<Inbound>,
    /// Messages the router wants written to the transport.
    pub outbound: mpsc::Receiver<Message>,
    loopback: ReplyChannel,
}

impl SourceEndpoint {
    /// Reply channel that writes back into this endpoint's own outbound
    /// stream, for transports with a single peer.
    pub fn outbound_reply(&self) -> ReplyChannel {
        self.loopback.clone()
    }

    /// Hand a decoded message to the router. Returns `false` when the
    /// router has stopped.
    pub async fn submit(&self, message: Message, reply: ReplyChannel) -> bool {
        self.inbound.send(Inbound::new(message, reply)).await.is_ok()
    }
}
