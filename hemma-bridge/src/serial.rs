//! Serial device adapter.
//!
//! The device writes a stream of self-delimiting CBOR maps. Messages sent to
//! it are framed with a 2-byte little-endian length header. Any I/O error on
//! the device is fatal to the bridge.

use anyhow::{Context, bail};
use hemma_bridge_framework::{BridgeError, Inbound, Message, ReplyChannel, SourceEndpoint};
use hemma_common::{FrameDecoder, encode_frame};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::SerialStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;

/// Name of the serial source.
pub const SOURCE_NAME: &str = "serial";

/// The last serial port the system reports, if any.
pub fn default_device() -> Option<String> {
    tokio_serial::available_ports()
        .ok()?
        .into_iter()
        .last()
        .map(|port| port.port_name)
}

/// Open the configured device, falling back to [`default_device`].
pub fn open(config: &SerialConfig) -> anyhow::Result<SerialStream> {
    let device = match &config.device {
        Some(device) => device.clone(),
        None => default_device().context("No serial device configured and none detected")?,
    };

    let builder = tokio_serial::new(&device, config.baud_rate);
    let stream = SerialStream::open(&builder)
        .with_context(|| format!("Failed to open serial device {}", device))?;

    info!(device = %device, baud_rate = config.baud_rate, "Serial device opened");
    Ok(stream)
}

/// Relay messages between `io` and the router until shutdown.
///
/// Returns [`BridgeError::Transport`] when the device fails or goes away.
pub async fn run<T>(
    io: T,
    endpoint: SourceEndpoint,
    read_buffer_size: usize,
    shutdown: CancellationToken,
) -> hemma_bridge_framework::Result<()>
where
    T: AsyncRead + AsyncWrite + Send,
{
    let (reader, writer) = tokio::io::split(io);
    let reply = endpoint.outbound_reply();
    let SourceEndpoint {
        inbound, outbound, ..
    } = endpoint;

    tokio::try_join!(
        read_device(reader, inbound, reply, read_buffer_size, &shutdown),
        write_device(writer, outbound, &shutdown),
    )
    .map_err(|e| BridgeError::transport(SOURCE_NAME, format!("{:#}", e)))?;

    debug!("Serial adapter stopped");
    Ok(())
}

async fn read_device<R>(
    mut reader: R,
    inbound: mpsc::Sender<Inbound>,
    reply: ReplyChannel,
    read_buffer_size: usize,
    shutdown: &CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buffer = vec![0u8; read_buffer_size];

    loop {
        let read = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            read = reader.read(&mut buffer) => read.context("Serial read failed")?,
        };
        if read == 0 {
            bail!("Serial device closed");
        }

        decoder.extend(&buffer[..read]);
        while let Some(message) = decoder.next_message() {
            debug!(kind = %message.kind(), "Serial message received");
            if inbound
                .send(Inbound::new(message, reply.clone()))
                .await
                .is_err()
            {
                return Ok(());
            }
        }
    }
}

async fn write_device<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<Message>,
    shutdown: &CancellationToken,
) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            message = outbound.recv() => match message {
                Some(message) => message,
                None => return Ok(()),
            },
        };

        let frame = match encode_frame(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping message that cannot be framed");
                continue;
            }
        };

        writer
            .write_all(&frame)
            .await
            .context("Serial write failed")?;
        writer.flush().await.context("Serial flush failed")?;
        debug!(bytes = frame.len(), "Serial message sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemma_bridge_framework::{Router, RouterConfig, Source};
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    fn msg(value: serde_json::Value) -> Message {
        serde_json::from_value(value).unwrap()
    }

    fn cbor(message: &Message) -> Vec<u8> {
        let mut bytes = Vec::new();
        ciborium::into_writer(message, &mut bytes).unwrap();
        bytes
    }

    async fn read_frame(device: &mut DuplexStream) -> Message {
        let mut header = [0u8; 2];
        device.read_exact(&mut header).await.unwrap();
        let mut payload = vec![0u8; u16::from_le_bytes(header) as usize];
        device.read_exact(&mut payload).await.unwrap();
        ciborium::from_reader(payload.as_slice()).unwrap()
    }

    struct Bench {
        device: DuplexStream,
        peer: SourceEndpoint,
        shutdown: CancellationToken,
        adapter: tokio::task::JoinHandle<hemma_bridge_framework::Result<()>>,
    }

    /// A serial adapter on an in-memory pipe, routed to one other source.
    fn bench() -> Bench {
        let config = RouterConfig::default();
        let (serial, serial_endpoint) = Source::channel(SOURCE_NAME, 16);
        let (peer, peer_endpoint) = Source::channel("peer", 16);
        let shutdown = CancellationToken::new();

        tokio::spawn(Router::new(vec![serial, peer], &config).run(shutdown.clone()));

        let (device, port) = tokio::io::duplex(1024);
        let adapter = tokio::spawn(run(port, serial_endpoint, 64, shutdown.clone()));

        Bench {
            device,
            peer: peer_endpoint,
            shutdown,
            adapter,
        }
    }

    #[tokio::test]
    async fn test_device_broadcast_reaches_peer() {
        let mut bench = bench();

        let event = msg(json!({"data": ["motion", 17, {"zone": 2}]}));
        bench.device.write_all(&cbor(&event)).await.unwrap();

        assert_eq!(
            bench.peer.outbound.recv().await.unwrap(),
            msg(json!({"name": "motion", "time": 17, "data": {"zone": 2}}))
        );

        bench.shutdown.cancel();
        bench.adapter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_split_and_batched_items() {
        let mut bench = bench();

        let mut bytes = cbor(&msg(json!({"data": 1})));
        bytes.extend(cbor(&msg(json!({"data": 2}))));
        let (head, tail) = bytes.split_at(3);

        bench.device.write_all(head).await.unwrap();
        tokio::task::yield_now().await;
        bench.device.write_all(tail).await.unwrap();

        assert_eq!(bench.peer.outbound.recv().await.unwrap(), msg(json!({"data": 1})));
        assert_eq!(bench.peer.outbound.recv().await.unwrap(), msg(json!({"data": 2})));

        bench.shutdown.cancel();
        bench.adapter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_peer_request_is_framed_and_answered() {
        let mut bench = bench();

        let (tx, mut replies) = mpsc::channel(4);
        assert!(
            bench
                .peer
                .submit(msg(json!({"name": "get", "id": 42})), ReplyChannel::new(tx))
                .await
        );

        let forwarded = read_frame(&mut bench.device).await;
        assert_eq!(forwarded.name(), Some("get"));
        let correlation_id = forwarded.id_u64().unwrap();

        let answer = msg(json!({"id": correlation_id, "data": "on"}));
        bench.device.write_all(&cbor(&answer)).await.unwrap();

        assert_eq!(
            replies.recv().await.unwrap(),
            msg(json!({"id": 42, "data": "on"}))
        );

        bench.shutdown.cancel();
        bench.adapter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_missing_id_is_answered_over_serial() {
        let mut bench = bench();

        bench
            .device
            .write_all(&cbor(&msg(json!({"name": "get"}))))
            .await
            .unwrap();

        assert_eq!(
            read_frame(&mut bench.device).await,
            msg(json!({"error": "Missing id", "name": "get"}))
        );

        bench.shutdown.cancel();
        bench.adapter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_garbage_does_not_stop_the_adapter() {
        let mut bench = bench();

        bench.device.write_all(&[0xff, 0xff]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        bench
            .device
            .write_all(&cbor(&msg(json!({"data": "ok"}))))
            .await
            .unwrap();

        assert_eq!(bench.peer.outbound.recv().await.unwrap(), msg(json!({"data": "ok"})));

        bench.shutdown.cancel();
        bench.adapter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_device_loss_ends_with_transport_error() {
        let bench = bench();
        let shutdown = bench.shutdown.clone();

        drop(bench.device);

        let result = bench.adapter.await.unwrap();
        assert!(matches!(
            result,
            Err(BridgeError::Transport { ref transport, .. }) if transport == SOURCE_NAME
        ));
        // Shutting the bridge down is left to whoever supervises the adapter.
        assert!(!shutdown.is_cancelled());
        shutdown.cancel();
    }
}
