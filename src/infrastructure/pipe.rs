//! Pipe Streaming Server
//!
//! Serves decoded telemetry to at most one external subscriber at a time
//! over a namespaced local socket. Every frame becomes one length-prefixed
//! message; after the subscriber goes away the accept loop re-arms itself.
//! Transient bind/accept/write failures are reported and retried, never
//! fatal to the task.

use crate::domain::models::{BridgeEvent, FrameEnvelope};
use crate::domain::protocol::FRAME_LEN;
use interprocess::local_socket::{
    tokio::{prelude::*, Listener, Stream},
    GenericNamespaced, ListenerOptions, ToNsName,
};
use std::time::{Duration, UNIX_EPOCH};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Serialized payload: i64 timestamp (µs since epoch, little-endian),
/// the raw frame, then seven f32 physical values.
pub const PAYLOAD_LEN: usize = 8 + FRAME_LEN + 7 * 4;

/// Encode one frame as it travels to the subscriber: a little-endian u32
/// length prefix followed by the fixed-layout payload. Field order and
/// widths are part of the protocol; existing subscribers parse them as-is.
pub fn encode_message(envelope: &FrameEnvelope) -> Vec<u8> {
    let micros = envelope
        .captured_at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64;

    let sample = &envelope.sample;
    let mut message = Vec::with_capacity(4 + PAYLOAD_LEN);
    message.extend_from_slice(&(PAYLOAD_LEN as u32).to_le_bytes());
    message.extend_from_slice(&micros.to_le_bytes());
    message.extend_from_slice(&envelope.raw);
    for value in [
        sample.accel_x,
        sample.accel_y,
        sample.accel_z,
        sample.quat_i,
        sample.quat_j,
        sample.quat_k,
        sample.quat_w,
    ] {
        message.extend_from_slice(&value.to_le_bytes());
    }
    message
}

pub struct PipeServer {
    name: String,
    frames: broadcast::Sender<FrameEnvelope>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    stop: watch::Receiver<bool>,
    retry_delay: Duration,
}

impl PipeServer {
    pub fn new(
        name: String,
        frames: broadcast::Sender<FrameEnvelope>,
        events: mpsc::UnboundedSender<BridgeEvent>,
        stop: watch::Receiver<bool>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            name,
            frames,
            events,
            stop,
            retry_delay,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut listener: Option<Listener> = None;

        while !*self.stop.borrow() {
            if listener.is_none() {
                match self.bind() {
                    Ok(l) => {
                        info!(pipe = %self.name, "streaming pipe listening");
                        listener = Some(l);
                    }
                    Err(e) => {
                        self.report(format!("pipe listen failed: {e}"));
                        self.backoff().await;
                        continue;
                    }
                }
            }
            let Some(bound) = listener.as_ref() else {
                continue;
            };

            tokio::select! {
                _ = self.stop.changed() => break,
                accepted = bound.accept() => match accepted {
                    Ok(stream) => {
                        info!("subscriber connected");
                        self.serve(stream).await;
                        info!("subscriber gone, pipe re-armed");
                    }
                    Err(e) => {
                        self.report(format!("pipe accept failed: {e}"));
                        self.backoff().await;
                    }
                },
            }
        }
        debug!("pipe server stopped");
    }

    fn bind(&self) -> anyhow::Result<Listener> {
        let name = self.name.as_str().to_ns_name::<GenericNamespaced>()?;
        Ok(ListenerOptions::new().name(name).create_tokio()?)
    }

    /// Forward frames to the connected subscriber until it disconnects.
    /// The subscriber never has to send anything; its receive half serves
    /// purely as the liveness signal (EOF or error means gone).
    async fn serve(&mut self, stream: Stream) {
        let mut rx = self.frames.subscribe();
        let (mut reader, mut writer) = stream.split();
        let mut probe = [0u8; 16];

        loop {
            tokio::select! {
                _ = self.stop.changed() => break,
                received = rx.recv() => match received {
                    Ok(envelope) => {
                        let message = encode_message(&envelope);
                        if let Err(e) = writer.write_all(&message).await {
                            self.report(format!("pipe write failed: {e}"));
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "subscriber too slow, dropped frames");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                liveness = reader.read(&mut probe) => match liveness {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {} // stray bytes from the subscriber are ignored
                },
            }
        }
        // Dropping rx detaches this subscriber from the frame feed
    }

    async fn backoff(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.retry_delay) => {}
            _ = self.stop.changed() => {}
        }
    }

    fn report(&self, message: String) {
        warn!("{message}");
        let _ = self.events.send(BridgeEvent::Error(message));
    }
}
