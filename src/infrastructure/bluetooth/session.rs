//! Characteristic Session
//!
//! Owns the live data channel to the target sensor. A supervising loop tracks
//! the registry's target device, resolves the telemetry characteristic,
//! enables notifications when the device allows it and polls with uncached
//! reads regardless; a separate notification path decodes pushed values the
//! moment they arrive. Both paths converge on the same publish routine, so
//! consumers must not assume frames come from only one of them.

use crate::domain::models::{BridgeEvent, FrameEnvelope, PeripheralRecord};
use crate::domain::protocol::{self, FRAME_LEN};
use crate::domain::registry::DeviceRegistry;
use crate::infrastructure::bluetooth::host::{BleHost, GattLink};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// Backoff applied while idle, after failed resolution and after read errors
    pub retry_delay: Duration,
}

/// Lifecycle of the session. No terminal state; the session runs until the
/// bridge is disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No target device in the registry
    Idle,
    /// Target present, characteristic not yet bound
    Resolving,
    /// Characteristic bound; polling, and subscribed when possible
    Active,
}

pub struct CharacteristicSession {
    host: Arc<dyn BleHost>,
    registry: Arc<DeviceRegistry>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    frames: broadcast::Sender<FrameEnvelope>,
    config: SessionConfig,
    stop: watch::Receiver<bool>,
    state: SessionState,
    link: Option<Arc<dyn GattLink>>,
    subscribed: bool,
}

impl CharacteristicSession {
    pub fn spawn(
        host: Arc<dyn BleHost>,
        registry: Arc<DeviceRegistry>,
        events: mpsc::UnboundedSender<BridgeEvent>,
        frames: broadcast::Sender<FrameEnvelope>,
        config: SessionConfig,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let session = Self {
            host,
            registry,
            events,
            frames,
            config,
            stop,
            state: SessionState::Idle,
            link: None,
            subscribed: false,
        };
        tokio::spawn(session.run())
    }

    async fn run(mut self) {
        let (notify_tx, mut notify_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        // Notification path: decode immediately, independent of the poll tick.
        let events = self.events.clone();
        let frames = self.frames.clone();
        let notify_task = tokio::spawn(async move {
            while let Some(bytes) = notify_rx.recv().await {
                publish_frame(&bytes, &events, &frames);
            }
        });

        info!("characteristic session started");
        while !*self.stop.borrow() {
            self.tick(&notify_tx).await;
        }

        self.release().await;
        drop(notify_tx);
        let _ = notify_task.await;
        info!("characteristic session stopped");
    }

    /// One supervising-loop iteration. Every branch either completes a read
    /// or suspends on a backoff, so the loop never busy-spins.
    async fn tick(&mut self, notify_tx: &mpsc::UnboundedSender<Vec<u8>>) {
        match self.registry.current_target() {
            None => {
                if self.state != SessionState::Idle {
                    info!("target device lost, session back to idle");
                    self.release().await;
                }
                self.backoff().await;
            }
            Some(target) => {
                if self.link.is_none() {
                    self.state = SessionState::Resolving;
                    if let Err(message) = self.resolve(&target, notify_tx).await {
                        self.report(message);
                        self.backoff().await;
                        return;
                    }
                    self.state = SessionState::Active;
                    info!(device = %target.name, "telemetry channel active");
                }

                let Some(link) = self.link.clone() else {
                    self.backoff().await;
                    return;
                };
                match link.read_uncached().await {
                    Ok(bytes) => publish_frame(&bytes, &self.events, &self.frames),
                    Err(e) => {
                        // Transient read errors do not change session state
                        self.report(format!("characteristic read failed: {e}"));
                        self.backoff().await;
                    }
                }
            }
        }
    }

    /// Bind the telemetry characteristic and try to enable notifications.
    /// A refused subscription degrades to poll-only operation.
    async fn resolve(
        &mut self,
        target: &PeripheralRecord,
        notify_tx: &mpsc::UnboundedSender<Vec<u8>>,
    ) -> Result<(), String> {
        debug!(device = %target.name, "resolving telemetry characteristic");
        let link = self
            .host
            .open_characteristic(
                &target.id,
                self.config.service_uuid,
                self.config.characteristic_uuid,
            )
            .await
            .map_err(|e| format!("characteristic resolution failed: {e}"))?;

        match link.subscribe(notify_tx.clone()).await {
            Ok(()) => {
                self.subscribed = true;
                debug!("value-change notifications enabled");
            }
            Err(e) => {
                self.subscribed = false;
                self.report(format!(
                    "enabling notifications failed ({e}), continuing in poll-only mode"
                ));
            }
        }

        self.link = Some(link);
        Ok(())
    }

    /// Release the bound characteristic, making the session restartable.
    async fn release(&mut self) {
        if let Some(link) = self.link.take() {
            if self.subscribed {
                if let Err(e) = link.unsubscribe().await {
                    warn!("failed to release notification subscription: {e}");
                }
            }
        }
        self.subscribed = false;
        self.state = SessionState::Idle;
    }

    /// Suspend for the retry delay, waking early on the stop signal.
    async fn backoff(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.retry_delay) => {}
            _ = self.stop.changed() => {}
        }
    }

    fn report(&self, message: String) {
        warn!("{message}");
        let _ = self.events.send(BridgeEvent::Error(message));
    }
}

/// Decode one raw read or notification and publish it on both outputs.
/// Shared by the poll loop and the notification path.
pub(crate) fn publish_frame(
    bytes: &[u8],
    events: &mpsc::UnboundedSender<BridgeEvent>,
    frames: &broadcast::Sender<FrameEnvelope>,
) {
    match protocol::decode(bytes) {
        Ok(sample) => {
            let mut raw = [0u8; FRAME_LEN];
            raw.copy_from_slice(bytes);
            trace!(?raw, "frame decoded");
            let _ = events.send(BridgeEvent::FrameReady { raw, sample });
            // No pipe subscriber connected is not an error
            let _ = frames.send(FrameEnvelope {
                captured_at: SystemTime::now(),
                raw,
                sample,
            });
        }
        Err(e) => {
            let _ = events.send(BridgeEvent::Error(format!("frame decode failed: {e}")));
        }
    }
}
