//! Bridge coordinator
//!
//! Wires the device watcher, characteristic session and pipe server together
//! and exposes the whole pipeline behind one handle. The caller consumes the
//! returned event channel; the bridge itself never renders anything.

use crate::domain::models::{BridgeEvent, PeripheralRecord};
use crate::domain::registry::DeviceRegistry;
use crate::domain::settings::BridgeSettings;
use crate::infrastructure::bluetooth::host::BleHost;
use crate::infrastructure::bluetooth::session::{CharacteristicSession, SessionConfig};
use crate::infrastructure::bluetooth::watcher::DeviceWatcher;
use crate::infrastructure::pipe::PipeServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Depth of the frame feed between the session and the pipe server. A slow
/// subscriber drops old frames rather than stalling the sensor pipeline.
const FRAME_FEED_DEPTH: usize = 256;

pub struct ImuBridge {
    registry: Arc<DeviceRegistry>,
    watcher: DeviceWatcher,
    stop: watch::Sender<bool>,
    session_task: Option<JoinHandle<()>>,
    pipe_task: Option<JoinHandle<()>>,
}

impl ImuBridge {
    /// Build the pipeline and start the session and pipe tasks. Scanning
    /// does not begin until [`start_scanning`](Self::start_scanning).
    pub fn new(
        host: Arc<dyn BleHost>,
        settings: &BridgeSettings,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, _) = broadcast::channel(FRAME_FEED_DEPTH);
        let (stop_tx, stop_rx) = watch::channel(false);

        let registry = Arc::new(DeviceRegistry::new(settings.service_uuid));
        let watcher = DeviceWatcher::new(host.clone(), registry.clone(), events_tx.clone());

        let session_task = CharacteristicSession::spawn(
            host,
            registry.clone(),
            events_tx.clone(),
            frames_tx.clone(),
            SessionConfig {
                service_uuid: settings.service_uuid,
                characteristic_uuid: settings.characteristic_uuid,
                retry_delay: Duration::from_millis(settings.session_retry_delay_ms),
            },
            stop_rx.clone(),
        );

        let pipe_task = PipeServer::new(
            settings.pipe_name.clone(),
            frames_tx,
            events_tx,
            stop_rx,
            Duration::from_millis(settings.pipe_retry_delay_ms),
        )
        .spawn();

        (
            Self {
                registry,
                watcher,
                stop: stop_tx,
                session_task: Some(session_task),
                pipe_task: Some(pipe_task),
            },
            events_rx,
        )
    }

    /// Begin watching for connected peripherals.
    pub fn start_scanning(&mut self) -> anyhow::Result<()> {
        self.watcher.start()
    }

    /// Stop watching. The registry keeps its current contents.
    pub fn stop_scanning(&mut self) {
        self.watcher.stop();
    }

    /// Snapshot of the peripherals currently known to the watcher.
    pub fn devices(&self) -> Vec<PeripheralRecord> {
        self.registry.devices()
    }

    /// Tear down the watcher, session and pipe server, releasing all
    /// platform handles. Running loops finish their current iteration.
    pub async fn dispose(mut self) {
        self.watcher.stop();
        let _ = self.stop.send(true);
        if let Some(task) = self.session_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.pipe_task.take() {
            let _ = task.await;
        }
        info!("bridge disposed");
    }
}
