//! Device Watcher
//!
//! Subscribes to platform peripheral-presence notifications, filters for
//! peripherals that are actually connected, resolves their service lists and
//! maintains the [`DeviceRegistry`]. Platform callbacks arrive as messages in
//! a single ordered inbox, so the registry is never mutated concurrently from
//! callback code.

use crate::domain::models::{BridgeEvent, PeripheralRecord};
use crate::domain::registry::{DeviceRegistry, UpsertOutcome};
use crate::infrastructure::bluetooth::host::{BleHost, WatchEvent, WatchGuard};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

pub struct DeviceWatcher {
    host: Arc<dyn BleHost>,
    registry: Arc<DeviceRegistry>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    guard: Option<Box<dyn WatchGuard>>,
    task: Option<JoinHandle<()>>,
}

impl DeviceWatcher {
    pub fn new(
        host: Arc<dyn BleHost>,
        registry: Arc<DeviceRegistry>,
        events: mpsc::UnboundedSender<BridgeEvent>,
    ) -> Self {
        Self {
            host,
            registry,
            events,
            guard: None,
            task: None,
        }
    }

    /// Begin monitoring. Idempotent while already running.
    pub fn start(&mut self) -> anyhow::Result<()> {
        if self.guard.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.guard = Some(self.host.start_watch(tx)?);
        self.task = Some(tokio::spawn(watch_loop(
            self.host.clone(),
            self.registry.clone(),
            self.events.clone(),
            rx,
        )));
        info!("device watcher started");
        Ok(())
    }

    /// Detach the platform callbacks. In-flight observations already queued
    /// are still processed; the registry stays valid afterwards.
    pub fn stop(&mut self) {
        if self.guard.take().is_some() {
            info!("device watcher stopped");
        }
        // The loop task drains the closed channel and exits on its own.
        self.task.take();
    }

    pub fn is_running(&self) -> bool {
        self.guard.is_some()
    }
}

impl Drop for DeviceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn watch_loop(
    host: Arc<dyn BleHost>,
    registry: Arc<DeviceRegistry>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    mut inbox: mpsc::UnboundedReceiver<WatchEvent>,
) {
    while let Some(event) = inbox.recv().await {
        match event {
            WatchEvent::Observed { id } => {
                handle_observed(&*host, &registry, &events, id).await;
            }
            WatchEvent::Removed { id } => {
                if let Some(record) = registry.remove(&id) {
                    if record.advertises(registry.target_service()) {
                        info!(device = %record.name, "target sensor unplugged");
                    }
                    let _ = events.send(BridgeEvent::DeviceRemoved(id));
                }
            }
        }
    }
    debug!("watch inbox closed, watcher loop exiting");
}

async fn handle_observed(
    host: &dyn BleHost,
    registry: &DeviceRegistry,
    events: &mpsc::UnboundedSender<BridgeEvent>,
    id: String,
) {
    let probe = match host.probe(&id).await {
        Ok(Some(probe)) => probe,
        Ok(None) => {
            // Observed but not connected: the next periodic observation
            // supersedes this one.
            trace!(%id, "ignoring observation of non-connected peripheral");
            return;
        }
        Err(e) => {
            let _ = events.send(BridgeEvent::Error(format!("device probe failed: {e}")));
            return;
        }
    };

    if !probe.connected {
        trace!(%id, "peripheral reported disconnected, skipping");
        return;
    }

    let record = PeripheralRecord {
        id,
        name: probe.name,
        connected: true,
        services: probe.services,
    };

    if record.advertises(registry.target_service()) {
        info!(device = %record.name, "target sensor present");
    }

    let event = match registry.upsert(record.clone()) {
        UpsertOutcome::Added => BridgeEvent::DeviceAdded(record),
        UpsertOutcome::Updated => BridgeEvent::DeviceUpdated(record),
    };
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::protocol::TARGET_SERVICE_UUID;
    use crate::infrastructure::bluetooth::mock::MockHost;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<BridgeEvent>) -> BridgeEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn connected_peripheral_is_added_then_updated() {
        let host = Arc::new(MockHost::new());
        host.add_peripheral("sensor-1", "FUKY_MOUSE", true, vec![TARGET_SERVICE_UUID]);

        let registry = Arc::new(DeviceRegistry::new(TARGET_SERVICE_UUID));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = DeviceWatcher::new(host.clone(), registry.clone(), tx);
        watcher.start().unwrap();

        host.observe("sensor-1");
        match next_event(&mut rx).await {
            BridgeEvent::DeviceAdded(record) => {
                assert_eq!(record.id, "sensor-1");
                assert_eq!(record.name, "FUKY_MOUSE");
            }
            other => panic!("expected DeviceAdded, got {other:?}"),
        }
        assert_eq!(registry.current_target().unwrap().id, "sensor-1");

        host.observe("sensor-1");
        assert!(matches!(
            next_event(&mut rx).await,
            BridgeEvent::DeviceUpdated(_)
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn non_connected_observation_is_ignored() {
        let host = Arc::new(MockHost::new());
        host.add_peripheral("idle-1", "Headphones", false, vec![]);

        let registry = Arc::new(DeviceRegistry::new(TARGET_SERVICE_UUID));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = DeviceWatcher::new(host.clone(), registry.clone(), tx);
        watcher.start().unwrap();

        host.observe("idle-1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn observation_of_vanished_peripheral_is_ignored() {
        let host = Arc::new(MockHost::new());
        host.add_peripheral("sensor-1", "FUKY_MOUSE", true, vec![TARGET_SERVICE_UUID]);

        let registry = Arc::new(DeviceRegistry::new(TARGET_SERVICE_UUID));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = DeviceWatcher::new(host.clone(), registry.clone(), tx);
        watcher.start().unwrap();

        // Gone by the time the observation is processed
        host.drop_peripheral("sensor-1");
        host.observe("sensor-1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn removal_clears_target_and_emits() {
        let host = Arc::new(MockHost::new());
        host.add_peripheral("sensor-1", "FUKY_MOUSE", true, vec![TARGET_SERVICE_UUID]);

        let registry = Arc::new(DeviceRegistry::new(TARGET_SERVICE_UUID));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = DeviceWatcher::new(host.clone(), registry.clone(), tx);
        watcher.start().unwrap();

        host.observe("sensor-1");
        let _ = next_event(&mut rx).await;

        host.remove("sensor-1");
        match next_event(&mut rx).await {
            BridgeEvent::DeviceRemoved(id) => assert_eq!(id, "sensor-1"),
            other => panic!("expected DeviceRemoved, got {other:?}"),
        }
        assert!(registry.current_target().is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn probe_failure_reports_error_and_drops_event() {
        let host = Arc::new(MockHost::new());
        host.add_peripheral("sensor-1", "FUKY_MOUSE", true, vec![TARGET_SERVICE_UUID]);
        host.set_probe_fails(true);

        let registry = Arc::new(DeviceRegistry::new(TARGET_SERVICE_UUID));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = DeviceWatcher::new(host.clone(), registry.clone(), tx);
        watcher.start().unwrap();

        host.observe("sensor-1");
        match next_event(&mut rx).await {
            BridgeEvent::Error(message) => assert!(message.contains("probe failed")),
            other => panic!("expected Error, got {other:?}"),
        }
        assert!(registry.is_empty());
    }
}
