//! In-memory [`BleHost`] used by the unit tests. Scriptable per test:
//! peripherals can appear, disconnect and vanish, reads can fail, and
//! notifications can be pushed by hand.

use crate::infrastructure::bluetooth::host::{
    BleHost, GattLink, HostError, PeripheralProbe, WatchEvent, WatchGuard,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MockPeripheral {
    name: String,
    connected: bool,
    services: Vec<Uuid>,
}

#[derive(Default)]
struct MockState {
    peripherals: HashMap<String, MockPeripheral>,
    watch_tx: Option<mpsc::UnboundedSender<WatchEvent>>,
    notify_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    probe_fails: bool,
    read_fails: bool,
    subscribe_ok: bool,
    characteristic_missing: bool,
    frame: Vec<u8>,
}

pub(crate) struct MockHost {
    state: Arc<Mutex<MockState>>,
    reads: Arc<AtomicUsize>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                subscribe_ok: true,
                ..MockState::default()
            })),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn add_peripheral(&self, id: &str, name: &str, connected: bool, services: Vec<Uuid>) {
        self.state.lock().unwrap().peripherals.insert(
            id.to_string(),
            MockPeripheral {
                name: name.to_string(),
                connected,
                services,
            },
        );
    }

    pub fn drop_peripheral(&self, id: &str) {
        self.state.lock().unwrap().peripherals.remove(id);
    }

    /// Deliver a platform "peripheral observed" event.
    pub fn observe(&self, id: &str) {
        if let Some(tx) = self.state.lock().unwrap().watch_tx.as_ref() {
            let _ = tx.send(WatchEvent::Observed { id: id.to_string() });
        }
    }

    /// Deliver a platform "peripheral removed" event.
    pub fn remove(&self, id: &str) {
        if let Some(tx) = self.state.lock().unwrap().watch_tx.as_ref() {
            let _ = tx.send(WatchEvent::Removed { id: id.to_string() });
        }
    }

    /// Push a value-changed notification to the current subscriber, if any.
    pub fn push_notification(&self, bytes: Vec<u8>) -> bool {
        match self.state.lock().unwrap().notify_tx.as_ref() {
            Some(tx) => tx.send(bytes).is_ok(),
            None => false,
        }
    }

    pub fn set_frame(&self, bytes: Vec<u8>) {
        self.state.lock().unwrap().frame = bytes;
    }

    pub fn set_probe_fails(&self, fails: bool) {
        self.state.lock().unwrap().probe_fails = fails;
    }

    pub fn set_read_fails(&self, fails: bool) {
        self.state.lock().unwrap().read_fails = fails;
    }

    pub fn set_subscribe_ok(&self, ok: bool) {
        self.state.lock().unwrap().subscribe_ok = ok;
    }

    pub fn set_characteristic_missing(&self, missing: bool) {
        self.state.lock().unwrap().characteristic_missing = missing;
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().unwrap().notify_tx.is_some()
    }
}

struct MockGuard {
    state: Arc<Mutex<MockState>>,
}

impl WatchGuard for MockGuard {}

impl Drop for MockGuard {
    fn drop(&mut self) {
        self.state.lock().unwrap().watch_tx = None;
    }
}

#[async_trait]
impl BleHost for MockHost {
    fn start_watch(
        &self,
        events: mpsc::UnboundedSender<WatchEvent>,
    ) -> anyhow::Result<Box<dyn WatchGuard>> {
        self.state.lock().unwrap().watch_tx = Some(events);
        Ok(Box::new(MockGuard {
            state: self.state.clone(),
        }))
    }

    async fn probe(&self, id: &str) -> Result<Option<PeripheralProbe>, HostError> {
        let state = self.state.lock().unwrap();
        if state.probe_fails {
            return Err(HostError::Enumeration("mock probe failure".to_string()));
        }
        Ok(state.peripherals.get(id).map(|p| PeripheralProbe {
            name: p.name.clone(),
            connected: p.connected,
            services: p.services.clone(),
        }))
    }

    async fn open_characteristic(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Arc<dyn GattLink>, HostError> {
        let state = self.state.lock().unwrap();
        let peripheral = state
            .peripherals
            .get(id)
            .filter(|p| p.connected)
            .ok_or_else(|| HostError::DeviceUnreachable(id.to_string()))?;
        if !peripheral.services.contains(&service) {
            return Err(HostError::ServiceNotFound(service));
        }
        if state.characteristic_missing {
            return Err(HostError::CharacteristicNotFound(characteristic));
        }
        Ok(Arc::new(MockLink {
            state: self.state.clone(),
            reads: self.reads.clone(),
        }))
    }
}

struct MockLink {
    state: Arc<Mutex<MockState>>,
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl GattLink for MockLink {
    async fn read_uncached(&self) -> anyhow::Result<Vec<u8>> {
        // Keep the poll loop from spinning unrealistically fast in tests
        tokio::time::sleep(Duration::from_millis(2)).await;
        let state = self.state.lock().unwrap();
        if state.read_fails {
            anyhow::bail!("mock read failure");
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(state.frame.clone())
    }

    async fn subscribe(&self, values: mpsc::UnboundedSender<Vec<u8>>) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.subscribe_ok {
            anyhow::bail!("mock CCCD write refused");
        }
        state.notify_tx = Some(values);
        Ok(())
    }

    async fn unsubscribe(&self) -> anyhow::Result<()> {
        self.state.lock().unwrap().notify_tx = None;
        Ok(())
    }
}
