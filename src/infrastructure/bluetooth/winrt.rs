//! WinRT implementation of the [`BleHost`] contract.
//!
//! Uses the Windows device enumeration watcher filtered to connected BLE
//! peripherals, and the GenericAttributeProfile API for service resolution,
//! uncached reads and value-change notifications.

use crate::infrastructure::bluetooth::host::{
    BleHost, GattLink, HostError, PeripheralProbe, WatchEvent, WatchGuard,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use windows::core::{GUID, HSTRING};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattClientCharacteristicConfigurationDescriptorValue,
    GattCommunicationStatus, GattDeviceService, GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{
    BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice,
};
use windows::Devices::Enumeration::{
    DeviceInformation, DeviceInformationUpdate, DeviceWatcher,
};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, IBuffer};

pub struct WinrtHost;

impl WinrtHost {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WinrtHost {
    fn default() -> Self {
        Self::new()
    }
}

fn enumeration_err(e: windows::core::Error) -> HostError {
    HostError::Enumeration(e.to_string())
}

fn guid_of(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn buffer_to_vec(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; buffer.Length()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

/// Keeps the enumeration watcher alive; dropping detaches the handlers and
/// stops the watcher, which closes the event channel held by the closures.
struct WinrtWatchGuard {
    watcher: DeviceWatcher,
    added_token: i64,
    updated_token: i64,
    removed_token: i64,
}

impl WatchGuard for WinrtWatchGuard {}

impl Drop for WinrtWatchGuard {
    fn drop(&mut self) {
        let _ = self.watcher.RemoveAdded(self.added_token);
        let _ = self.watcher.RemoveUpdated(self.updated_token);
        let _ = self.watcher.RemoveRemoved(self.removed_token);
        let _ = self.watcher.Stop();
    }
}

#[async_trait]
impl BleHost for WinrtHost {
    fn start_watch(
        &self,
        events: mpsc::UnboundedSender<WatchEvent>,
    ) -> anyhow::Result<Box<dyn WatchGuard>> {
        // Enumerate association endpoints whose connection status is Connected
        let selector =
            BluetoothLEDevice::GetDeviceSelectorFromConnectionStatus(
                BluetoothConnectionStatus::Connected,
            )?;
        let watcher = DeviceInformation::CreateWatcherAqsFilter(&selector)?;

        let tx = events.clone();
        let added_token = watcher.Added(&TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>,
                  info: windows::core::Ref<DeviceInformation>| {
                if let Some(info) = info.as_ref() {
                    let _ = tx.send(WatchEvent::Observed {
                        id: info.Id()?.to_string(),
                    });
                }
                Ok(())
            },
        ))?;

        let tx = events.clone();
        let updated_token = watcher.Updated(&TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>,
                  update: windows::core::Ref<DeviceInformationUpdate>| {
                if let Some(update) = update.as_ref() {
                    let _ = tx.send(WatchEvent::Observed {
                        id: update.Id()?.to_string(),
                    });
                }
                Ok(())
            },
        ))?;

        let tx = events;
        let removed_token = watcher.Removed(&TypedEventHandler::new(
            move |_: windows::core::Ref<DeviceWatcher>,
                  update: windows::core::Ref<DeviceInformationUpdate>| {
                if let Some(update) = update.as_ref() {
                    let _ = tx.send(WatchEvent::Removed {
                        id: update.Id()?.to_string(),
                    });
                }
                Ok(())
            },
        ))?;

        watcher.Start()?;
        debug!("WinRT device watcher running");

        Ok(Box::new(WinrtWatchGuard {
            watcher,
            added_token,
            updated_token,
            removed_token,
        }))
    }

    async fn probe(&self, id: &str) -> Result<Option<PeripheralProbe>, HostError> {
        let device = BluetoothLEDevice::FromIdAsync(&HSTRING::from(id))
            .map_err(enumeration_err)?
            .await
            .map_err(enumeration_err)?;

        if device.ConnectionStatus().map_err(enumeration_err)?
            != BluetoothConnectionStatus::Connected
        {
            return Ok(None);
        }

        let result = device
            .GetGattServicesAsync()
            .map_err(enumeration_err)?
            .await
            .map_err(enumeration_err)?;
        let status = result.Status().map_err(enumeration_err)?;
        if status != GattCommunicationStatus::Success {
            return Err(HostError::Enumeration(format!(
                "GATT service enumeration returned {status:?}"
            )));
        }

        let services = result.Services().map_err(enumeration_err)?;
        let mut uuids = Vec::with_capacity(services.Size().map_err(enumeration_err)? as usize);
        for i in 0..services.Size().map_err(enumeration_err)? {
            let service = services.GetAt(i).map_err(enumeration_err)?;
            uuids.push(Uuid::from_u128(
                service.Uuid().map_err(enumeration_err)?.to_u128(),
            ));
        }

        Ok(Some(PeripheralProbe {
            name: device.Name().map_err(enumeration_err)?.to_string(),
            connected: true,
            services: uuids,
        }))
    }

    async fn open_characteristic(
        &self,
        id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Arc<dyn GattLink>, HostError> {
        let device = BluetoothLEDevice::FromIdAsync(&HSTRING::from(id))
            .map_err(enumeration_err)?
            .await
            .map_err(|_| HostError::DeviceUnreachable(id.to_string()))?;

        if device.ConnectionStatus().map_err(enumeration_err)?
            != BluetoothConnectionStatus::Connected
        {
            return Err(HostError::DeviceUnreachable(id.to_string()));
        }

        let services_result = device
            .GetGattServicesForUuidAsync(guid_of(service))
            .map_err(enumeration_err)?
            .await
            .map_err(enumeration_err)?;
        if services_result.Status().map_err(enumeration_err)? != GattCommunicationStatus::Success
            || services_result.Services().map_err(enumeration_err)?.Size().map_err(enumeration_err)? == 0
        {
            return Err(HostError::ServiceNotFound(service));
        }
        let gatt_service = services_result
            .Services()
            .map_err(enumeration_err)?
            .GetAt(0)
            .map_err(enumeration_err)?;

        let chars_result = gatt_service
            .GetCharacteristicsForUuidAsync(guid_of(characteristic))
            .map_err(enumeration_err)?
            .await
            .map_err(enumeration_err)?;
        if chars_result.Status().map_err(enumeration_err)? != GattCommunicationStatus::Success
            || chars_result.Characteristics().map_err(enumeration_err)?.Size().map_err(enumeration_err)? == 0
        {
            return Err(HostError::CharacteristicNotFound(characteristic));
        }
        let gatt_characteristic = chars_result
            .Characteristics()
            .map_err(enumeration_err)?
            .GetAt(0)
            .map_err(enumeration_err)?;

        debug!(%service, %characteristic, "telemetry characteristic bound");
        Ok(Arc::new(WinrtLink {
            service: gatt_service,
            characteristic: gatt_characteristic,
            value_changed_token: Mutex::new(None),
        }))
    }
}

struct WinrtLink {
    service: GattDeviceService,
    characteristic: GattCharacteristic,
    value_changed_token: Mutex<Option<i64>>,
}

#[async_trait]
impl GattLink for WinrtLink {
    async fn read_uncached(&self) -> anyhow::Result<Vec<u8>> {
        let result = self
            .characteristic
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        let status = result.Status()?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("characteristic read returned {status:?}");
        }
        Ok(buffer_to_vec(&result.Value()?)?)
    }

    async fn subscribe(&self, values: mpsc::UnboundedSender<Vec<u8>>) -> anyhow::Result<()> {
        let status = self
            .characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await?;
        if status != GattCommunicationStatus::Success {
            anyhow::bail!("CCCD notify write returned {status:?}");
        }

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    if let Ok(bytes) = buffer_to_vec(&args.CharacteristicValue()?) {
                        let _ = values.send(bytes);
                    }
                }
                Ok(())
            },
        );
        let token = self.characteristic.ValueChanged(&handler)?;
        *self.value_changed_token.lock().unwrap() = Some(token);
        Ok(())
    }

    async fn unsubscribe(&self) -> anyhow::Result<()> {
        if let Some(token) = self.value_changed_token.lock().unwrap().take() {
            self.characteristic.RemoveValueChanged(token)?;
        }
        // Best effort: the device may already be gone
        if let Ok(op) = self
            .characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::None,
            )
        {
            if let Err(e) = op.await {
                warn!("CCCD reset failed: {e}");
            }
        }
        Ok(())
    }
}

impl Drop for WinrtLink {
    fn drop(&mut self) {
        if let Some(token) = self.value_changed_token.lock().unwrap().take() {
            let _ = self.characteristic.RemoveValueChanged(token);
        }
        let _ = self.service.Close();
    }
}
