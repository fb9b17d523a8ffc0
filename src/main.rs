#[cfg(windows)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use fuky_bridge::infrastructure::bluetooth::winrt::WinrtHost;
    use fuky_bridge::infrastructure::logging;
    use fuky_bridge::{BridgeEvent, BridgeSettings, ImuBridge};
    use std::sync::Arc;
    use tracing::{error, info, trace};

    let settings = BridgeSettings::load_or_default();
    let _log_guard = logging::init_logger(&settings.log)?;
    info!("starting fuky-bridge");

    let host = Arc::new(WinrtHost::new());
    let (mut bridge, mut events) = ImuBridge::new(host, &settings);
    bridge.start_scanning()?;
    info!(pipe = %settings.pipe_name, "waiting for the sensor and for subscribers");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            event = events.recv() => match event {
                Some(BridgeEvent::DeviceAdded(record)) => {
                    info!(device = %record.name, id = %record.id, "device connected");
                }
                Some(BridgeEvent::DeviceUpdated(record)) => {
                    trace!(device = %record.name, "device updated");
                }
                Some(BridgeEvent::DeviceRemoved(id)) => {
                    info!(%id, "device removed");
                }
                Some(BridgeEvent::Error(message)) => {
                    error!("{message}");
                }
                Some(BridgeEvent::FrameReady { sample, .. }) => {
                    trace!(
                        accel = ?(sample.accel_x, sample.accel_y, sample.accel_z),
                        quat = ?(sample.quat_i, sample.quat_j, sample.quat_k, sample.quat_w),
                        "frame"
                    );
                }
                None => break,
            }
        }
    }

    bridge.dispose().await;
    Ok(())
}

#[cfg(not(windows))]
fn main() -> anyhow::Result<()> {
    anyhow::bail!("fuky-bridge drives the Windows Bluetooth LE stack and only runs on Windows");
}
