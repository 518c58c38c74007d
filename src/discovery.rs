//! Platform Bluetooth discovery/pairing: scanning for nearby devices and
//! listing already-paired ones, to back the CLI shell's `scan` and `paired`
//! commands. Follows the same "named external collaborator, advisory,
//! best-effort" treatment as `AudioRouter`/`VoicePipeline`.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: Option<String>,
}

#[async_trait]
pub trait BluetoothDiscovery: Send + Sync {
    async fn scan(&self) -> Vec<DiscoveredDevice>;
    async fn paired_devices(&self) -> Vec<DiscoveredDevice>;
}

/// Used when no platform discovery backend is wired in; CLI commands print
/// "not available" rather than fabricating a device list.
pub struct NullDiscovery;

#[async_trait]
impl BluetoothDiscovery for NullDiscovery {
    async fn scan(&self) -> Vec<DiscoveredDevice> {
        Vec::new()
    }
    async fn paired_devices(&self) -> Vec<DiscoveredDevice> {
        Vec::new()
    }
}

#[cfg(target_os = "linux")]
pub use linux::BluerDiscovery;

#[cfg(target_os = "linux")]
mod linux {
    use super::*;

    /// Best-effort Linux discovery backed by `bluer`'s adapter APIs.
    pub struct BluerDiscovery;

    #[async_trait]
    impl BluetoothDiscovery for BluerDiscovery {
        async fn scan(&self) -> Vec<DiscoveredDevice> {
            let Ok(session) = bluer::Session::new().await else {
                return Vec::new();
            };
            let Ok(adapter) = session.default_adapter().await else {
                return Vec::new();
            };
            if adapter.discover_devices().await.is_err() {
                return Vec::new();
            }
            self.paired_devices().await
        }

        async fn paired_devices(&self) -> Vec<DiscoveredDevice> {
            let Ok(session) = bluer::Session::new().await else {
                return Vec::new();
            };
            let Ok(adapter) = session.default_adapter().await else {
                return Vec::new();
            };
            let Ok(addresses) = adapter.device_addresses().await else {
                return Vec::new();
            };

            let mut devices = Vec::new();
            for address in addresses {
                if let Ok(device) = adapter.device(address) {
                    let name = device.name().await.ok().flatten();
                    devices.push(DiscoveredDevice {
                        address: address.to_string(),
                        name,
                    });
                }
            }
            devices
        }
    }
}
