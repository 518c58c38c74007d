//! The `AudioRouter` collaborator: OS audio device enumeration and
//! default-device routing. Purely advisory from the engine's perspective —
//! every call site treats failures as best-effort and swallows them.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub id: String,
}

#[async_trait]
pub trait AudioRouter: Send + Sync {
    async fn route_to_bluetooth_device(&self) -> bool;
    async fn restore_previous_routing(&self);
    async fn list_bluetooth_devices(&self) -> Vec<AudioDeviceInfo>;
}

/// No-op router used when no platform audio integration is configured.
pub struct NullAudioRouter;

#[async_trait]
impl AudioRouter for NullAudioRouter {
    async fn route_to_bluetooth_device(&self) -> bool {
        false
    }
    async fn restore_previous_routing(&self) {}
    async fn list_bluetooth_devices(&self) -> Vec<AudioDeviceInfo> {
        Vec::new()
    }
}
