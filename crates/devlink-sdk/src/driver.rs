//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Protocol driver trait implemented by embedding services."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use async_trait::async_trait;
use devlink_clients::models::{Device, DeviceResource};
use devlink_common::{NameValueList, Result};

/// The protocol-specific half of a device service.
///
/// The runtime calls these hooks in a fixed order: [`initialize`] exactly
/// once during startup with the opaque `[driver]` configuration block, then
/// get/put/discover while running, then [`stop`] exactly once during
/// shutdown. Implementations must be safe to call from multiple tasks
/// concurrently.
///
/// [`initialize`]: ProtocolDriver::initialize
/// [`stop`]: ProtocolDriver::stop
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    /// One-time driver setup. Returning `false` aborts service startup.
    async fn initialize(&self, config: &NameValueList) -> bool;

    /// Read one resource from a device, returning its string rendering.
    async fn handle_get(&self, device: &Device, resource: &DeviceResource) -> Result<String>;

    /// Write one value to a device resource.
    async fn handle_put(
        &self,
        device: &Device,
        resource: &DeviceResource,
        value: &str,
    ) -> Result<()>;

    /// Scan for devices reachable over this protocol. The runtime
    /// serializes discovery; at most one scan runs at a time.
    async fn discover(&self);

    /// Release driver resources. `force` means shut down without waiting
    /// for in-flight protocol operations.
    async fn stop(&self, force: bool);
}
