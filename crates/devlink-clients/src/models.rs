//! ---
//! dl_section: "02-service-clients"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Wire models exchanged with metadata, data, and registry services."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use chrono::Utc;
use devlink_common::{AutoEventList, NameValueList, ProtocolCatalog};
use serde::{Deserialize, Serialize};

/// host:port pair for a downstream service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// True when both host and port are populated.
    pub fn is_resolved(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Administrative state of a service or device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdminState {
    #[default]
    Unlocked,
    Locked,
}

/// Operational state of a service or device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingState {
    #[default]
    Enabled,
    Disabled,
}

/// A named network endpoint record held by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addressable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub protocol: String,
    pub method: String,
    pub address: String,
    pub port: u16,
    pub path: String,
    /// Creation timestamp in milliseconds since the epoch.
    pub origin: i64,
}

impl Addressable {
    /// Build the callback addressable for a device service instance.
    pub fn for_service(name: &str, host: &str, port: u16, callback_path: &str) -> Self {
        Self {
            id: None,
            name: name.to_owned(),
            protocol: "HTTP".to_owned(),
            method: "POST".to_owned(),
            address: host.to_owned(),
            port,
            path: callback_path.to_owned(),
            origin: Utc::now().timestamp_millis(),
        }
    }
}

/// The metadata record representing a running device service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceServiceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub addressable: Addressable,
    pub operating_state: OperatingState,
    pub admin_state: AdminState,
    #[serde(default)]
    pub labels: Vec<String>,
    pub created: i64,
}

/// A readable/writable resource declared by a device profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceResource {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Value type label, e.g. "Uint64", "Float64", "String".
    pub value_type: String,
    /// Access mode: "R", "W" or "RW".
    #[serde(default = "default_read_write")]
    pub read_write: String,
}

fn default_read_write() -> String {
    "R".to_owned()
}

/// A device profile: the template describing a class of devices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub name: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub resources: Vec<DeviceResource>,
}

impl DeviceProfile {
    /// Look up a declared resource by name.
    pub fn resource(&self, name: &str) -> Option<&DeviceResource> {
        self.resources.iter().find(|res| res.name == name)
    }
}

/// A managed device instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub profile: DeviceProfile,
    #[serde(default)]
    pub protocols: ProtocolCatalog,
    #[serde(default)]
    pub auto_events: AutoEventList,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub operating_state: OperatingState,
    /// Owning device service name.
    pub service_name: String,
}

/// A rule the metadata service uses to auto-onboard discovered devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionWatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub profile_name: String,
    /// Identifier patterns matched against discovered device protocols.
    #[serde(default)]
    pub identifiers: NameValueList,
    #[serde(default)]
    pub admin_state: AdminState,
}

/// One reading inside a cooked event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    pub resource: String,
    pub value: String,
    pub origin: i64,
}

/// A normalized event ready for transmission to the data-ingestion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookedEvent {
    pub device: String,
    pub origin: i64,
    pub readings: Vec<Reading>,
}

impl CookedEvent {
    pub fn new(device: &str, readings: Vec<Reading>) -> Self {
        Self {
            device: device.to_owned(),
            origin: Utc::now().timestamp_millis(),
            readings,
        }
    }
}
