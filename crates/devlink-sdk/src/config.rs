//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Service configuration model and the name-value registry bridge."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::time::Duration;

use devlink_clients::models::Endpoint;
use devlink_common::{AutoEvent, DevlinkError, LoggingConfig, NameValueList, ProtocolCatalog, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// Default configuration directory relative to the working directory.
pub const DEFAULT_CONF_DIR: &str = "res";

fn default_port() -> u16 {
    49990
}

fn default_connect_retries() -> u32 {
    3
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

/// `[service]` section: identity and retry knobs for this instance.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceSettings {
    /// Advertised host; defaults to the local hostname when unset.
    pub host: Option<String>,
    /// Listener port; 0 asks the OS for an ephemeral port.
    pub port: u16,
    pub labels: Vec<String>,
    /// Additional attempts for dependency probes after the first.
    pub connect_retries: u32,
    /// Delay between probe attempts.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    /// Registry health-check and config-watch interval.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_interval: Duration,
    /// Banner logged once startup completes.
    pub startup_msg: Option<String>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: default_port(),
            labels: Vec::new(),
            connect_retries: default_connect_retries(),
            timeout: default_timeout(),
            check_interval: default_check_interval(),
            startup_msg: None,
        }
    }
}

/// `[clients]` section: the local endpoint table used when no registry
/// resolves the downstream services.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientsConfig {
    pub metadata: Endpoint,
    pub data: Endpoint,
    pub logging: Endpoint,
}

/// `[device]` section: device subsystem options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceSettings {
    /// Directory holding device profile files; defaults to the conf dir.
    pub profiles_dir: Option<PathBuf>,
    pub data_transform: bool,
    pub discovery: bool,
    pub max_event_size: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            profiles_dir: None,
            data_transform: default_true(),
            discovery: default_true(),
            max_event_size: 0,
        }
    }
}

/// A statically declared device from `[[device_list]]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceDecl {
    pub name: String,
    pub profile: String,
    pub description: String,
    pub labels: Vec<String>,
    pub protocols: IndexMap<String, IndexMap<String, String>>,
    pub auto_events: Vec<AutoEvent>,
}

impl DeviceDecl {
    pub fn protocol_catalog(&self) -> ProtocolCatalog {
        let mut catalog = ProtocolCatalog::new();
        for (name, properties) in &self.protocols {
            let list: NameValueList = properties
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            catalog.push(name.clone(), list);
        }
        catalog
    }
}

/// Complete configuration of a device service instance.
///
/// Loaded from `configuration.toml` (or the per-profile variant) in the
/// conf dir, or rebuilt from the name-value pairs held by the registry.
/// The `[driver]` table is opaque to the runtime and handed to the protocol
/// driver verbatim. Statically declared devices only exist in local file
/// configuration; the registry holds scalar settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Registry location embedded in the file, consulted when the registry
    /// flag was given bare.
    pub registry_url: Option<String>,
    pub service: ServiceSettings,
    pub clients: ClientsConfig,
    pub device: DeviceSettings,
    pub logging: LoggingConfig,
    pub driver: IndexMap<String, toml::Value>,
    pub device_list: Vec<DeviceDecl>,
}

impl ServiceConfig {
    /// Load configuration from `conf_dir`, honoring the profile variant
    /// `configuration-<profile>.toml` when a profile is set.
    pub fn load(conf_dir: &Path, profile: &str) -> Result<Self> {
        let filename = if profile.is_empty() {
            "configuration.toml".to_owned()
        } else {
            format!("configuration-{profile}.toml")
        };
        let path = conf_dir.join(filename);
        let contents = std::fs::read_to_string(&path).map_err(|err| {
            DevlinkError::config(format!("unable to read {}: {err}", path.display()))
        })?;
        let config: ServiceConfig = toml::from_str(&contents).map_err(|err| {
            DevlinkError::config(format!("failed to parse {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for decl in &self.device_list {
            if decl.name.is_empty() {
                return Err(DevlinkError::config("device_list entry without a name"));
            }
            if decl.profile.is_empty() {
                return Err(DevlinkError::config(format!(
                    "device {} declares no profile",
                    decl.name
                )));
            }
        }
        Ok(())
    }

    /// Advertised host for this instance: configured host or the local
    /// hostname.
    pub fn effective_host(&self) -> String {
        self.service
            .host
            .clone()
            .unwrap_or_else(local_hostname)
    }

    /// Directory scanned for device profiles.
    pub fn profiles_dir(&self, conf_dir: &Path) -> PathBuf {
        self.device
            .profiles_dir
            .clone()
            .unwrap_or_else(|| conf_dir.to_path_buf())
    }

    /// The opaque `[driver]` block as name-value pairs.
    pub fn driver_pairs(&self) -> NameValueList {
        let mut pairs = NameValueList::new();
        for (key, value) in &self.driver {
            pairs.push(key.clone(), toml_value_to_string(value));
        }
        pairs
    }

    /// Flatten scalar settings into the pair list stored in the registry.
    pub fn to_pairs(&self) -> NameValueList {
        let mut pairs = NameValueList::new();
        if let Some(host) = &self.service.host {
            pairs.push("service/host", host.clone());
        }
        pairs.push("service/port", self.service.port.to_string());
        if !self.service.labels.is_empty() {
            pairs.push("service/labels", self.service.labels.join(","));
        }
        pairs.push(
            "service/connect_retries",
            self.service.connect_retries.to_string(),
        );
        pairs.push("service/timeout", self.service.timeout.as_secs().to_string());
        pairs.push(
            "service/check_interval",
            self.service.check_interval.as_secs().to_string(),
        );
        if let Some(msg) = &self.service.startup_msg {
            pairs.push("service/startup_msg", msg.clone());
        }
        for (key, endpoint) in [
            ("metadata", &self.clients.metadata),
            ("data", &self.clients.data),
            ("logging", &self.clients.logging),
        ] {
            if endpoint.is_resolved() {
                pairs.push(format!("clients/{key}/host"), endpoint.host.clone());
                pairs.push(format!("clients/{key}/port"), endpoint.port.to_string());
            }
        }
        if let Some(dir) = &self.device.profiles_dir {
            pairs.push("device/profiles_dir", dir.display().to_string());
        }
        pairs.push(
            "device/data_transform",
            self.device.data_transform.to_string(),
        );
        pairs.push("device/discovery", self.device.discovery.to_string());
        pairs.push(
            "device/max_event_size",
            self.device.max_event_size.to_string(),
        );
        pairs.push("logging/level", self.logging.level.clone());
        if let Some(file) = &self.logging.file {
            pairs.push("logging/file", file.display().to_string());
        }
        pairs.push("logging/use_remote", self.logging.use_remote.to_string());
        for (key, value) in &self.driver {
            pairs.push(format!("driver/{key}"), toml_value_to_string(value));
        }
        pairs
    }

    /// Rebuild a configuration from registry pairs on top of defaults.
    pub fn from_pairs(pairs: &NameValueList) -> Self {
        let mut config = ServiceConfig::default();
        config.apply_pairs(pairs);
        config
    }

    /// Apply registry pairs onto this configuration. Unknown names are
    /// ignored; `driver/` entries repopulate the opaque driver block.
    pub fn apply_pairs(&mut self, pairs: &NameValueList) {
        if let Some(host) = pairs.value("service/host") {
            self.service.host = Some(host.to_owned());
        }
        if let Some(port) = pairs.uint_value("service/port") {
            self.service.port = port as u16;
        }
        if let Some(labels) = pairs.value("service/labels") {
            self.service.labels = labels.split(',').map(str::to_owned).collect();
        }
        if let Some(retries) = pairs.uint_value("service/connect_retries") {
            self.service.connect_retries = retries as u32;
        }
        if let Some(secs) = pairs.uint_value("service/timeout") {
            self.service.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = pairs.uint_value("service/check_interval") {
            self.service.check_interval = Duration::from_secs(secs);
        }
        if let Some(msg) = pairs.value("service/startup_msg") {
            self.service.startup_msg = Some(msg.to_owned());
        }
        for (key, endpoint) in [
            ("metadata", &mut self.clients.metadata),
            ("data", &mut self.clients.data),
            ("logging", &mut self.clients.logging),
        ] {
            if let Some(host) = pairs.value(&format!("clients/{key}/host")) {
                endpoint.host = host.to_owned();
            }
            if let Some(port) = pairs.uint_value(&format!("clients/{key}/port")) {
                endpoint.port = port as u16;
            }
        }
        if let Some(dir) = pairs.value("device/profiles_dir") {
            self.device.profiles_dir = Some(PathBuf::from(dir));
        }
        if let Some(transform) = bool_value(pairs, "device/data_transform") {
            self.device.data_transform = transform;
        }
        if let Some(discovery) = bool_value(pairs, "device/discovery") {
            self.device.discovery = discovery;
        }
        if let Some(size) = pairs.uint_value("device/max_event_size") {
            self.device.max_event_size = size;
        }
        if let Some(level) = pairs.value("logging/level") {
            self.logging.level = level.to_owned();
        }
        if let Some(file) = pairs.value("logging/file") {
            self.logging.file = Some(PathBuf::from(file));
        }
        if let Some(remote) = bool_value(pairs, "logging/use_remote") {
            self.logging.use_remote = remote;
        }
        for pair in pairs.iter() {
            if let Some(key) = pair.name.strip_prefix("driver/") {
                self.driver
                    .insert(key.to_owned(), toml::Value::String(pair.value.clone()));
            }
        }
    }
}

fn bool_value(pairs: &NameValueList, name: &str) -> Option<bool> {
    pairs.value(name)?.parse().ok()
}

fn toml_value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Local hostname fallback for the advertised host.
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned())
}
