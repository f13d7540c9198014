//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "integration-test"
//! dl_type: "test"
//! dl_scope: "code"
//! dl_description: "Full start/serve/stop lifecycle against in-memory platform services."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devlink_clients::data::DataClient;
use devlink_clients::logging::LoggingClient;
use devlink_clients::metadata::MetadataClient;
use devlink_clients::models::{
    Addressable, CookedEvent, Device, DeviceProfile, DeviceResource, DeviceServiceRecord,
    Endpoint, ProvisionWatcher,
};
use devlink_clients::registry::RegistryClient;
use devlink_common::{DevlinkError, NameValueList, Result};
use devlink_sdk::{ClientFactory, CommandLine, DeviceService, ProtocolDriver};
use parking_lot::Mutex;

const CONFIG: &str = r#"
[service]
host = "test-host"
port = 0
labels = ["bench"]
connect_retries = 1
timeout = 1
check_interval = 1

[clients.metadata]
host = "localhost"
port = 48081

[clients.data]
host = "localhost"
port = 48080

[clients.logging]
host = "localhost"
port = 48061

[logging]
use_remote = true

[driver]
start_value = 40

[[device_list]]
name = "Counter01"
profile = "Counter-Profile"
description = "bench counter"

[device_list.protocols.other]
Address = "counter01"

[[device_list.auto_events]]
resource = "count"
frequency = "2s"
"#;

const PROFILE: &str = r#"
name = "Counter-Profile"
manufacturer = "DevLink"
model = "CT-1"

[[resources]]
name = "count"
value_type = "Uint64"
read_write = "RW"
"#;

/// In-memory metadata service.
#[derive(Default)]
struct FakeMetadata {
    addressables: Mutex<Vec<Addressable>>,
    services: Mutex<Vec<DeviceServiceRecord>>,
    devices: Mutex<Vec<Device>>,
    profiles: Mutex<Vec<DeviceProfile>>,
    watchers: Mutex<Vec<ProvisionWatcher>>,
    addressable_creates: AtomicU32,
    service_creates: AtomicU32,
    next_id: AtomicU64,
}

impl FakeMetadata {
    fn id(&self) -> String {
        format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl MetadataClient for FakeMetadata {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn addressable_by_name(&self, name: &str) -> Result<Option<Addressable>> {
        Ok(self
            .addressables
            .lock()
            .iter()
            .find(|a| a.name == name)
            .cloned())
    }

    async fn create_addressable(&self, addressable: &Addressable) -> Result<String> {
        self.addressable_creates.fetch_add(1, Ordering::SeqCst);
        let id = self.id();
        let mut stored = addressable.clone();
        stored.id = Some(id.clone());
        self.addressables.lock().push(stored);
        Ok(id)
    }

    async fn update_addressable(&self, addressable: &Addressable) -> Result<()> {
        let mut addressables = self.addressables.lock();
        match addressables.iter_mut().find(|a| a.name == addressable.name) {
            Some(stored) => {
                *stored = addressable.clone();
                Ok(())
            }
            None => Err(DevlinkError::remote_call("update_addressable", "no such")),
        }
    }

    async fn device_service_by_name(&self, name: &str) -> Result<Option<DeviceServiceRecord>> {
        let addressables = self.addressables.lock();
        Ok(self.services.lock().iter().find(|s| s.name == name).cloned().map(
            |mut record| {
                // The record reflects its addressable, as real metadata does.
                if let Some(current) = addressables.iter().find(|a| a.name == name) {
                    record.addressable = current.clone();
                }
                record
            },
        ))
    }

    async fn create_device_service(&self, record: &DeviceServiceRecord) -> Result<String> {
        self.service_creates.fetch_add(1, Ordering::SeqCst);
        let id = self.id();
        let mut stored = record.clone();
        stored.id = Some(id.clone());
        self.services.lock().push(stored);
        Ok(id)
    }

    async fn devices_for_service(&self, service: &str) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .lock()
            .iter()
            .filter(|d| d.service_name == service)
            .cloned()
            .collect())
    }

    async fn device_by_name(&self, name: &str) -> Result<Option<Device>> {
        Ok(self.devices.lock().iter().find(|d| d.name == name).cloned())
    }

    async fn add_device(&self, device: &Device) -> Result<String> {
        let id = self.id();
        let mut stored = device.clone();
        stored.id = Some(id.clone());
        self.devices.lock().push(stored);
        Ok(id)
    }

    async fn profile_by_name(&self, name: &str) -> Result<Option<DeviceProfile>> {
        Ok(self.profiles.lock().iter().find(|p| p.name == name).cloned())
    }

    async fn upload_profile(&self, profile: &DeviceProfile) -> Result<String> {
        self.profiles.lock().push(profile.clone());
        Ok(self.id())
    }

    async fn watchers_for_service(&self, _service: &str) -> Result<Vec<ProvisionWatcher>> {
        Ok(self.watchers.lock().clone())
    }
}

#[derive(Default)]
struct FakeData {
    events: Mutex<Vec<CookedEvent>>,
}

#[async_trait]
impl DataClient for FakeData {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn post_event(&self, event: &CookedEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
struct FakeLogging {
    pings: AtomicU32,
}

#[async_trait]
impl LoggingClient for FakeLogging {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct FakeRegistry {
    config: Mutex<Option<NameValueList>>,
    registered: Mutex<Option<(String, String, u16)>>,
    deregistered: AtomicU32,
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn register_service(
        &self,
        name: &str,
        host: &str,
        port: u16,
        _check_interval: Duration,
    ) -> Result<()> {
        *self.registered.lock() = Some((name.to_owned(), host.to_owned(), port));
        Ok(())
    }

    async fn deregister_service(&self, _name: &str) -> Result<()> {
        self.deregistered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_config(&self, _service: &str, _profile: &str) -> Result<Option<NameValueList>> {
        Ok(self.config.lock().clone())
    }

    async fn put_config(
        &self,
        _service: &str,
        _profile: &str,
        config: &NameValueList,
    ) -> Result<()> {
        *self.config.lock() = Some(config.clone());
        Ok(())
    }

    async fn query_endpoint(&self, _service: &str) -> Result<Endpoint> {
        Err(DevlinkError::remote_call("query_endpoint", "not indexed"))
    }
}

struct FakeFactory {
    metadata: Arc<FakeMetadata>,
    data: Arc<FakeData>,
    logging: Arc<FakeLogging>,
    registry: Arc<FakeRegistry>,
}

impl FakeFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            metadata: Arc::new(FakeMetadata::default()),
            data: Arc::new(FakeData::default()),
            logging: Arc::new(FakeLogging::default()),
            registry: Arc::new(FakeRegistry::default()),
        })
    }
}

impl ClientFactory for FakeFactory {
    fn metadata(&self, _endpoint: &Endpoint) -> Arc<dyn MetadataClient> {
        self.metadata.clone()
    }

    fn data(&self, _endpoint: &Endpoint) -> Arc<dyn DataClient> {
        self.data.clone()
    }

    fn logging(&self, _endpoint: &Endpoint) -> Arc<dyn LoggingClient> {
        self.logging.clone()
    }

    fn registry(&self, _url: &str) -> Result<Arc<dyn RegistryClient>> {
        Ok(self.registry.clone())
    }
}

/// A driver over a single in-memory counter.
struct CounterDriver {
    count: AtomicU64,
    initialized: AtomicBool,
    stopped: AtomicBool,
    discoveries: AtomicU32,
    /// When wired to the fake metadata, `initialize` records how many
    /// devices metadata held at the moment the driver came up.
    metadata: Mutex<Option<Arc<FakeMetadata>>>,
    devices_at_init: AtomicU64,
}

impl CounterDriver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            count: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            discoveries: AtomicU32::new(0),
            metadata: Mutex::new(None),
            devices_at_init: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ProtocolDriver for CounterDriver {
    async fn initialize(&self, config: &NameValueList) -> bool {
        if let Some(start) = config.uint_value("start_value") {
            self.count.store(start, Ordering::SeqCst);
        }
        if let Some(metadata) = self.metadata.lock().clone() {
            self.devices_at_init
                .store(metadata.devices.lock().len() as u64, Ordering::SeqCst);
        }
        self.initialized.store(true, Ordering::SeqCst);
        true
    }

    async fn handle_get(&self, _device: &Device, resource: &DeviceResource) -> Result<String> {
        if resource.name != "count" {
            return Err(DevlinkError::not_found("resource", &resource.name));
        }
        Ok(self.count.fetch_add(1, Ordering::SeqCst).to_string())
    }

    async fn handle_put(
        &self,
        _device: &Device,
        _resource: &DeviceResource,
        value: &str,
    ) -> Result<()> {
        let value: u64 = value
            .parse()
            .map_err(|_| DevlinkError::invalid_argument(format!("not a count: {value}")))?;
        self.count.store(value, Ordering::SeqCst);
        Ok(())
    }

    async fn discover(&self) {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
    }

    async fn stop(&self, _force: bool) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

fn write_conf_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("configuration.toml"), CONFIG).unwrap();
    std::fs::write(dir.path().join("counter-profile.toml"), PROFILE).unwrap();
    dir
}

fn cmdline(dir: &tempfile::TempDir, registry: Option<&str>) -> CommandLine {
    let mut args = vec!["--confdir".to_owned(), dir.path().display().to_string()];
    if let Some(url) = registry {
        args.push(format!("--registry={url}"));
    }
    let (parsed, rest) = CommandLine::parse_with_env(args, None).unwrap();
    assert!(rest.is_empty());
    parsed
}

#[tokio::test(flavor = "multi_thread")]
async fn service_starts_serves_and_stops() {
    let factory = FakeFactory::new();
    let driver = CounterDriver::new();
    *driver.metadata.lock() = Some(factory.metadata.clone());
    let dir = write_conf_dir();

    let mut service = DeviceService::with_factory(
        "counter-svc",
        "1.2.0",
        driver.clone(),
        &cmdline(&dir, None),
        factory.clone(),
    )
    .unwrap();
    service.start().await.unwrap();

    assert!(driver.initialized.load(Ordering::SeqCst));
    // Static provisioning precedes driver init.
    assert_eq!(driver.devices_at_init.load(Ordering::SeqCst), 1);
    // The logging dependency was probed before the destination switch.
    assert!(factory.logging.pings.load(Ordering::SeqCst) >= 1);
    let port = service.port();
    assert_ne!(port, 0);
    let base = format!("http://127.0.0.1:{port}");
    let http = reqwest::Client::new();

    // Profile uploaded and the declared device provisioned.
    assert_eq!(factory.metadata.profiles.lock().len(), 1);
    assert_eq!(factory.metadata.devices.lock().len(), 1);

    let resp = http.get(format!("{base}/api/v1/ping")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "1.2.0");

    let resp = http.get(format!("{base}/api/version")).send().await.unwrap();
    let version: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(version["version"], "1.2.0");

    // Reads go through the driver and increment the counter.
    let first: u64 = http
        .get(format!("{base}/api/v1/device/Counter01/count"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert!(first >= 40, "start_value from [driver] should apply, got {first}");

    let resp = http
        .put(format!("{base}/api/v1/device/Counter01/count"))
        .body("100")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let after_put: u64 = http
        .get(format!("{base}/api/v1/device/Counter01/count"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(after_put, 100);

    let resp = http
        .get(format!("{base}/api/v1/device/NoSuch/count"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    let resp = http
        .post(format!("{base}/api/v1/discovery"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 202);

    let resp = http.get(format!("{base}/api/v1/config")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // The auto event's immediate first tick posted a reading already;
    // give the pipeline a moment to drain it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!factory.data.events.lock().is_empty());

    let resp = http.get(format!("{base}/api/v1/metrics")).send().await.unwrap();
    let body = resp.text().await.unwrap();
    assert!(body.contains("devlink_events_posted_total"));

    // Registered handlers keep event-sender clones alive; stop must not
    // wait on them.
    tokio::time::timeout(Duration::from_secs(10), service.stop(false))
        .await
        .expect("stop did not complete in time");
    assert!(driver.stopped.load(Ordering::SeqCst));
    assert!(driver.discoveries.load(Ordering::SeqCst) >= 1);

    // The listener is gone.
    assert!(http
        .get(format!("{base}/api/v1/ping"))
        .send()
        .await
        .is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn callback_updates_the_device_catalog() {
    let factory = FakeFactory::new();
    let driver = CounterDriver::new();
    let dir = write_conf_dir();

    let mut service = DeviceService::with_factory(
        "counter-svc",
        "1.2.0",
        driver,
        &cmdline(&dir, None),
        factory.clone(),
    )
    .unwrap();
    service.start().await.unwrap();
    let base = format!("http://127.0.0.1:{}", service.port());
    let http = reqwest::Client::new();

    // A second device appears in metadata, then the callback announces it.
    let template = factory.metadata.devices.lock()[0].clone();
    let mut second = template;
    second.id = None;
    second.name = "Counter02".to_owned();
    factory
        .metadata
        .add_device(&second)
        .await
        .unwrap();
    let resp = http
        .post(format!("{base}/api/v1/callback"))
        .json(&serde_json::json!({ "name": "Counter02" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let resp = http
        .get(format!("{base}/api/v1/device/Counter02/count"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    // Deletion drops it again.
    let resp = http
        .delete(format!("{base}/api/v1/callback"))
        .json(&serde_json::json!({ "name": "Counter02" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let resp = http
        .get(format!("{base}/api/v1/device/Counter02/count"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);

    service.free().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_does_not_duplicate_registration() {
    let factory = FakeFactory::new();
    let dir = write_conf_dir();

    for _ in 0..2 {
        let driver = CounterDriver::new();
        let mut service = DeviceService::with_factory(
            "counter-svc",
            "1.2.0",
            driver,
            &cmdline(&dir, None),
            factory.clone(),
        )
        .unwrap();
        service.start().await.unwrap();
        service.stop(false).await;
    }

    assert_eq!(factory.metadata.addressable_creates.load(Ordering::SeqCst), 1);
    assert_eq!(factory.metadata.service_creates.load(Ordering::SeqCst), 1);
    assert_eq!(factory.metadata.services.lock().len(), 1);
    // The declared device is provisioned once; the second start pulls it
    // back from metadata.
    assert_eq!(factory.metadata.devices.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn registry_mode_registers_and_uploads_configuration() {
    let factory = FakeFactory::new();
    let driver = CounterDriver::new();
    let dir = write_conf_dir();

    let mut service = DeviceService::with_factory(
        "counter-svc",
        "1.2.0",
        driver,
        &cmdline(&dir, Some("http://registry:8500")),
        factory.clone(),
    )
    .unwrap();
    service.start().await.unwrap();

    // First run uploads the local configuration.
    let stored = factory.registry.config.lock().clone().unwrap();
    assert_eq!(stored.value("service/labels"), Some("bench"));

    let registered = factory.registry.registered.lock().clone().unwrap();
    assert_eq!(registered.0, "counter-svc");
    assert_eq!(registered.1, "test-host");
    assert_eq!(registered.2, service.port());

    service.stop(false).await;
    assert_eq!(factory.registry.deregistered.load(Ordering::SeqCst), 1);
}
