//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Device service lifecycle: start, serve, stop, free."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::http::Method;
use devlink_clients::metadata::MetadataClient;
use devlink_clients::models::{AdminState, Device, OperatingState};
use devlink_clients::probe::await_ready;
use devlink_clients::registry::RegistryClient;
use devlink_common::{init_tracing, DevlinkError, Result, VersionInfo};
use parking_lot::{Mutex, RwLock};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::args::CommandLine;
use crate::catalog::{DeviceMap, WatchList};
use crate::config::{ServiceConfig, DEFAULT_CONF_DIR};
use crate::driver::ProtocolDriver;
use crate::events::{post_readings, EventPipeline, EventSender};
use crate::factory::{ClientFactory, HttpClientFactory};
use crate::registration::ensure_registered;
use crate::rest::{
    RestHandler, RestRequest, RestResponse, RestServer, API_CALLBACK, API_CONFIG, API_DEVICE,
    API_DISCOVERY, API_METRICS, API_PING, API_VERSION,
};
use crate::schedule::{parse_frequency, Scheduler};
use crate::sync::{
    acquire_config, AcquiredConfig, SyncOptions, CORE_DATA, CORE_METADATA, SUPPORT_LOGGING,
};

/// State shared between the lifecycle and the REST handlers.
struct ServiceCore {
    name: String,
    version: String,
    devices: DeviceMap,
    watchers: WatchList,
    driver: Arc<dyn ProtocolDriver>,
    config: RwLock<ServiceConfig>,
    admin_state: RwLock<AdminState>,
    operating_state: RwLock<OperatingState>,
    /// Held while a discovery scan runs; at most one at a time.
    discovery_gate: Arc<tokio::sync::Mutex<()>>,
    metrics: prometheus::Registry,
    stop_flag: Arc<AtomicBool>,
}

/// A running device service instance.
///
/// Wraps a [`ProtocolDriver`] into a network-attached service. The
/// lifecycle is `new` then `start` then `stop` then `free`; `stop` and
/// `free` are safe on an instance that never started.
pub struct DeviceService {
    core: Arc<ServiceCore>,
    factory: Arc<dyn ClientFactory>,
    rest: Arc<RestServer>,
    scheduler: Arc<Scheduler>,
    pipeline: Option<EventPipeline>,
    watch_task: Option<JoinHandle<()>>,
    registry: Option<Arc<dyn RegistryClient>>,
    conf_dir: PathBuf,
    profile: String,
    registry_arg: Option<String>,
    bound_port: u16,
    started: bool,
}

impl DeviceService {
    /// Build a service around `driver` using production HTTP clients.
    pub fn new(
        default_name: &str,
        version: &str,
        driver: Arc<dyn ProtocolDriver>,
        cmdline: &CommandLine,
    ) -> Result<Self> {
        Self::with_factory(default_name, version, driver, cmdline, Arc::new(HttpClientFactory))
    }

    /// Like [`DeviceService::new`] with the client construction seam
    /// exposed.
    pub fn with_factory(
        default_name: &str,
        version: &str,
        driver: Arc<dyn ProtocolDriver>,
        cmdline: &CommandLine,
        factory: Arc<dyn ClientFactory>,
    ) -> Result<Self> {
        let name = cmdline
            .name
            .clone()
            .unwrap_or_else(|| default_name.to_owned());
        if name.is_empty() {
            return Err(DevlinkError::invalid_argument("service name is empty"));
        }
        if version.is_empty() {
            return Err(DevlinkError::invalid_argument("service version is empty"));
        }

        let core = Arc::new(ServiceCore {
            name,
            version: version.to_owned(),
            devices: DeviceMap::new(),
            watchers: WatchList::new(),
            driver,
            config: RwLock::new(ServiceConfig::default()),
            admin_state: RwLock::new(AdminState::Unlocked),
            operating_state: RwLock::new(OperatingState::Enabled),
            discovery_gate: Arc::new(tokio::sync::Mutex::new(())),
            metrics: prometheus::Registry::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
        });

        Ok(Self {
            core,
            factory,
            rest: Arc::new(RestServer::new()),
            scheduler: Arc::new(Scheduler::new()),
            pipeline: None,
            watch_task: None,
            registry: None,
            conf_dir: PathBuf::from(cmdline.conf_dir.as_deref().unwrap_or(DEFAULT_CONF_DIR)),
            profile: cmdline.profile.clone().unwrap_or_default(),
            registry_arg: cmdline.registry.clone(),
            bound_port: 0,
            started: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Port the HTTP listener actually bound, once started.
    pub fn port(&self) -> u16 {
        self.bound_port
    }

    /// Bring the service fully online. On return the REST surface is
    /// serving, the service is registered with the metadata service and
    /// the registry, and auto events are armed.
    pub async fn start(&mut self) -> Result<()> {
        let begun = Instant::now();

        let acquired = log_failure("configuration sync", self.acquire().await)?;
        let AcquiredConfig {
            config,
            registry,
            watch_task,
            ..
        } = acquired;
        if let Err(err) = init_tracing(&self.core.name, &config.logging) {
            eprintln!("logging initialisation failed: {err}");
        }
        *self.core.config.write() = config.clone();
        self.registry = registry;
        self.watch_task = watch_task;

        let metadata = self.factory.metadata(&config.clients.metadata);
        let data = self.factory.data(&config.clients.data);
        {
            let client = metadata.clone();
            await_ready(CORE_METADATA, config.service.connect_retries, config.service.timeout, move || {
                let client = client.clone();
                async move { client.ping().await }
            })
            .await?;
        }
        {
            let client = data.clone();
            await_ready(CORE_DATA, config.service.connect_retries, config.service.timeout, move || {
                let client = client.clone();
                async move { client.ping().await }
            })
            .await?;
        }
        if config.logging.use_remote {
            let client = self.factory.logging(&config.clients.logging);
            await_ready(SUPPORT_LOGGING, config.service.connect_retries, config.service.timeout, move || {
                let client = client.clone();
                async move { client.ping().await }
            })
            .await?;
            devlink_common::logging::activate_remote(
                &self.core.name,
                &config.clients.logging.base_url(),
            );
        }

        let pipeline = log_failure(
            "event pipeline",
            EventPipeline::start(data, &self.core.metrics),
        )?;
        let sender = pipeline.sender();
        self.pipeline = Some(pipeline);

        // The listener and the callback route come up before registration
        // and device provisioning so metadata notifications triggered by
        // our own uploads are never lost. Binding first also makes the
        // advertised port the real one when port 0 asked for an ephemeral.
        self.bound_port = log_failure("rest listener", self.rest.bind(config.service.port).await)?;
        self.rest.register_handler(
            API_CALLBACK,
            vec![Method::POST, Method::PUT, Method::DELETE],
            Arc::new(CallbackHandler {
                core: self.core.clone(),
                metadata: metadata.clone(),
            }),
        );

        let host = config.effective_host();
        let registration = log_failure(
            "self-registration",
            ensure_registered(
                metadata.as_ref(),
                &self.core.name,
                &host,
                self.bound_port,
                &config.service.labels,
            )
            .await,
        )?;
        info!(state = ?registration, "self-registration settled");

        log_failure("resource bootstrap", self.bootstrap(&config, metadata).await)?;

        self.register_routes(sender.clone());
        self.arm_auto_events(sender);

        if let Some(registry) = &self.registry {
            log_failure(
                "registry registration",
                registry
                    .register_service(
                        &self.core.name,
                        &host,
                        self.bound_port,
                        config.service.check_interval,
                    )
                    .await,
            )?;
        }

        self.started = true;
        if let Some(banner) = &config.service.startup_msg {
            info!("{banner}");
        }
        info!(
            service = %self.core.name,
            port = self.bound_port,
            devices = self.core.devices.len(),
            elapsed_ms = begun.elapsed().as_millis() as u64,
            "device service started"
        );
        Ok(())
    }

    async fn acquire(&self) -> Result<AcquiredConfig> {
        let core = self.core.clone();
        let on_update = Arc::new(move |pairs: &devlink_common::NameValueList| {
            core.config.write().apply_pairs(pairs);
            info!("configuration updated from registry");
        });
        let opts = SyncOptions::from_env(
            &self.core.name,
            &self.profile,
            &self.conf_dir,
            self.registry_arg.as_deref(),
        );
        acquire_config(
            self.factory.as_ref(),
            &opts,
            self.core.stop_flag.clone(),
            on_update,
        )
        .await
    }

    /// Upload local profiles, pull the owned device set, provision
    /// statically declared devices, initialize the driver, and learn the
    /// provision watchers.
    async fn bootstrap(
        &self,
        config: &ServiceConfig,
        metadata: Arc<dyn MetadataClient>,
    ) -> Result<()> {
        upload_profiles(metadata.as_ref(), &config.profiles_dir(&self.conf_dir)).await?;

        let owned = metadata.devices_for_service(&self.core.name).await?;
        info!(devices = owned.len(), "device catalog pulled from metadata");
        self.core.devices.populate(owned);

        for decl in &config.device_list {
            if self.core.devices.get(&decl.name).is_some() {
                continue;
            }
            let Some(profile) = metadata.profile_by_name(&decl.profile).await? else {
                warn!(
                    device = %decl.name,
                    profile = %decl.profile,
                    "declared device skipped, profile unknown to metadata"
                );
                continue;
            };
            let mut device = Device {
                id: None,
                name: decl.name.clone(),
                description: decl.description.clone(),
                profile,
                protocols: decl.protocol_catalog(),
                auto_events: decl.auto_events.clone().into(),
                labels: decl.labels.clone(),
                admin_state: AdminState::Unlocked,
                operating_state: OperatingState::Enabled,
                service_name: self.core.name.clone(),
            };
            let id = metadata.add_device(&device).await?;
            device.id = Some(id);
            info!(device = %device.name, "declared device provisioned");
            self.core.devices.insert(device);
        }

        // The driver sees the fully provisioned catalog when it comes up.
        if !self.core.driver.initialize(&config.driver_pairs()).await {
            return Err(DevlinkError::DriverInit);
        }

        let added = self
            .core
            .watchers
            .merge(metadata.watchers_for_service(&self.core.name).await?);
        info!(added, "provision watchers loaded");
        Ok(())
    }

    fn register_routes(&self, sender: EventSender) {
        let core = self.core.clone();
        self.rest.register_handler(
            API_PING,
            vec![Method::GET],
            Arc::new(PingHandler { core: core.clone() }),
        );
        self.rest.register_handler(
            API_VERSION,
            vec![Method::GET],
            Arc::new(VersionHandler { core: core.clone() }),
        );
        self.rest.register_handler(
            API_CONFIG,
            vec![Method::GET],
            Arc::new(ConfigHandler { core: core.clone() }),
        );
        self.rest.register_handler(
            API_METRICS,
            vec![Method::GET],
            Arc::new(MetricsHandler { core: core.clone() }),
        );
        self.rest.register_handler(
            API_DISCOVERY,
            vec![Method::POST],
            Arc::new(DiscoveryHandler { core: core.clone() }),
        );
        self.rest.register_handler(
            API_DEVICE,
            vec![Method::GET, Method::PUT, Method::POST],
            Arc::new(DeviceHandler { core, sender }),
        );
    }

    /// Arm one periodic job per auto event declared on the current
    /// devices. An unparseable frequency disables that event only.
    fn arm_auto_events(&self, sender: EventSender) {
        for device in self.core.devices.list() {
            for event in device.auto_events.iter() {
                let period = match parse_frequency(&event.frequency) {
                    Ok(period) => period,
                    Err(err) => {
                        warn!(
                            device = %device.name,
                            resource = %event.resource,
                            error = %err,
                            "auto event disabled"
                        );
                        continue;
                    }
                };
                let job_name = format!("{}/{}", device.name, event.resource);
                let core = self.core.clone();
                let sender = sender.clone();
                let device_name = device.name.clone();
                let resource = event.resource.clone();
                let on_change = event.on_change;
                let last: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
                self.scheduler.add_periodic(&job_name, period, move || {
                    let core = core.clone();
                    let sender = sender.clone();
                    let device_name = device_name.clone();
                    let resource = resource.clone();
                    let last = last.clone();
                    async move {
                        poll_auto_event(&core, &sender, &device_name, &resource, on_change, &last)
                            .await;
                    }
                });
            }
        }
    }

    /// Take the service down in the reverse of startup order. `force`
    /// is passed to the driver to skip waiting on in-flight protocol
    /// operations.
    pub async fn stop(&mut self, force: bool) {
        self.core.stop_flag.store(true, Ordering::Release);
        self.scheduler.stop().await;
        self.rest.shutdown().await;
        self.core.driver.stop(force).await;
        self.core.devices.clear();

        if let Some(registry) = self.registry.take() {
            if let Err(err) = registry.deregister_service(&self.core.name).await {
                warn!(error = %err, "registry deregistration failed");
            }
        }
        if let Some(task) = self.watch_task.take() {
            let _ = task.await;
        }
        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop().await;
        }
        self.started = false;
        info!(service = %self.core.name, "device service stopped");
    }

    /// Release the instance. Stops first if the caller did not.
    pub async fn free(mut self) {
        if self.started {
            self.stop(false).await;
        }
    }
}

/// Read one auto-event resource and post the reading, suppressing
/// unchanged values when the event asks for it.
async fn poll_auto_event(
    core: &ServiceCore,
    sender: &EventSender,
    device_name: &str,
    resource_name: &str,
    on_change: bool,
    last: &Mutex<Option<String>>,
) {
    let Some(device) = core.devices.get(device_name) else {
        return;
    };
    if device.admin_state == AdminState::Locked
        || device.operating_state == OperatingState::Disabled
    {
        return;
    }
    let Some(resource) = device.profile.resource(resource_name) else {
        return;
    };
    match core.driver.handle_get(&device, resource).await {
        Ok(value) => {
            if on_change && last.lock().as_deref() == Some(value.as_str()) {
                return;
            }
            *last.lock() = Some(value.clone());
            post_readings(
                &core.devices,
                sender,
                device_name,
                &[(resource_name.to_owned(), value)],
            );
        }
        Err(err) => {
            error!(device = device_name, resource = resource_name, error = %err, "auto event read failed");
        }
    }
}

/// Fatal startup steps log at error level, naming the failing step,
/// before the error propagates to the caller.
fn log_failure<T>(operation: &str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        error!(operation, error = %err, "startup step failed");
    }
    result
}

/// Read device profile files (`*.toml`) under `dir` and upload the ones
/// the metadata service does not know yet. Unreadable files are logged
/// and skipped (a missing profile surfaces later when a device declares
/// it); a failed lookup or upload RPC aborts startup.
async fn upload_profiles(metadata: &dyn MetadataClient, dir: &std::path::Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
    {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        if path.file_name().and_then(|name| name.to_str()).is_some_and(|name| name.starts_with("configuration")) {
            continue;
        }
        let profile = match std::fs::read_to_string(path)
            .map_err(|err| err.to_string())
            .and_then(|text| toml::from_str::<devlink_clients::models::DeviceProfile>(&text).map_err(|err| err.to_string()))
        {
            Ok(profile) => profile,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "profile file skipped");
                continue;
            }
        };
        if metadata.profile_by_name(&profile.name).await?.is_none() {
            metadata.upload_profile(&profile).await?;
            info!(profile = %profile.name, "device profile uploaded");
        }
    }
    Ok(())
}

struct PingHandler {
    core: Arc<ServiceCore>,
}

#[async_trait]
impl RestHandler for PingHandler {
    async fn handle(&self, _request: RestRequest) -> RestResponse {
        RestResponse::text(self.core.version.clone())
    }
}

struct VersionHandler {
    core: Arc<ServiceCore>,
}

#[async_trait]
impl RestHandler for VersionHandler {
    async fn handle(&self, _request: RestRequest) -> RestResponse {
        RestResponse::json(&VersionInfo::for_service(&self.core.version))
    }
}

struct ConfigHandler {
    core: Arc<ServiceCore>,
}

#[async_trait]
impl RestHandler for ConfigHandler {
    async fn handle(&self, _request: RestRequest) -> RestResponse {
        let config = self.core.config.read().clone();
        RestResponse::json(&config)
    }
}

struct MetricsHandler {
    core: Arc<ServiceCore>,
}

#[async_trait]
impl RestHandler for MetricsHandler {
    async fn handle(&self, _request: RestRequest) -> RestResponse {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(err) = encoder.encode(&self.core.metrics.gather(), &mut buffer) {
            return RestResponse::error(500, format!("metrics encoding failed: {err}"));
        }
        RestResponse {
            status: 200,
            content_type: encoder.format_type().to_owned(),
            body: String::from_utf8_lossy(&buffer).into_owned(),
        }
    }
}

struct DiscoveryHandler {
    core: Arc<ServiceCore>,
}

#[async_trait]
impl RestHandler for DiscoveryHandler {
    async fn handle(&self, _request: RestRequest) -> RestResponse {
        if *self.core.admin_state.read() == AdminState::Locked {
            return RestResponse::error(423, "service is locked");
        }
        if *self.core.operating_state.read() == OperatingState::Disabled {
            return RestResponse::error(503, "service is disabled");
        }
        if !self.core.config.read().device.discovery {
            return RestResponse::error(503, "discovery is disabled");
        }
        match self.core.discovery_gate.clone().try_lock_owned() {
            Ok(guard) => {
                let driver = self.core.driver.clone();
                tokio::spawn(async move {
                    let _guard = guard;
                    driver.discover().await;
                });
                RestResponse {
                    status: 202,
                    content_type: "text/plain".to_owned(),
                    body: "discovery triggered".to_owned(),
                }
            }
            Err(_) => RestResponse {
                status: 202,
                content_type: "text/plain".to_owned(),
                body: "discovery already running".to_owned(),
            },
        }
    }
}

/// Handles `GET`/`PUT /api/v1/device/{name}/{resource}`.
struct DeviceHandler {
    core: Arc<ServiceCore>,
    sender: EventSender,
}

#[async_trait]
impl RestHandler for DeviceHandler {
    async fn handle(&self, request: RestRequest) -> RestResponse {
        let suffix = match request.path.strip_prefix(API_DEVICE) {
            Some(suffix) => suffix,
            None => return RestResponse::error(404, "no such device path"),
        };
        let Some((device_name, resource_name)) = suffix.split_once('/') else {
            return RestResponse::error(404, "expected device/{name}/{resource}");
        };
        if *self.core.admin_state.read() == AdminState::Locked {
            return RestResponse::error(423, "service is locked");
        }
        let Some(device) = self.core.devices.get(device_name) else {
            return RestResponse::error(404, format!("no device named {device_name}"));
        };
        if device.admin_state == AdminState::Locked {
            return RestResponse::error(423, "device is locked");
        }
        if device.operating_state == OperatingState::Disabled {
            return RestResponse::error(423, "device is disabled");
        }
        let Some(resource) = device.profile.resource(resource_name) else {
            return RestResponse::error(404, format!("no resource named {resource_name}"));
        };

        if request.method == Method::GET {
            if !resource.read_write.contains('R') {
                return RestResponse::error(405, "resource is not readable");
            }
            match self.core.driver.handle_get(&device, resource).await {
                Ok(value) => {
                    post_readings(
                        &self.core.devices,
                        &self.sender,
                        device_name,
                        &[(resource_name.to_owned(), value.clone())],
                    );
                    RestResponse::text(value)
                }
                Err(err) => RestResponse::error(500, err.to_string()),
            }
        } else {
            if !resource.read_write.contains('W') {
                return RestResponse::error(405, "resource is not writable");
            }
            let value = String::from_utf8_lossy(&request.body).into_owned();
            match self.core.driver.handle_put(&device, resource, &value).await {
                Ok(()) => RestResponse::text(""),
                Err(err) => RestResponse::error(500, err.to_string()),
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackPayload {
    name: String,
}

/// Handles metadata change notifications for devices owned by this
/// service. Creates and updates re-fetch the device by name; deletes
/// drop it from the catalog.
struct CallbackHandler {
    core: Arc<ServiceCore>,
    metadata: Arc<dyn MetadataClient>,
}

#[async_trait]
impl RestHandler for CallbackHandler {
    async fn handle(&self, request: RestRequest) -> RestResponse {
        let payload: CallbackPayload = match serde_json::from_slice(&request.body) {
            Ok(payload) => payload,
            Err(err) => return RestResponse::error(400, format!("bad callback body: {err}")),
        };

        if request.method == Method::DELETE {
            if self.core.devices.remove(&payload.name).is_some() {
                info!(device = %payload.name, "device removed via callback");
            }
            return RestResponse::text("");
        }

        match self.metadata.device_by_name(&payload.name).await {
            Ok(Some(device)) => {
                if device.service_name == self.core.name {
                    info!(device = %device.name, "device upserted via callback");
                    self.core.devices.insert(device);
                } else {
                    warn!(device = %device.name, owner = %device.service_name, "callback for a device owned elsewhere");
                }
                RestResponse::text("")
            }
            Ok(None) => RestResponse::error(404, format!("no device named {}", payload.name)),
            Err(err) => RestResponse::error(502, err.to_string()),
        }
    }
}
