//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Configuration acquisition: registry versus local file, upload, and watch."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use devlink_clients::probe::await_ready;
use devlink_clients::registry::RegistryClient;
use devlink_common::{DevlinkError, NameValueList, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::factory::ClientFactory;

/// Total ping attempts made while waiting for the registry.
pub const REGISTRY_RETRY_COUNT_ENV: &str = "DEVLINK_REGISTRY_RETRY_COUNT";
/// Seconds between registry ping attempts.
pub const REGISTRY_RETRY_WAIT_ENV: &str = "DEVLINK_REGISTRY_RETRY_WAIT";

const DEFAULT_RETRY_COUNT: u32 = 5;
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(1);

pub const CORE_METADATA: &str = "core-metadata";
pub const CORE_DATA: &str = "core-data";
pub const SUPPORT_LOGGING: &str = "support-logging";

/// Inputs to configuration acquisition.
pub struct SyncOptions<'a> {
    pub service_name: &'a str,
    pub profile: &'a str,
    pub conf_dir: &'a Path,
    /// `None`: run from the local file only. `Some("")`: use a registry,
    /// discovering its URL from the local file. Otherwise the URL itself.
    pub registry_arg: Option<&'a str>,
    /// Total registry ping attempts before giving up.
    pub retry_count: u32,
    /// Delay between registry ping attempts.
    pub retry_wait: Duration,
    /// Override for the config-watch poll interval; defaults to the
    /// service check interval.
    pub watch_interval: Option<Duration>,
}

impl<'a> SyncOptions<'a> {
    /// Build options with the retry knobs taken from the environment.
    pub fn from_env(
        service_name: &'a str,
        profile: &'a str,
        conf_dir: &'a Path,
        registry_arg: Option<&'a str>,
    ) -> Self {
        Self {
            service_name,
            profile,
            conf_dir,
            registry_arg,
            retry_count: env_u64(REGISTRY_RETRY_COUNT_ENV)
                .map(|n| n as u32)
                .unwrap_or(DEFAULT_RETRY_COUNT)
                .max(1),
            retry_wait: env_u64(REGISTRY_RETRY_WAIT_ENV)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_RETRY_WAIT),
            watch_interval: None,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

/// Outcome of configuration acquisition.
pub struct AcquiredConfig {
    pub config: ServiceConfig,
    /// True when the settings came from the registry rather than the file.
    pub from_registry: bool,
    /// True when the local settings were uploaded as the first remote copy.
    pub uploaded: bool,
    pub registry: Option<Arc<dyn RegistryClient>>,
    /// Poll task watching the registry for configuration changes.
    pub watch_task: Option<JoinHandle<()>>,
}

/// Acquire the service configuration.
///
/// Without a registry argument the local file is the sole source. With
/// one, the registry is authoritative: its stored configuration is used
/// when present, and otherwise the local file is loaded and uploaded as
/// the initial remote copy. An unusable registry URL or an unreachable
/// registry is fatal; running with silently-ignored central configuration
/// would hide operator intent. Statically declared devices always come
/// from the local file.
pub async fn acquire_config(
    factory: &dyn ClientFactory,
    opts: &SyncOptions<'_>,
    stop_flag: Arc<AtomicBool>,
    on_update: Arc<dyn Fn(&NameValueList) + Send + Sync>,
) -> Result<AcquiredConfig> {
    let Some(registry_arg) = opts.registry_arg else {
        let config = ServiceConfig::load(opts.conf_dir, opts.profile)?;
        info!(source = "file", "configuration loaded");
        return Ok(AcquiredConfig {
            config,
            from_registry: false,
            uploaded: false,
            registry: None,
            watch_task: None,
        });
    };

    // A bare registry flag means the URL lives in the local file.
    let local = ServiceConfig::load(opts.conf_dir, opts.profile);
    let url = if registry_arg.is_empty() {
        match &local {
            Ok(config) => config.registry_url.clone().ok_or_else(|| {
                DevlinkError::config("registry requested but no registry_url configured")
            })?,
            Err(err) => return Err(err.clone()),
        }
    } else {
        registry_arg.to_owned()
    };

    let registry = factory.registry(&url)?;
    {
        let registry = registry.clone();
        await_ready("registry", opts.retry_count.max(1) - 1, opts.retry_wait, move || {
            let registry = registry.clone();
            async move { registry.ping().await }
        })
        .await?;
    }

    let (mut config, from_registry, uploaded) =
        match registry.get_config(opts.service_name, opts.profile).await? {
            Some(pairs) => {
                info!(source = "registry", "configuration loaded");
                let mut config = ServiceConfig::from_pairs(&pairs);
                // Static devices and the driver defaults stay file-local.
                if let Ok(local) = &local {
                    config.device_list = local.device_list.clone();
                    config.registry_url = local.registry_url.clone();
                }
                (config, true, false)
            }
            None => {
                let config = local?;
                registry
                    .put_config(opts.service_name, opts.profile, &config.to_pairs())
                    .await?;
                info!(source = "file", "configuration loaded and uploaded to registry");
                (config, false, true)
            }
        };
    config.validate()?;

    resolve_endpoints(registry.as_ref(), &mut config).await;

    let watch_task = spawn_watch(
        registry.clone(),
        opts.service_name.to_owned(),
        opts.profile.to_owned(),
        opts.watch_interval.unwrap_or(config.service.check_interval),
        config.to_pairs(),
        stop_flag,
        on_update,
    );

    Ok(AcquiredConfig {
        config,
        from_registry,
        uploaded,
        registry: Some(registry),
        watch_task: Some(watch_task),
    })
}

/// Resolve downstream service endpoints from the registry. A service the
/// registry cannot resolve keeps its locally configured endpoint.
async fn resolve_endpoints(registry: &dyn RegistryClient, config: &mut ServiceConfig) {
    for (service, endpoint) in [
        (CORE_METADATA, &mut config.clients.metadata),
        (CORE_DATA, &mut config.clients.data),
        (SUPPORT_LOGGING, &mut config.clients.logging),
    ] {
        match registry.query_endpoint(service).await {
            Ok(resolved) if resolved.is_resolved() => {
                debug!(service, endpoint = %resolved, "endpoint resolved from registry");
                *endpoint = resolved;
            }
            Ok(_) => warn!(service, "registry returned an unresolved endpoint"),
            Err(err) => {
                warn!(service, error = %err, "endpoint lookup failed, using local value");
            }
        }
    }
}

fn spawn_watch(
    registry: Arc<dyn RegistryClient>,
    service: String,
    profile: String,
    interval: Duration,
    mut last: NameValueList,
    stop_flag: Arc<AtomicBool>,
    on_update: Arc<dyn Fn(&NameValueList) + Send + Sync>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick would re-deliver the startup snapshot.
        ticker.tick().await;
        // Checked between polls so shutdown is not held for a full
        // poll interval.
        let stop_poll = Duration::from_millis(50).min(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = async {
                    loop {
                        tokio::time::sleep(stop_poll).await;
                        if stop_flag.load(Ordering::Acquire) {
                            return;
                        }
                    }
                } => {
                    debug!(service = %service, "configuration watch stopped");
                    return;
                }
            }
            if stop_flag.load(Ordering::Acquire) {
                debug!(service = %service, "configuration watch stopped");
                return;
            }
            match registry.get_config(&service, &profile).await {
                Ok(Some(pairs)) => {
                    if pairs != last {
                        info!(service = %service, "registry configuration changed");
                        on_update(&pairs);
                        last = pairs;
                    }
                }
                Ok(None) => {
                    warn!(service = %service, "registry no longer holds configuration");
                }
                Err(err) => {
                    warn!(service = %service, error = %err, "configuration poll failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use devlink_clients::data::DataClient;
    use devlink_clients::logging::LoggingClient;
    use devlink_clients::metadata::MetadataClient;
    use devlink_clients::models::Endpoint;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;

    const LOCAL: &str = r#"
registry_url = "http://embedded:8500"

[service]
port = 49990
check_interval = 1

[clients.metadata]
host = "localhost"
port = 48081

[[device_list]]
name = "Counter01"
profile = "Counter-Profile"
"#;

    struct FakeRegistry {
        ping_failures: AtomicU32,
        pings: AtomicU32,
        config: Mutex<Option<NameValueList>>,
        puts: AtomicU32,
        endpoints: Mutex<Vec<(String, Endpoint)>>,
    }

    impl FakeRegistry {
        fn new(config: Option<NameValueList>) -> Arc<Self> {
            Arc::new(Self {
                ping_failures: AtomicU32::new(0),
                pings: AtomicU32::new(0),
                config: Mutex::new(config),
                puts: AtomicU32::new(0),
                endpoints: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn ping(&self) -> Result<()> {
            let attempt = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.ping_failures.load(Ordering::SeqCst) {
                Err(DevlinkError::remote_call("registry_ping", "refused"))
            } else {
                Ok(())
            }
        }

        async fn register_service(
            &self,
            _name: &str,
            _host: &str,
            _port: u16,
            _check_interval: Duration,
        ) -> Result<()> {
            Ok(())
        }

        async fn deregister_service(&self, _name: &str) -> Result<()> {
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
            self.puts.fetch_add(1, Ordering::SeqCst);
            *self.config.lock() = Some(config.clone());
            Ok(())
        }

        async fn query_endpoint(&self, service: &str) -> Result<Endpoint> {
            self.endpoints
                .lock()
                .iter()
                .find(|(name, _)| name == service)
                .map(|(_, endpoint)| endpoint.clone())
                .ok_or_else(|| DevlinkError::remote_call("query_endpoint", "unknown service"))
        }
    }

    struct FakeFactory {
        registry: Arc<FakeRegistry>,
    }

    impl ClientFactory for FakeFactory {
        fn metadata(&self, _endpoint: &Endpoint) -> Arc<dyn MetadataClient> {
            unimplemented!("not used by configuration sync")
        }

        fn data(&self, _endpoint: &Endpoint) -> Arc<dyn DataClient> {
            unimplemented!("not used by configuration sync")
        }

        fn logging(&self, _endpoint: &Endpoint) -> Arc<dyn LoggingClient> {
            unimplemented!("not used by configuration sync")
        }

        fn registry(&self, _url: &str) -> Result<Arc<dyn RegistryClient>> {
            Ok(self.registry.clone())
        }
    }

    fn write_local(dir: &tempfile::TempDir) {
        std::fs::write(dir.path().join("configuration.toml"), LOCAL).unwrap();
    }

    fn options<'a>(conf_dir: &'a Path, registry_arg: Option<&'a str>) -> SyncOptions<'a> {
        SyncOptions {
            service_name: "counter-svc",
            profile: "",
            conf_dir,
            registry_arg,
            retry_count: 3,
            retry_wait: Duration::from_millis(1),
            watch_interval: Some(Duration::from_millis(10)),
        }
    }

    fn noop_update() -> Arc<dyn Fn(&NameValueList) + Send + Sync> {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn no_registry_means_file_only() {
        let dir = tempfile::tempdir().unwrap();
        write_local(&dir);
        let factory = FakeFactory {
            registry: FakeRegistry::new(None),
        };
        let acquired = acquire_config(
            &factory,
            &options(dir.path(), None),
            Arc::new(AtomicBool::new(false)),
            noop_update(),
        )
        .await
        .unwrap();
        assert!(!acquired.from_registry);
        assert!(!acquired.uploaded);
        assert!(acquired.registry.is_none());
        assert_eq!(acquired.config.service.port, 49990);
        assert_eq!(factory.registry.pings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_registry_uploads_local_configuration_once() {
        let dir = tempfile::tempdir().unwrap();
        write_local(&dir);
        let registry = FakeRegistry::new(None);
        let factory = FakeFactory {
            registry: registry.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let acquired = acquire_config(
            &factory,
            &options(dir.path(), Some("http://registry:8500")),
            stop.clone(),
            noop_update(),
        )
        .await
        .unwrap();
        assert!(!acquired.from_registry);
        assert!(acquired.uploaded);
        assert_eq!(registry.puts.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.config.lock().clone().unwrap().value("service/port"),
            Some("49990")
        );
        stop.store(true, Ordering::Release);
        acquired.watch_task.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn existing_remote_configuration_wins_but_devices_stay_local() {
        let dir = tempfile::tempdir().unwrap();
        write_local(&dir);
        let mut remote = NameValueList::new();
        remote.push("service/port", "50001");
        remote.push("service/check_interval", "1");
        let registry = FakeRegistry::new(Some(remote));
        let factory = FakeFactory {
            registry: registry.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let acquired = acquire_config(
            &factory,
            &options(dir.path(), Some("http://registry:8500")),
            stop.clone(),
            noop_update(),
        )
        .await
        .unwrap();
        assert!(acquired.from_registry);
        assert!(!acquired.uploaded);
        assert_eq!(registry.puts.load(Ordering::SeqCst), 0);
        assert_eq!(acquired.config.service.port, 50001);
        assert_eq!(acquired.config.device_list.len(), 1);
        stop.store(true, Ordering::Release);
        acquired.watch_task.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn bare_registry_flag_discovers_url_from_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write_local(&dir);
        let registry = FakeRegistry::new(None);
        let factory = FakeFactory {
            registry: registry.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let acquired = acquire_config(&factory, &options(dir.path(), Some("")), stop.clone(), noop_update())
            .await
            .unwrap();
        assert!(acquired.uploaded);
        stop.store(true, Ordering::Release);
        acquired.watch_task.unwrap().await.unwrap();

        // No embedded URL is a configuration error.
        let bare_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            bare_dir.path().join("configuration.toml"),
            "[service]\nport = 49990\n",
        )
        .unwrap();
        let err = acquire_config(
            &factory,
            &options(bare_dir.path(), Some("")),
            Arc::new(AtomicBool::new(false)),
            noop_update(),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.code(), devlink_common::ErrorCode::Config);
    }

    #[tokio::test]
    async fn unreachable_registry_is_fatal_after_the_attempt_budget() {
        let dir = tempfile::tempdir().unwrap();
        write_local(&dir);
        let registry = FakeRegistry::new(None);
        registry.ping_failures.store(u32::MAX, Ordering::SeqCst);
        let factory = FakeFactory {
            registry: registry.clone(),
        };
        let err = acquire_config(
            &factory,
            &options(dir.path(), Some("http://registry:8500")),
            Arc::new(AtomicBool::new(false)),
            noop_update(),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.code(), devlink_common::ErrorCode::RemoteUnreachable);
        // retry_count is the total attempt budget.
        assert_eq!(registry.pings.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn registry_recovering_within_budget_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        write_local(&dir);
        let registry = FakeRegistry::new(None);
        registry.ping_failures.store(2, Ordering::SeqCst);
        let factory = FakeFactory {
            registry: registry.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let acquired = acquire_config(
            &factory,
            &options(dir.path(), Some("http://registry:8500")),
            stop.clone(),
            noop_update(),
        )
        .await
        .unwrap();
        assert_eq!(registry.pings.load(Ordering::SeqCst), 3);
        stop.store(true, Ordering::Release);
        acquired.watch_task.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn endpoints_resolve_from_registry_with_local_fallback() {
        let dir = tempfile::tempdir().unwrap();
        write_local(&dir);
        let registry = FakeRegistry::new(None);
        registry
            .endpoints
            .lock()
            .push((CORE_DATA.to_owned(), Endpoint::new("data-host", 48080)));
        let factory = FakeFactory {
            registry: registry.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let acquired = acquire_config(
            &factory,
            &options(dir.path(), Some("http://registry:8500")),
            stop.clone(),
            noop_update(),
        )
        .await
        .unwrap();
        assert_eq!(acquired.config.clients.data.host, "data-host");
        // Lookup failure keeps the locally configured endpoint.
        assert_eq!(acquired.config.clients.metadata.host, "localhost");
        assert_eq!(acquired.config.clients.metadata.port, 48081);
        stop.store(true, Ordering::Release);
        acquired.watch_task.unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn watch_reports_changes_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        write_local(&dir);
        let registry = FakeRegistry::new(None);
        let factory = FakeFactory {
            registry: registry.clone(),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let updates = Arc::new(AtomicU32::new(0));
        let seen = updates.clone();
        let acquired = acquire_config(
            &factory,
            &options(dir.path(), Some("http://registry:8500")),
            stop.clone(),
            Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

        // Unchanged config produces no callbacks.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(updates.load(Ordering::SeqCst), 0);

        let mut changed = registry.config.lock().clone().unwrap();
        changed.push("driver/extra", "1");
        *registry.config.lock() = Some(changed);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(updates.load(Ordering::SeqCst), 1);

        stop.store(true, Ordering::Release);
        acquired.watch_task.unwrap().await.unwrap();
    }
}
