//! ---
//! dl_section: "01-data-primitives"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Tracing bootstrap for DevLink services."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "DEVLINK_LOG";

static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static STDOUT_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
static REMOTE_DESTINATION: OnceCell<String> = OnceCell::new();

fn default_level() -> String {
    "info".to_owned()
}

/// Logging section of the service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Minimum severity emitted when no environment override applies.
    #[serde(default = "default_level")]
    pub level: String,
    /// Optional log file; when set a JSON file layer is attached.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Forward log output to the platform logging service once its endpoint
    /// resolves. The transport is provided by the platform, not this crate.
    #[serde(default)]
    pub use_remote: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file: None,
            use_remote: false,
        }
    }
}

/// Initialize the tracing subscriber for a device service.
///
/// `DEVLINK_LOG` overrides the filter directive; `RUST_LOG` is honoured next,
/// and finally the configured level applies. Repeated calls are tolerated so
/// tests can initialise freely.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); defaulting to {}",
                LOG_ENV, err, config.level
            );
            EnvFilter::new(&config.level)
        }),
        Err(_) => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.level)),
    };

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let _ = STDOUT_GUARD.set(stdout_guard);
    let stdout_layer = fmt::layer()
        .with_target(true)
        .with_writer(stdout_writer)
        .boxed();

    let file_layer = match &config.file {
        Some(path) => {
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{}.log", service_name));
            std::fs::create_dir_all(directory)?;
            let appender = tracing_appender::rolling::never(directory, filename);
            let (file_writer, file_guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(file_guard);
            Some(
                fmt::layer()
                    .with_target(true)
                    .json()
                    .with_writer(file_writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        level = %config.level,
        file = config.file.as_ref().map(|p| p.display().to_string()),
        "tracing initialised"
    );
    Ok(())
}

/// Record the platform logging service as the log destination. The switch
/// happens at most once per process; the first call wins and is logged,
/// later calls are no-ops.
pub fn activate_remote(service_name: &str, destination: &str) -> bool {
    let switched = REMOTE_DESTINATION.set(destination.to_owned()).is_ok();
    if switched {
        info!(
            service = %service_name,
            destination,
            "log destination switched to the platform logging service"
        );
    }
    switched
}

/// The destination recorded by [`activate_remote`], if any.
pub fn remote_destination() -> Option<&'static str> {
    REMOTE_DESTINATION.get().map(String::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_destination_switches_exactly_once() {
        assert!(remote_destination().is_none());
        assert!(activate_remote("svc", "http://logging:48061"));
        assert_eq!(remote_destination(), Some("http://logging:48061"));
        assert!(!activate_remote("svc", "http://elsewhere:48061"));
        assert_eq!(remote_destination(), Some("http://logging:48061"));
    }
}
