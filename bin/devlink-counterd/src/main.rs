//! ---
//! dl_section: "04-demo-service"
//! dl_subsection: "binary"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Binary entrypoint for the counter demo device service."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
//! A minimal device service: every managed device is an in-memory counter
//! that increments on read. Useful for exercising the runtime end to end
//! without hardware.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use devlink_clients::models::{Device, DeviceResource};
use devlink_common::{DevlinkError, NameValueList};
use devlink_sdk::{CommandLine, DeviceService, ProtocolDriver};
use parking_lot::Mutex;
use tokio::signal;
use tracing::{info, warn};

const SERVICE_NAME: &str = "device-counter";

/// One monotonically incrementing counter per device.
struct CounterDriver {
    counters: Mutex<HashMap<String, u64>>,
    start_value: Mutex<u64>,
}

impl CounterDriver {
    fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
            start_value: Mutex::new(0),
        }
    }
}

#[async_trait]
impl ProtocolDriver for CounterDriver {
    async fn initialize(&self, config: &NameValueList) -> bool {
        if let Some(start) = config.uint_value("start_value") {
            *self.start_value.lock() = start;
        }
        info!(start = *self.start_value.lock(), "counter driver ready");
        true
    }

    async fn handle_get(
        &self,
        device: &Device,
        resource: &DeviceResource,
    ) -> devlink_common::Result<String> {
        if resource.name != "count" {
            return Err(DevlinkError::not_found("resource", &resource.name));
        }
        let mut counters = self.counters.lock();
        let counter = counters
            .entry(device.name.clone())
            .or_insert_with(|| *self.start_value.lock());
        let value = *counter;
        *counter += 1;
        Ok(value.to_string())
    }

    async fn handle_put(
        &self,
        device: &Device,
        resource: &DeviceResource,
        value: &str,
    ) -> devlink_common::Result<()> {
        if resource.name != "count" {
            return Err(DevlinkError::not_found("resource", &resource.name));
        }
        let value: u64 = value
            .parse()
            .map_err(|_| DevlinkError::invalid_argument(format!("not a count: {value:?}")))?;
        self.counters.lock().insert(device.name.clone(), value);
        Ok(())
    }

    async fn discover(&self) {
        // Counters only exist once declared; nothing to scan for.
        info!("discovery requested, no discoverable counters");
    }

    async fn stop(&self, _force: bool) {
        info!("counter driver stopped");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (cmdline, rest) = CommandLine::parse(std::env::args().skip(1))?;
    for arg in &rest {
        match arg.as_str() {
            "--version" | "-v" => {
                println!("{SERVICE_NAME} {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other => warn!(argument = other, "unrecognized argument ignored"),
        }
    }

    let driver = Arc::new(CounterDriver::new());
    let mut service =
        DeviceService::new(SERVICE_NAME, env!("CARGO_PKG_VERSION"), driver, &cmdline)?;
    service.start().await?;

    signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    service.stop(false).await;
    service.free().await;
    Ok(())
}
