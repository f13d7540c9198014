//! ---
//! dl_section: "02-service-clients"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Platform logging service client."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use async_trait::async_trait;
use devlink_common::{DevlinkError, Result};

use crate::models::Endpoint;

/// Client for the platform logging service. The runtime only probes it
/// for readiness before switching the log destination; the transport
/// itself is provided by the platform.
#[async_trait]
pub trait LoggingClient: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// HTTP implementation of [`LoggingClient`].
#[derive(Debug, Clone)]
pub struct LoggingHttpClient {
    base: String,
    http: reqwest::Client,
}

impl LoggingHttpClient {
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            base: endpoint.base_url(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LoggingClient for LoggingHttpClient {
    async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/v1/ping", self.base);
        self.http
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("logging_ping", err))?;
        Ok(())
    }
}
