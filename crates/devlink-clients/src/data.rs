//! ---
//! dl_section: "02-service-clients"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Data-ingestion service client."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use async_trait::async_trait;
use devlink_common::{DevlinkError, Result};

use crate::models::{CookedEvent, Endpoint};

/// Client for the data-ingestion service that receives cooked events.
#[async_trait]
pub trait DataClient: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn post_event(&self, event: &CookedEvent) -> Result<()>;
}

/// HTTP implementation of [`DataClient`].
#[derive(Debug, Clone)]
pub struct DataHttpClient {
    base: String,
    http: reqwest::Client,
}

impl DataHttpClient {
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            base: endpoint.base_url(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DataClient for DataHttpClient {
    async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/v1/ping", self.base);
        self.http
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("data_ping", err))?;
        Ok(())
    }

    async fn post_event(&self, event: &CookedEvent) -> Result<()> {
        let url = format!("{}/api/v1/event", self.base);
        self.http
            .post(&url)
            .json(event)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("post_event", err))?;
        Ok(())
    }
}
