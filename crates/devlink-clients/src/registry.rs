//! ---
//! dl_section: "02-service-clients"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Configuration registry client: service registration and shared config."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devlink_common::{DevlinkError, NameValueList, Result};
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use crate::models::Endpoint;

/// Client for the external configuration-and-discovery registry.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn register_service(
        &self,
        name: &str,
        host: &str,
        port: u16,
        check_interval: Duration,
    ) -> Result<()>;

    async fn deregister_service(&self, name: &str) -> Result<()>;

    /// Configuration stored for (service, profile), or None when the
    /// registry holds no configuration for that key.
    async fn get_config(&self, service: &str, profile: &str) -> Result<Option<NameValueList>>;

    /// Store configuration for (service, profile). Callers must only upload
    /// when `get_config` returned None; an existing remote configuration is
    /// never overwritten by the runtime.
    async fn put_config(&self, service: &str, profile: &str, config: &NameValueList)
        -> Result<()>;

    /// Resolve a downstream service's endpoint from the registry.
    async fn query_endpoint(&self, service: &str) -> Result<Endpoint>;
}

/// Build a registry client for a registry URL.
///
/// An unparseable or unsupported URL is an invalid-argument failure: the
/// operator asked for a registry but gave no usable location.
pub fn registry_for_url(raw: &str) -> Result<Arc<dyn RegistryClient>> {
    let url = Url::parse(raw)
        .map_err(|err| DevlinkError::invalid_argument(format!("registry URL {raw}: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(Arc::new(RegistryHttpClient::new(url))),
        other => Err(DevlinkError::invalid_argument(format!(
            "unsupported registry scheme: {other}"
        ))),
    }
}

fn config_path(service: &str, profile: &str) -> String {
    let profile = if profile.is_empty() { "default" } else { profile };
    format!("/api/v1/config/{service}/{profile}")
}

#[derive(Debug, Serialize)]
struct Registration<'a> {
    name: &'a str,
    host: &'a str,
    port: u16,
    check_interval_secs: u64,
}

/// HTTP implementation of [`RegistryClient`].
#[derive(Debug, Clone)]
pub struct RegistryHttpClient {
    base: String,
    http: reqwest::Client,
}

impl RegistryHttpClient {
    pub fn new(url: Url) -> Self {
        Self {
            base: url.as_str().trim_end_matches('/').to_owned(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl RegistryClient for RegistryHttpClient {
    async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/v1/ping", self.base);
        self.http
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("registry_ping", err))?;
        Ok(())
    }

    async fn register_service(
        &self,
        name: &str,
        host: &str,
        port: u16,
        check_interval: Duration,
    ) -> Result<()> {
        let url = format!("{}/api/v1/services", self.base);
        let body = Registration {
            name,
            host,
            port,
            check_interval_secs: check_interval.as_secs(),
        };
        self.http
            .post(&url)
            .json(&body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("register_service", err))?;
        Ok(())
    }

    async fn deregister_service(&self, name: &str) -> Result<()> {
        let url = format!("{}/api/v1/services/{name}", self.base);
        self.http
            .delete(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("deregister_service", err))?;
        Ok(())
    }

    async fn get_config(&self, service: &str, profile: &str) -> Result<Option<NameValueList>> {
        let url = format!("{}{}", self.base, config_path(service, profile));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| DevlinkError::remote_call("get_config", err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let config = response
            .error_for_status()
            .map_err(|err| DevlinkError::remote_call("get_config", err))?
            .json()
            .await
            .map_err(|err| DevlinkError::remote_call("get_config", err))?;
        Ok(Some(config))
    }

    async fn put_config(
        &self,
        service: &str,
        profile: &str,
        config: &NameValueList,
    ) -> Result<()> {
        let url = format!("{}{}", self.base, config_path(service, profile));
        self.http
            .put(&url)
            .json(config)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("put_config", err))?;
        Ok(())
    }

    async fn query_endpoint(&self, service: &str) -> Result<Endpoint> {
        let url = format!("{}/api/v1/endpoint/{service}", self.base);
        let endpoint = self
            .http
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("query_endpoint", err))?
            .json()
            .await
            .map_err(|err| DevlinkError::remote_call("query_endpoint", err))?;
        Ok(endpoint)
    }
}
