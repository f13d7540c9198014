//! ---
//! dl_section: "02-service-clients"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Metadata service client: addressables, device services, devices, profiles, watchers."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use async_trait::async_trait;
use devlink_common::{DevlinkError, Result};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::models::{
    Addressable, Device, DeviceProfile, DeviceServiceRecord, Endpoint, ProvisionWatcher,
};

/// Client for the central metadata service.
///
/// All failures map to [`DevlinkError::RemoteCall`] tagged with the failing
/// operation so callers can distinguish get/create/update errors.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn addressable_by_name(&self, name: &str) -> Result<Option<Addressable>>;
    async fn create_addressable(&self, addressable: &Addressable) -> Result<String>;
    async fn update_addressable(&self, addressable: &Addressable) -> Result<()>;

    async fn device_service_by_name(&self, name: &str) -> Result<Option<DeviceServiceRecord>>;
    async fn create_device_service(&self, record: &DeviceServiceRecord) -> Result<String>;

    async fn devices_for_service(&self, service: &str) -> Result<Vec<Device>>;
    async fn device_by_name(&self, name: &str) -> Result<Option<Device>>;
    async fn add_device(&self, device: &Device) -> Result<String>;

    async fn profile_by_name(&self, name: &str) -> Result<Option<DeviceProfile>>;
    async fn upload_profile(&self, profile: &DeviceProfile) -> Result<String>;

    async fn watchers_for_service(&self, service: &str) -> Result<Vec<ProvisionWatcher>>;
}

#[derive(Debug, Deserialize)]
struct CreatedId {
    id: String,
}

/// HTTP implementation of [`MetadataClient`].
#[derive(Debug, Clone)]
pub struct MetadataHttpClient {
    base: String,
    http: reqwest::Client,
}

impl MetadataHttpClient {
    pub fn new(endpoint: &Endpoint) -> Self {
        Self {
            base: endpoint.base_url(),
            http: reqwest::Client::new(),
        }
    }

    async fn get_optional<T: DeserializeOwned>(
        &self,
        operation: &str,
        path: &str,
    ) -> Result<Option<T>> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|err| DevlinkError::remote_call(operation, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|err| DevlinkError::remote_call(operation, err))?;
        let body = response
            .json()
            .await
            .map_err(|err| DevlinkError::remote_call(operation, err))?;
        Ok(Some(body))
    }

    async fn get_list<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<Vec<T>> {
        Ok(self.get_optional(operation, path).await?.unwrap_or_default())
    }

    async fn post_created(
        &self,
        operation: &str,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<String> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call(operation, err))?;
        let created: CreatedId = response
            .json()
            .await
            .map_err(|err| DevlinkError::remote_call(operation, err))?;
        Ok(created.id)
    }
}

#[async_trait]
impl MetadataClient for MetadataHttpClient {
    async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/v1/ping", self.base);
        self.http
            .get(&url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("metadata_ping", err))?;
        Ok(())
    }

    async fn addressable_by_name(&self, name: &str) -> Result<Option<Addressable>> {
        self.get_optional("get_addressable", &format!("/api/v1/addressable/name/{name}"))
            .await
    }

    async fn create_addressable(&self, addressable: &Addressable) -> Result<String> {
        self.post_created("create_addressable", "/api/v1/addressable", addressable)
            .await
    }

    async fn update_addressable(&self, addressable: &Addressable) -> Result<()> {
        let url = format!("{}/api/v1/addressable", self.base);
        self.http
            .put(&url)
            .json(addressable)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| DevlinkError::remote_call("update_addressable", err))?;
        Ok(())
    }

    async fn device_service_by_name(&self, name: &str) -> Result<Option<DeviceServiceRecord>> {
        self.get_optional(
            "get_deviceservice",
            &format!("/api/v1/deviceservice/name/{name}"),
        )
        .await
    }

    async fn create_device_service(&self, record: &DeviceServiceRecord) -> Result<String> {
        self.post_created("create_deviceservice", "/api/v1/deviceservice", record)
            .await
    }

    async fn devices_for_service(&self, service: &str) -> Result<Vec<Device>> {
        self.get_list("get_devices", &format!("/api/v1/device/servicename/{service}"))
            .await
    }

    async fn device_by_name(&self, name: &str) -> Result<Option<Device>> {
        self.get_optional("get_device", &format!("/api/v1/device/name/{name}"))
            .await
    }

    async fn add_device(&self, device: &Device) -> Result<String> {
        self.post_created("add_device", "/api/v1/device", device).await
    }

    async fn profile_by_name(&self, name: &str) -> Result<Option<DeviceProfile>> {
        self.get_optional(
            "get_deviceprofile",
            &format!("/api/v1/deviceprofile/name/{name}"),
        )
        .await
    }

    async fn upload_profile(&self, profile: &DeviceProfile) -> Result<String> {
        self.post_created("upload_deviceprofile", "/api/v1/deviceprofile", profile)
            .await
    }

    async fn watchers_for_service(&self, service: &str) -> Result<Vec<ProvisionWatcher>> {
        self.get_list(
            "get_watchers",
            &format!("/api/v1/provisionwatcher/servicename/{service}"),
        )
        .await
    }
}
