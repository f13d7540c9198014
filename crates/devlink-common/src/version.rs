//! ---
//! dl_section: "01-data-primitives"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Version metadata for services built on the SDK."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use serde::Serialize;

/// Version of the SDK itself, reported next to the service version.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version pair returned by the `/api/version` endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct VersionInfo {
    pub version: String,
    pub sdk_version: String,
}

impl VersionInfo {
    pub fn for_service(service_version: &str) -> Self {
        Self {
            version: service_version.to_owned(),
            sdk_version: SDK_VERSION.to_owned(),
        }
    }
}
