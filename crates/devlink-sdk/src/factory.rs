//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Client construction seam for the runtime and its tests."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::sync::Arc;

use devlink_clients::data::{DataClient, DataHttpClient};
use devlink_clients::logging::{LoggingClient, LoggingHttpClient};
use devlink_clients::metadata::{MetadataClient, MetadataHttpClient};
use devlink_clients::models::Endpoint;
use devlink_clients::registry::{registry_for_url, RegistryClient};
use devlink_common::Result;

/// Builds the downstream service clients the runtime talks to.
///
/// The lifecycle code only ever constructs clients through this trait, so
/// tests swap in doubles without any network.
pub trait ClientFactory: Send + Sync {
    fn metadata(&self, endpoint: &Endpoint) -> Arc<dyn MetadataClient>;
    fn data(&self, endpoint: &Endpoint) -> Arc<dyn DataClient>;
    fn logging(&self, endpoint: &Endpoint) -> Arc<dyn LoggingClient>;
    fn registry(&self, url: &str) -> Result<Arc<dyn RegistryClient>>;
}

/// Production factory producing HTTP clients.
#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn metadata(&self, endpoint: &Endpoint) -> Arc<dyn MetadataClient> {
        Arc::new(MetadataHttpClient::new(endpoint))
    }

    fn data(&self, endpoint: &Endpoint) -> Arc<dyn DataClient> {
        Arc::new(DataHttpClient::new(endpoint))
    }

    fn logging(&self, endpoint: &Endpoint) -> Arc<dyn LoggingClient> {
        Arc::new(LoggingHttpClient::new(endpoint))
    }

    fn registry(&self, url: &str) -> Result<Arc<dyn RegistryClient>> {
        registry_for_url(url)
    }
}
