//! ---
//! dl_section: "02-service-clients"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Collaborator models and clients for DevLink services."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
//! Clients for the remote services a device service collaborates with:
//! the metadata service (device catalog of record), the data-ingestion
//! service (event sink), and the configuration registry. Each collaborator
//! is a trait so the runtime can be exercised against in-memory doubles.

pub mod data;
pub mod logging;
pub mod metadata;
pub mod models;
pub mod probe;
pub mod registry;

pub use data::{DataClient, DataHttpClient};
pub use logging::{LoggingClient, LoggingHttpClient};
pub use metadata::{MetadataClient, MetadataHttpClient};
pub use models::{
    Addressable, AdminState, CookedEvent, Device, DeviceProfile, DeviceResource,
    DeviceServiceRecord, Endpoint, OperatingState, ProvisionWatcher, Reading,
};
pub use probe::await_ready;
pub use registry::{registry_for_url, RegistryClient, RegistryHttpClient};
