//! ---
//! dl_section: "01-data-primitives"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Shared primitives for the DevLink device service SDK."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
//! Shared primitives for the DevLink workspace: the name/value collection
//! types exchanged with drivers and remote services, the error taxonomy,
//! tracing bootstrap, and version metadata.

pub mod error;
pub mod logging;
pub mod nvpairs;
pub mod version;

pub use error::{DevlinkError, ErrorCode, Result};
pub use logging::{activate_remote, init_tracing, LoggingConfig};
pub use nvpairs::{AutoEvent, AutoEventList, NameValueList, NameValuePair, ProtocolCatalog};
pub use version::{VersionInfo, SDK_VERSION};
