//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "DevLink device service runtime."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
//! The DevLink device service runtime. A protocol driver implements
//! [`ProtocolDriver`]; [`DeviceService`] wraps it into a network-attached
//! service that synchronizes configuration with the platform registry,
//! registers itself and its device catalog with the metadata service,
//! exposes the REST control surface, and posts readings to data ingestion.

pub mod args;
pub mod catalog;
pub mod config;
pub mod driver;
pub mod events;
pub mod factory;
pub mod registration;
pub mod rest;
pub mod schedule;
pub mod service;
pub mod sync;

pub use args::CommandLine;
pub use catalog::{DeviceMap, WatchList};
pub use config::ServiceConfig;
pub use driver::ProtocolDriver;
pub use events::{post_readings, EventPipeline, EventSender};
pub use factory::{ClientFactory, HttpClientFactory};
pub use registration::{ensure_registered, RegistrationState};
pub use rest::{RestHandler, RestRequest, RestResponse, RestServer};
pub use schedule::{parse_frequency, Scheduler};
pub use service::DeviceService;
pub use sync::{acquire_config, AcquiredConfig, SyncOptions};
