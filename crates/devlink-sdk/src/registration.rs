//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Self-registration of the service with the metadata service."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use chrono::Utc;
use devlink_clients::metadata::MetadataClient;
use devlink_clients::models::{Addressable, AdminState, DeviceServiceRecord, OperatingState};
use devlink_common::Result;
use tracing::{debug, info};

use crate::rest::API_CALLBACK;

/// Progress of a self-registration pass. The machine advances
/// monotonically; `ensure_registered` returns the state it ended in.
/// Restarting an already-registered service with unchanged parameters
/// reaches `ServicePresentCurrent` without any create or update call; a
/// fresh install walks through the `Missing`/`Created` states and ends
/// in `ServiceCreated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// Nothing looked up yet.
    NotRegistered,
    /// No addressable under this name; about to create one.
    AddressableMissing,
    /// Addressable was absent and has been created.
    AddressableCreated,
    /// Addressable settled but no service record; about to create one.
    ServiceMissing,
    /// Service record was absent and has been created.
    ServiceCreated,
    /// Service record existed but its addressable was stale and was updated.
    ServicePresentStale,
    /// Service record and addressable both match the running instance.
    ServicePresentCurrent,
}

/// Ensure the metadata service knows this instance: its callback
/// addressable and its device-service record, both looked up by name.
///
/// Idempotent across restarts. When the instance comes back on a
/// different host or port the existing addressable is updated in place;
/// the service record is never duplicated.
pub async fn ensure_registered(
    metadata: &dyn MetadataClient,
    name: &str,
    host: &str,
    port: u16,
    labels: &[String],
) -> Result<RegistrationState> {
    let desired = Addressable::for_service(name, host, port, API_CALLBACK);
    let mut state = RegistrationState::NotRegistered;
    debug!(service = name, ?state, "registration pass starting");

    let addressable = match metadata.addressable_by_name(name).await? {
        Some(mut existing) => {
            if existing.address == desired.address
                && existing.port == desired.port
                && existing.path == desired.path
            {
                debug!(service = name, "addressable is current");
            } else {
                existing.address = desired.address.clone();
                existing.port = desired.port;
                existing.path = desired.path.clone();
                metadata.update_addressable(&existing).await?;
                info!(service = name, host, port, "addressable updated");
            }
            existing
        }
        None => {
            advance(&mut state, RegistrationState::AddressableMissing, name);
            let mut fresh = desired;
            let id = metadata.create_addressable(&fresh).await?;
            fresh.id = Some(id);
            advance(&mut state, RegistrationState::AddressableCreated, name);
            info!(service = name, host, port, "addressable created");
            fresh
        }
    };

    match metadata.device_service_by_name(name).await? {
        Some(record) => {
            let stale = record.addressable.address != addressable.address
                || record.addressable.port != addressable.port;
            if stale {
                info!(service = name, "service record present, addressable refreshed");
                advance(&mut state, RegistrationState::ServicePresentStale, name);
            } else {
                debug!(service = name, "service record is current");
                advance(&mut state, RegistrationState::ServicePresentCurrent, name);
            }
        }
        None => {
            advance(&mut state, RegistrationState::ServiceMissing, name);
            let record = DeviceServiceRecord {
                id: None,
                name: name.to_owned(),
                addressable,
                operating_state: OperatingState::Enabled,
                admin_state: AdminState::Unlocked,
                labels: labels.to_vec(),
                created: Utc::now().timestamp_millis(),
            };
            metadata.create_device_service(&record).await?;
            advance(&mut state, RegistrationState::ServiceCreated, name);
            info!(service = name, "device service registered");
        }
    }
    Ok(state)
}

fn advance(state: &mut RegistrationState, next: RegistrationState, service: &str) {
    *state = next;
    debug!(service, state = ?*state, "registration state advanced");
}
