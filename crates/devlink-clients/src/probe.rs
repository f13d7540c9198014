//! ---
//! dl_section: "02-service-clients"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Blocking readiness prober for startup dependencies."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use devlink_common::{DevlinkError, Result};
use tracing::{error, info};

/// Wait for a startup dependency to become reachable.
///
/// Runs `probe` until it succeeds, sleeping `delay` between attempts.
/// `retries` counts additional attempts after the first, so the probe runs
/// at most `retries + 1` times. The caller blocks for up to
/// `retries * delay`; hold no cleanup-requiring resources across this call.
pub async fn await_ready<F, Fut>(
    service: &str,
    retries: u32,
    delay: Duration,
    mut probe: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut remaining = retries;
    loop {
        match probe().await {
            Ok(()) => {
                info!(service, "dependency is ready");
                return Ok(());
            }
            Err(err) => {
                if remaining == 0 {
                    error!(service, error = %err, "dependency unreachable, retries exhausted");
                    return Err(DevlinkError::unreachable(service, err.to_string()));
                }
                remaining -= 1;
                tokio::time::sleep(delay).await;
            }
        }
    }
}
