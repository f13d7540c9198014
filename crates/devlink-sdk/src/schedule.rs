//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Periodic job scheduler driving auto events and registry watches."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use devlink_common::{DevlinkError, Result};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Runs named periodic jobs until stopped.
///
/// Each job gets its own task; a slow tick delays rather than bunches
/// subsequent ones. The first tick fires immediately, so an auto event
/// produces a reading as soon as it is armed.
pub struct Scheduler {
    stop_tx: watch::Sender<bool>,
    jobs: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn add_periodic<F, Fut>(&self, name: &str, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut stop_rx = self.stop_tx.subscribe();
        let name = name.to_owned();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // The watch guard must not live across the job await, so
                // the wait is confined to its own future.
                let stopped = async {
                    let _ = stop_rx.wait_for(|stop| *stop).await;
                };
                tokio::select! {
                    _ = ticker.tick() => job().await,
                    _ = stopped => {
                        debug!(job = %name, "periodic job stopped");
                        break;
                    }
                }
            }
        });
        self.jobs.lock().push(handle);
    }

    /// Signal all jobs and wait for them to exit. A job mid-tick finishes
    /// its current run first.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let jobs = std::mem::take(&mut *self.jobs.lock());
        for job in jobs {
            let _ = job.await;
        }
    }
}

/// Parse an auto-event frequency such as `"500ms"`, `"10s"`, `"2m"` or
/// `"1h"`. A bare number or unknown unit is an invalid argument.
pub fn parse_frequency(raw: &str) -> Result<Duration> {
    let (digits, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len()));
    let value: u64 = digits
        .parse()
        .map_err(|_| DevlinkError::invalid_argument(format!("bad frequency: {raw:?}")))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(DevlinkError::invalid_argument(format!(
            "bad frequency unit: {raw:?}"
        ))),
    }
}
