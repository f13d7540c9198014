//! ---
//! dl_section: "03-runtime-lifecycle"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Asynchronous event pipeline posting cooked readings to data ingestion."
//! dl_version: "v0.1.0"
//! dl_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::Utc;
use devlink_clients::data::DataClient;
use devlink_clients::models::{CookedEvent, Reading};
use devlink_common::Result;
use prometheus::{IntCounter, Registry};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::catalog::DeviceMap;

const DEFAULT_QUEUE_CAPACITY: usize = 512;
const DEFAULT_WORKERS: usize = 8;

/// Submission half of the pipeline. Cheap to clone; drivers and schedule
/// jobs hold one each.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<CookedEvent>,
    dropped: IntCounter,
}

impl EventSender {
    /// Enqueue an event without blocking. A full queue drops the event;
    /// readings are periodic and the next poll supersedes a lost one.
    pub fn submit(&self, event: CookedEvent) {
        if let Err(err) = self.tx.try_send(event) {
            self.dropped.inc();
            warn!(error = %err, "event queue full, reading dropped");
        }
    }
}

/// Worker pool delivering cooked events to the data-ingestion service.
///
/// Posting never blocks the caller: submissions go through a bounded
/// queue and a fixed set of workers drain it. Stopping the pipeline
/// signals the workers, which flush what is queued and exit; sender
/// clones still held elsewhere (REST handlers, schedule jobs) cannot
/// keep the pipeline alive, their later submissions are discarded.
pub struct EventPipeline {
    sender: EventSender,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<CookedEvent>>>,
    close_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    posted: IntCounter,
    failed: IntCounter,
}

impl EventPipeline {
    pub fn start(data: Arc<dyn DataClient>, metrics: &Registry) -> Result<Self> {
        Self::start_with(data, metrics, DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS)
    }

    pub fn start_with(
        data: Arc<dyn DataClient>,
        metrics: &Registry,
        capacity: usize,
        worker_count: usize,
    ) -> Result<Self> {
        let posted = register_counter(
            metrics,
            "devlink_events_posted_total",
            "Events delivered to data ingestion.",
        )?;
        let failed = register_counter(
            metrics,
            "devlink_events_failed_total",
            "Event deliveries rejected by data ingestion.",
        )?;
        let dropped = register_counter(
            metrics,
            "devlink_events_dropped_total",
            "Events dropped because the queue was full.",
        )?;

        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let (close_tx, _) = watch::channel(false);
        let workers = (0..worker_count)
            .map(|_| {
                let rx = rx.clone();
                let mut close_rx = close_tx.subscribe();
                let data = data.clone();
                let posted = posted.clone();
                let failed = failed.clone();
                tokio::spawn(async move {
                    loop {
                        // Lock held only while picking the next event. After
                        // the close signal the backlog drains via try_recv;
                        // an empty queue then ends the worker.
                        let event = {
                            let mut queue = rx.lock().await;
                            let received = tokio::select! {
                                event = queue.recv() => Some(event),
                                _ = async { let _ = close_rx.wait_for(|closed| *closed).await; } => None,
                            };
                            match received {
                                Some(event) => event,
                                None => queue.try_recv().ok(),
                            }
                        };
                        let Some(event) = event else { break };
                        match data.post_event(&event).await {
                            Ok(()) => posted.inc(),
                            Err(err) => {
                                failed.inc();
                                error!(device = %event.device, error = %err, "event post failed");
                            }
                        }
                    }
                })
            })
            .collect();

        Ok(Self {
            sender: EventSender { tx, dropped },
            queue: rx,
            close_tx,
            workers,
            posted,
            failed,
        })
    }

    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Signal the workers, wait for them to flush the queue, and discard
    /// anything slipped in after the flush.
    pub async fn stop(self) {
        let EventPipeline {
            sender,
            queue,
            close_tx,
            workers,
            posted,
            failed,
        } = self;
        drop(sender);
        let _ = close_tx.send(true);
        for worker in workers {
            let _ = worker.await;
        }
        let mut queue = queue.lock().await;
        let mut discarded = 0u64;
        while queue.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(discarded, "events submitted after stop were discarded");
        }
        info!(
            posted = posted.get(),
            failed = failed.get(),
            "event pipeline drained"
        );
    }
}

fn register_counter(metrics: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::new(name, help)
        .map_err(|err| devlink_common::DevlinkError::config(err.to_string()))?;
    metrics
        .register(Box::new(counter.clone()))
        .map_err(|err| devlink_common::DevlinkError::config(err.to_string()))?;
    Ok(counter)
}

/// Cook raw `(resource, value)` readings from a device and enqueue the
/// resulting event.
///
/// An unknown device logs and enqueues nothing. Readings naming resources
/// the device's profile does not declare are skipped individually.
pub fn post_readings(
    devices: &DeviceMap,
    sender: &EventSender,
    device_name: &str,
    values: &[(String, String)],
) {
    let Some(device) = devices.get(device_name) else {
        error!(device = device_name, "readings for unknown device discarded");
        return;
    };
    let origin = Utc::now().timestamp_millis();
    let readings: Vec<Reading> = values
        .iter()
        .filter_map(|(resource, value)| {
            if device.profile.resource(resource).is_none() {
                warn!(device = device_name, resource = %resource, "reading for undeclared resource skipped");
                return None;
            }
            Some(Reading {
                resource: resource.clone(),
                value: value.clone(),
                origin,
            })
        })
        .collect();
    if readings.is_empty() {
        return;
    }
    sender.submit(CookedEvent {
        device: device_name.to_owned(),
        origin,
        readings,
    });
}
