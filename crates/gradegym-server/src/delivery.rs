//! Delivery loop: the sole consumer of the delivery stage.
//!
//! Probes the sink, ships the payload, snapshots the queue, and removes the
//! job's workspace. Faults are retried with backoff and a fresh client; ten
//! consecutive faults or a structurally corrupt job end the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use gradegym_core::{Job, ResultSink, stage};
use gradegym_scheduler::{DEFAULT_PRIORITY, StepQueue};

/// Consecutive failures tolerated before giving up.
const MAX_FAILURES: u32 = 10;
/// Sleep after an empty poll.
const IDLE_SLEEP: Duration = Duration::from_millis(200);

/// Reasons the delivery loop abandons the process. Both map to exit code 1.
#[derive(Debug)]
pub enum DeliveryFatal {
    /// A job lost required fields, which can only happen through a corrupt
    /// restored snapshot; the snapshot has been cleared.
    CorruptJob { missing: Vec<&'static str> },
    /// The sink stayed unreachable or unready through every retry.
    SinkGaveUp,
}

impl std::fmt::Display for DeliveryFatal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFatal::CorruptJob { missing } => {
                write!(f, "corrupt job is missing fields {missing:?}")
            }
            DeliveryFatal::SinkGaveUp => {
                write!(f, "result sink failed {MAX_FAILURES} consecutive times")
            }
        }
    }
}

enum ShipError {
    /// Sink answered the probe with something other than 200.
    NotReady,
    /// Transport-level fault; gets the longer backoff.
    Transport,
    /// The job cannot be serialized; fatal.
    Corrupt(Vec<&'static str>),
}

pub struct DeliveryLoop<F>
where
    F: Fn() -> Box<dyn ResultSink>,
{
    queue: Arc<StepQueue>,
    make_sink: F,
    not_ready_delay: Duration,
    transport_delay: Duration,
}

impl<F> DeliveryLoop<F>
where
    F: Fn() -> Box<dyn ResultSink>,
{
    pub fn new(queue: Arc<StepQueue>, make_sink: F) -> Self {
        Self {
            queue,
            make_sink,
            not_ready_delay: Duration::from_secs(5),
            transport_delay: Duration::from_secs(10),
        }
    }

    /// Shrink the backoffs; tests drive the retry ladder in real time.
    pub fn with_delays(mut self, not_ready: Duration, transport: Duration) -> Self {
        self.not_ready_delay = not_ready;
        self.transport_delay = transport;
        self
    }

    /// Runs until a fatal condition; never returns otherwise.
    pub async fn run(&self) -> DeliveryFatal {
        let mut sink = (self.make_sink)();
        let mut failures = 0u32;

        loop {
            let taken = match self.queue.take_terminal(stage::DELIVERY) {
                Ok(taken) => taken,
                Err(err) => {
                    error!(error = %err, "delivery poll failed");
                    sleep(IDLE_SLEEP).await;
                    continue;
                }
            };
            let Some((_, job)) = taken else {
                sleep(IDLE_SLEEP).await;
                continue;
            };

            match self.ship(sink.as_ref(), &job).await {
                Ok(()) => {
                    failures = 0;
                    self.finish(&job).await;
                }
                Err(ShipError::Corrupt(missing)) => {
                    error!(?missing, "job lost required fields, clearing snapshot");
                    if let Err(err) = self.queue.clear() {
                        warn!(error = %err, "snapshot clear failed");
                    }
                    return DeliveryFatal::CorruptJob { missing };
                }
                Err(fault) => {
                    failures += 1;
                    warn!(
                        failures,
                        user = job.user_id,
                        "delivery failed, re-queueing job"
                    );
                    if let Err(err) = self.queue.enqueue(stage::DELIVERY, job, DEFAULT_PRIORITY) {
                        error!(error = %err, "re-enqueue at delivery failed");
                    }
                    if failures >= MAX_FAILURES {
                        return DeliveryFatal::SinkGaveUp;
                    }
                    let delay = match fault {
                        ShipError::Transport => self.transport_delay,
                        _ => self.not_ready_delay,
                    };
                    sleep(delay).await;
                    sink = (self.make_sink)();
                }
            }
        }
    }

    async fn ship(&self, sink: &dyn ResultSink, job: &Job) -> Result<(), ShipError> {
        match sink.status().await {
            Ok(200) => {}
            Ok(code) => {
                warn!(code, "result sink not ready");
                return Err(ShipError::NotReady);
            }
            Err(err) => {
                warn!(error = %err, "result sink probe failed");
                return Err(if err.is_transport() {
                    ShipError::Transport
                } else {
                    ShipError::NotReady
                });
            }
        }

        let missing = job.validate();
        if !missing.is_empty() {
            return Err(ShipError::Corrupt(missing));
        }

        match sink.terminate(&job.payload()).await {
            Ok(()) => Ok(()),
            Err(err) => {
                warn!(error = %err, "terminate call failed");
                Err(if err.is_transport() {
                    ShipError::Transport
                } else {
                    ShipError::NotReady
                })
            }
        }
    }

    /// Post-delivery bookkeeping: persist the drained queue and drop the
    /// job's scratch space.
    async fn finish(&self, job: &Job) {
        info!(user = job.user_id, exercise = job.exercise_id, "job delivered");
        if let Err(err) = self.queue.snapshot() {
            warn!(error = %err, "snapshot after delivery failed");
        }
        if let Err(err) = tokio::fs::remove_dir_all(&job.workspace_path).await {
            warn!(
                path = %job.workspace_path.display(),
                error = %err,
                "workspace cleanup failed"
            );
        }
    }
}
