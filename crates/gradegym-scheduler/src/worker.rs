//! Worker populations driving the stage pipeline.
//!
//! The normal pool pulls from the non-terminal stages and invokes the stage
//! handler; the advisory worker is the sole consumer of the advisory stage.
//! Workers run for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use gradegym_core::{Advisor, AdvisoryPrompt, Job, StageHandler, stage};

use crate::step_queue::{DEFAULT_PRIORITY, StepQueue};

/// Pause-flag sleep between checks.
const PAUSE_SLEEP: Duration = Duration::from_secs(3);
/// Consecutive pause sleeps before a worker probes the queue anyway.
const PAUSE_ITERATIONS: u32 = 3;
/// Sleep after an empty take.
const IDLE_SLEEP: Duration = Duration::from_millis(200);

/// Stored on the job when a stage handler fails infrastructurally.
const INTERNAL_ERROR_TEXT: &str =
    "an internal error occurred while evaluating the submission, please try again later";

/// Fixed-size pool of workers for the non-terminal stages.
pub struct WorkerPool {
    queue: Arc<StepQueue>,
    handler: Arc<dyn StageHandler>,
    size: usize,
}

impl WorkerPool {
    pub fn new(queue: Arc<StepQueue>, handler: Arc<dyn StageHandler>) -> Self {
        Self { queue, handler, size: 3 }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Spawn the workers; they never terminate on their own.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        (0..self.size)
            .map(|worker_id| {
                let queue = self.queue.clone();
                let handler = self.handler.clone();
                tokio::spawn(async move { normal_loop(worker_id, queue, handler).await })
            })
            .collect()
    }
}

async fn normal_loop(worker_id: usize, queue: Arc<StepQueue>, handler: Arc<dyn StageHandler>) {
    info!(worker_id, "starting stage worker");
    let mut paused_for = 0;

    loop {
        if queue.normal_paused() && paused_for < PAUSE_ITERATIONS {
            paused_for += 1;
            sleep(PAUSE_SLEEP).await;
            continue;
        }
        paused_for = 0;

        let Some((stage_idx, mut job)) = queue.take_normal() else {
            sleep(IDLE_SLEEP).await;
            continue;
        };

        info!(
            worker_id,
            stage = stage::name(stage_idx),
            user = job.user_id,
            exercise = job.exercise_id,
            "processing job"
        );

        let next = match handler.handle(stage_idx, &mut job).await {
            Ok(next) => next,
            Err(err) => {
                warn!(
                    worker_id,
                    stage = stage::name(stage_idx),
                    user = job.user_id,
                    error = %err,
                    "stage handler failed, routing job to delivery"
                );
                job.mark_broken(INTERNAL_ERROR_TEXT);
                stage::DELIVERY
            }
        };

        if let Err(err) = queue.enqueue(next, job, DEFAULT_PRIORITY) {
            // A handler returned a stage outside the pipeline; the job is
            // gone, which is the lesser evil versus wedging the worker.
            error!(worker_id, next, error = %err, "dropping job with invalid next stage");
        }
    }
}

/// The sole consumer of the advisory stage. Obtains commentary for each job
/// and forwards it to delivery; a failed advisor call is absorbed into a
/// fallback string and never breaks the job.
pub struct AdvisoryWorker {
    queue: Arc<StepQueue>,
    advisor: Arc<dyn Advisor>,
}

/// Stored when the completion service cannot be reached.
pub const ADVISORY_FALLBACK: &str = "could not obtain commentary";

impl AdvisoryWorker {
    pub fn new(queue: Arc<StepQueue>, advisor: Arc<dyn Advisor>) -> Self {
        Self { queue, advisor }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { advisory_loop(self.queue, self.advisor).await })
    }
}

async fn advisory_loop(queue: Arc<StepQueue>, advisor: Arc<dyn Advisor>) {
    info!("starting advisory worker");
    let mut paused_for = 0;

    loop {
        if queue.advisory_paused() && paused_for < PAUSE_ITERATIONS {
            paused_for += 1;
            sleep(PAUSE_SLEEP).await;
            continue;
        }
        paused_for = 0;

        let taken = match queue.take_terminal(stage::ADVISORY) {
            Ok(taken) => taken,
            Err(err) => {
                error!(error = %err, "advisory take failed");
                sleep(IDLE_SLEEP).await;
                continue;
            }
        };
        let Some((_, mut job)) = taken else {
            sleep(IDLE_SLEEP).await;
            continue;
        };

        advise(advisor.as_ref(), &mut job).await;

        if let Err(err) = queue.enqueue(stage::DELIVERY, job, DEFAULT_PRIORITY) {
            error!(error = %err, "re-enqueue after advisory failed");
        }
    }
}

async fn advise(advisor: &dyn Advisor, job: &mut Job) {
    let prompt = AdvisoryPrompt::for_job(job);
    job.advisory = match advisor.comment(&prompt).await {
        Ok(text) => text,
        Err(err) => {
            warn!(user = job.user_id, error = %err, "advisor unavailable, using fallback");
            ADVISORY_FALLBACK.to_string()
        }
    };
}
