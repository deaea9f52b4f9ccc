//! Stage handler seam between the scheduler and the evaluation stages.

use async_trait::async_trait;

use crate::{Job, Result};

/// Implementations evaluate one stage of a job and return the stage it moves
/// to next.
///
/// User-visible failures (compile errors, test mismatches, timeouts) are
/// routing decisions, not errors: the handler records them on the job and
/// returns the appropriate next stage. An `Err` is reserved for
/// infrastructural faults; the calling worker marks the job broken with a
/// generic message and sends it straight to delivery.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn handle(&self, stage: usize, job: &mut Job) -> Result<usize>;
}
