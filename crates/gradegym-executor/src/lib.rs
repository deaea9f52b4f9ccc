//! Evaluation stage handlers: archive extraction, compilation, test
//! execution, and pattern analysis.
//!
//! Each stage takes the job, records any user-visible failure on it, and
//! returns the stage the job moves to next. Subprocesses (javac, ant, mvn,
//! java) are spawned with argument vectors, never through a shell.

pub mod analysis;
pub mod build;
pub mod extract;
pub mod testing;

mod fsutil;

use std::sync::Arc;

use async_trait::async_trait;

use gradegym_core::{Error, ExerciseRepo, Job, Result, StageHandler, stage};

/// Dispatches the four evaluation stages. Terminal stages have their own
/// workers and must never reach this handler.
pub struct PipelineHandler {
    repo: Arc<dyn ExerciseRepo>,
}

impl PipelineHandler {
    pub fn new(repo: Arc<dyn ExerciseRepo>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl StageHandler for PipelineHandler {
    async fn handle(&self, stage_idx: usize, job: &mut Job) -> Result<usize> {
        match stage_idx {
            stage::EXTRACTION => extract::run(self.repo.as_ref(), job).await,
            stage::COMPILATION => build::run(job).await,
            stage::TESTING => testing::run(job).await,
            stage::ANALYSIS => analysis::run(job).await,
            other => Err(Error::Internal(format!(
                "stage {other} has no pipeline handler"
            ))),
        }
    }
}
