//! Stage 0: fetch the exercise definition and unpack its archive into the
//! workspace.

use std::path::Path;

use tokio::fs;
use tokio::task;
use tracing::{debug, warn};

use gradegym_core::{Error, ExerciseRepo, Job, Result, stage};

/// Shown to the user when the exercise material cannot be prepared. The
/// fault is infrastructural, so the job skips advisory.
const PREPARE_FAILED_TEXT: &str =
    "the exercise could not be prepared, please try submitting again later";

const ARCHIVE_NAME: &str = "exercise.zip";

pub async fn run(repo: &dyn ExerciseRepo, job: &mut Job) -> Result<usize> {
    match prepare(repo, job).await {
        Ok(()) => Ok(stage::COMPILATION),
        Err(err) => {
            warn!(
                user = job.user_id,
                exercise = job.exercise_id,
                error = %err,
                "workspace preparation failed"
            );
            job.mark_broken(PREPARE_FAILED_TEXT);
            Ok(stage::DELIVERY)
        }
    }
}

async fn prepare(repo: &dyn ExerciseRepo, job: &Job) -> Result<()> {
    fs::create_dir_all(job.user_dir()).await?;
    let data_dir = job.data_dir();
    fs::create_dir_all(&data_dir).await?;

    let blob = repo.fetch(job.exercise_id, &job.category).await?;
    debug!(
        exercise = blob.id,
        title = %blob.title,
        bytes = blob.archive.len(),
        "fetched exercise archive"
    );

    let archive_path = data_dir.join(ARCHIVE_NAME);
    fs::write(&archive_path, &blob.archive).await?;

    let unpack_from = archive_path.clone();
    let unpack_into = data_dir.clone();
    task::spawn_blocking(move || unpack(&unpack_from, &unpack_into))
        .await
        .map_err(|err| Error::Internal(format!("unpack task failed: {err}")))??;

    fs::remove_file(&archive_path).await?;
    Ok(())
}

fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let file = std::fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|err| Error::InvalidInput(format!("malformed exercise archive: {err}")))?;
    zip.extract(dest)
        .map_err(|err| Error::InvalidInput(format!("exercise archive failed to unpack: {err}")))?;
    Ok(())
}
