//! The queue of queues: one priority queue per stage, shared lock, pause
//! flags, and a restart-surviving snapshot file.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use gradegym_core::{Job, stage};

use crate::queue::PriorityQueue;

/// Priority assigned when the caller has no opinion.
pub const DEFAULT_PRIORITY: i64 = 5;

/// Snapshot file name inside the temp subfolder.
const SNAPSHOT_FILE: &str = "queue_snapshot";
/// Subfolder under the OS temp directory holding persisted state.
const SNAPSHOT_SUBDIR: &str = "DawBotcodingGym";
/// Current snapshot document version; readers reject anything else.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("stage {stage} out of range (0..{})", stage::N_STAGES)]
    StageOutOfRange { stage: usize },

    #[error("stage {stage} is not terminal")]
    NotTerminal { stage: usize },

    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot encoding: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    priority: i64,
    job: Job,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    /// Per-stage entries in service order.
    queues: Vec<Vec<SnapshotEntry>>,
}

struct Inner {
    queues: Vec<PriorityQueue>,
    pause_normal: bool,
    pause_advisory: bool,
}

/// Ordered collection of exactly [`stage::N_STAGES`] priority queues behind a
/// single lock.
///
/// The last two stages are terminal: [`StepQueue::take_normal`] never serves
/// them, and [`StepQueue::take_terminal`] serves nothing else. Construction
/// restores any snapshot left by a previous process; corrupt or absent
/// snapshots are logged and ignored, never fatal.
pub struct StepQueue {
    inner: Mutex<Inner>,
    snapshot_dir: PathBuf,
}

impl StepQueue {
    /// Queue persisting under the OS temp directory.
    pub fn new() -> Self {
        Self::with_snapshot_dir(std::env::temp_dir().join(SNAPSHOT_SUBDIR))
    }

    /// Queue persisting under an explicit directory.
    pub fn with_snapshot_dir(dir: impl Into<PathBuf>) -> Self {
        let queue = Self {
            inner: Mutex::new(Inner {
                queues: (0..stage::N_STAGES).map(|_| PriorityQueue::new()).collect(),
                pause_normal: false,
                pause_advisory: false,
            }),
            snapshot_dir: dir.into(),
        };
        queue.restore();
        queue
    }

    fn snapshot_path(&self) -> PathBuf {
        self.snapshot_dir.join(SNAPSHOT_FILE)
    }

    /// Place a job in the queue for `stage` and wake both worker populations.
    pub fn enqueue(&self, stage_idx: usize, job: Job, priority: i64) -> Result<(), SchedulerError> {
        if stage_idx >= stage::N_STAGES {
            return Err(SchedulerError::StageOutOfRange { stage: stage_idx });
        }
        let mut inner = self.inner.lock();
        inner.queues[stage_idx].push(job, priority);
        inner.pause_normal = false;
        inner.pause_advisory = false;
        Ok(())
    }

    /// Pop one job from the fullest non-terminal stage; ties go to the lowest
    /// index. Returns `None` and raises the normal pause flag when every
    /// non-terminal stage is empty.
    pub fn take_normal(&self) -> Option<(usize, Job)> {
        let mut inner = self.inner.lock();

        let mut chosen = None;
        let mut longest = 0;
        for (idx, queue) in inner.queues[..stage::ADVISORY].iter().enumerate() {
            if queue.len() > longest {
                longest = queue.len();
                chosen = Some(idx);
            }
        }

        if let Some(stage_idx) = chosen {
            if let Some(job) = inner.queues[stage_idx].pop() {
                return Some((stage_idx, job));
            }
        }

        inner.pause_normal = true;
        None
    }

    /// Pop one job from a terminal stage queue. Returns `None` and raises the
    /// advisory pause flag when that queue is empty.
    pub fn take_terminal(&self, stage_idx: usize) -> Result<Option<(usize, Job)>, SchedulerError> {
        if stage_idx >= stage::N_STAGES {
            return Err(SchedulerError::StageOutOfRange { stage: stage_idx });
        }
        if !stage::is_terminal(stage_idx) {
            return Err(SchedulerError::NotTerminal { stage: stage_idx });
        }

        let mut inner = self.inner.lock();
        if let Some(job) = inner.queues[stage_idx].pop() {
            return Ok(Some((stage_idx, job)));
        }
        inner.pause_advisory = true;
        Ok(None)
    }

    pub fn normal_paused(&self) -> bool {
        self.inner.lock().pause_normal
    }

    pub fn advisory_paused(&self) -> bool {
        self.inner.lock().pause_advisory
    }

    /// Jobs currently queued across all stages.
    pub fn total_len(&self) -> usize {
        self.inner.lock().queues.iter().map(PriorityQueue::len).sum()
    }

    /// Serialize the queue contents atomically to the snapshot file. Written
    /// under the lock; readers never observe a partial document because the
    /// temp file is renamed over the old snapshot in one step.
    pub fn snapshot(&self) -> Result<(), SchedulerError> {
        let inner = self.inner.lock();
        let document = SnapshotFile {
            version: SNAPSHOT_VERSION,
            queues: inner
                .queues
                .iter()
                .map(|queue| {
                    queue
                        .entries_in_order()
                        .into_iter()
                        .map(|(priority, job)| SnapshotEntry { priority, job })
                        .collect()
                })
                .collect(),
        };

        fs::create_dir_all(&self.snapshot_dir)?;
        let tmp = self.snapshot_dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec(&document)?)?;
        fs::rename(&tmp, self.snapshot_path())?;
        Ok(())
    }

    /// Delete the snapshot file; in-memory queues are untouched.
    pub fn clear(&self) -> Result<(), SchedulerError> {
        let _inner = self.inner.lock();
        let path = self.snapshot_path();
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Load queue contents from the snapshot file, if one exists. Called once
    /// at construction.
    fn restore(&self) {
        let path = self.snapshot_path();
        if !path.exists() {
            info!("no queue snapshot found");
            return;
        }

        info!(path = %path.display(), "restoring queue snapshot");
        match Self::read_snapshot(&path) {
            Ok(document) => {
                let mut inner = self.inner.lock();
                for (stage_idx, entries) in
                    document.queues.into_iter().take(stage::N_STAGES).enumerate()
                {
                    for entry in entries {
                        inner.queues[stage_idx].push(entry.job, entry.priority);
                    }
                }
                let restored: usize = inner.queues.iter().map(PriorityQueue::len).sum();
                info!(jobs = restored, "queue snapshot restored");
            }
            Err(err) => {
                warn!(error = %err, "queue snapshot unreadable, starting empty");
            }
        }
    }

    fn read_snapshot(path: &Path) -> Result<SnapshotFile, SchedulerError> {
        let raw = fs::read(path)?;
        let document: SnapshotFile = serde_json::from_slice(&raw)?;
        if document.version != SNAPSHOT_VERSION {
            return Err(SchedulerError::Encoding(serde::de::Error::custom(format!(
                "unknown snapshot version {}",
                document.version
            ))));
        }
        Ok(document)
    }
}

impl Default for StepQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(user_id: i64) -> Job {
        Job::new(1, "cat", user_id, "/tmp/ws")
    }

    fn fresh_queue() -> (StepQueue, TempDir) {
        let dir = TempDir::new().unwrap();
        let queue = StepQueue::with_snapshot_dir(dir.path());
        (queue, dir)
    }

    #[test]
    fn enqueue_bounds_checked() {
        let (queue, _dir) = fresh_queue();
        assert!(queue.enqueue(stage::N_STAGES, job(1), DEFAULT_PRIORITY).is_err());
        assert!(queue.enqueue(0, job(1), DEFAULT_PRIORITY).is_ok());
    }

    #[test]
    fn take_normal_prefers_longest_queue() {
        let (queue, _dir) = fresh_queue();
        queue.enqueue(0, job(1), DEFAULT_PRIORITY).unwrap();
        queue.enqueue(2, job(2), DEFAULT_PRIORITY).unwrap();
        queue.enqueue(2, job(3), DEFAULT_PRIORITY).unwrap();

        let (stage_idx, taken) = queue.take_normal().unwrap();
        assert_eq!(stage_idx, 2);
        assert_eq!(taken.user_id, 2);
    }

    #[test]
    fn take_normal_breaks_ties_to_lowest_index() {
        let (queue, _dir) = fresh_queue();
        queue.enqueue(1, job(1), DEFAULT_PRIORITY).unwrap();
        queue.enqueue(3, job(2), DEFAULT_PRIORITY).unwrap();

        let (stage_idx, _) = queue.take_normal().unwrap();
        assert_eq!(stage_idx, 1);
    }

    #[test]
    fn take_normal_never_serves_terminal_stages() {
        let (queue, _dir) = fresh_queue();
        queue.enqueue(stage::ADVISORY, job(1), DEFAULT_PRIORITY).unwrap();
        queue.enqueue(stage::DELIVERY, job(2), DEFAULT_PRIORITY).unwrap();

        assert!(queue.take_normal().is_none());
        assert!(queue.normal_paused());
    }

    #[test]
    fn take_terminal_requires_terminal_stage() {
        let (queue, _dir) = fresh_queue();
        assert!(matches!(
            queue.take_terminal(stage::TESTING),
            Err(SchedulerError::NotTerminal { stage: 2 })
        ));
        assert!(matches!(
            queue.take_terminal(stage::N_STAGES),
            Err(SchedulerError::StageOutOfRange { .. })
        ));
    }

    #[test]
    fn take_terminal_drains_and_pauses() {
        let (queue, _dir) = fresh_queue();
        queue.enqueue(stage::ADVISORY, job(1), DEFAULT_PRIORITY).unwrap();

        let (stage_idx, taken) = queue.take_terminal(stage::ADVISORY).unwrap().unwrap();
        assert_eq!(stage_idx, stage::ADVISORY);
        assert_eq!(taken.user_id, 1);

        assert!(queue.take_terminal(stage::ADVISORY).unwrap().is_none());
        assert!(queue.advisory_paused());
    }

    #[test]
    fn enqueue_clears_pause_flags() {
        let (queue, _dir) = fresh_queue();
        assert!(queue.take_normal().is_none());
        assert!(queue.take_terminal(stage::DELIVERY).unwrap().is_none());
        assert!(queue.normal_paused());
        assert!(queue.advisory_paused());

        queue.enqueue(0, job(1), DEFAULT_PRIORITY).unwrap();
        assert!(!queue.normal_paused());
        assert!(!queue.advisory_paused());
    }

    #[test]
    fn multiset_is_conserved() {
        let (queue, _dir) = fresh_queue();
        for user in 0..10 {
            queue.enqueue((user % 4) as usize, job(user), DEFAULT_PRIORITY).unwrap();
        }
        assert_eq!(queue.total_len(), 10);

        let mut taken = 0;
        while queue.take_normal().is_some() {
            taken += 1;
        }
        assert_eq!(taken, 10);
        assert_eq!(queue.total_len(), 0);
    }

    #[test]
    fn priority_order_within_a_stage() {
        let (queue, _dir) = fresh_queue();
        queue.enqueue(0, job(1), 9).unwrap();
        queue.enqueue(0, job(2), 1).unwrap();
        queue.enqueue(0, job(3), 9).unwrap();

        let order: Vec<i64> = std::iter::from_fn(|| queue.take_normal())
            .map(|(_, j)| j.user_id)
            .collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn snapshot_restore_round_trips_service_order() {
        let dir = TempDir::new().unwrap();

        let queue = StepQueue::with_snapshot_dir(dir.path());
        queue.enqueue(0, job(1), 5).unwrap();
        queue.enqueue(0, job(2), 1).unwrap();
        queue.enqueue(2, job(3), 5).unwrap();
        queue.enqueue(stage::ADVISORY, job(5), 5).unwrap();
        queue.enqueue(stage::DELIVERY, job(4), 5).unwrap();
        queue.snapshot().unwrap();

        let restored = StepQueue::with_snapshot_dir(dir.path());
        assert_eq!(restored.total_len(), 5);

        // Stage 0 still serves priority 1 before priority 5.
        let (stage_idx, first) = restored.take_normal().unwrap();
        assert_eq!((stage_idx, first.user_id), (0, 2));
        let (_, second) = restored.take_normal().unwrap();
        assert_eq!(second.user_id, 1);
        let (stage_idx, third) = restored.take_normal().unwrap();
        assert_eq!((stage_idx, third.user_id), (2, 3));

        let (_, advisory) = restored.take_terminal(stage::ADVISORY).unwrap().unwrap();
        assert_eq!(advisory.user_id, 5);
        let (_, delivery) = restored.take_terminal(stage::DELIVERY).unwrap().unwrap();
        assert_eq!(delivery.user_id, 4);
    }

    #[test]
    fn restore_survives_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), b"not json at all").unwrap();

        let queue = StepQueue::with_snapshot_dir(dir.path());
        assert_eq!(queue.total_len(), 0);
    }

    #[test]
    fn restore_rejects_unknown_version() {
        let dir = TempDir::new().unwrap();
        let doc = serde_json::json!({
            "version": 99,
            "queues": [[], [], [], [], [], []],
        });
        fs::write(dir.path().join(SNAPSHOT_FILE), doc.to_string()).unwrap();

        let queue = StepQueue::with_snapshot_dir(dir.path());
        assert_eq!(queue.total_len(), 0);
    }

    #[test]
    fn clear_removes_the_snapshot_file_only() {
        let dir = TempDir::new().unwrap();
        let queue = StepQueue::with_snapshot_dir(dir.path());
        queue.enqueue(0, job(1), DEFAULT_PRIORITY).unwrap();
        queue.snapshot().unwrap();
        assert!(dir.path().join(SNAPSHOT_FILE).exists());

        queue.clear().unwrap();
        assert!(!dir.path().join(SNAPSHOT_FILE).exists());
        // In-memory contents untouched.
        assert_eq!(queue.total_len(), 1);
    }
}
