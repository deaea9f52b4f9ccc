//! The job record and the delivery payload derived from it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Build toolchain detected for a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectKind {
    Ant,
    Maven,
    SingleFile,
}

impl std::fmt::Display for ProjectKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectKind::Ant => write!(f, "ant"),
            ProjectKind::Maven => write!(f, "maven"),
            ProjectKind::SingleFile => write!(f, "single_file"),
        }
    }
}

/// Per-submission state carried through the pipeline.
///
/// Created by the ingress listener, re-enqueued stage after stage, and only
/// destroyed once the delivery loop has shipped it and removed its workspace.
/// `broken` is sticky: a handler may set it but must never clear it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub exercise_id: i64,
    pub category: String,
    pub user_id: i64,
    /// Scratch directory holding the `{user_id}/` submission subtree and the
    /// `job_data/` subtree created during extraction.
    pub workspace_path: PathBuf,
    #[serde(default)]
    pub project_kind: Option<ProjectKind>,
    /// Discovered `.java` sources, only populated for `SingleFile` projects.
    #[serde(default)]
    pub entry_files: Vec<PathBuf>,
    #[serde(default)]
    pub broken: bool,
    /// User-facing diagnostic for the most recent failure; last writer wins.
    #[serde(default)]
    pub text_content: String,
    #[serde(default)]
    pub advisory: String,
    /// Percent deviation from the required pattern count; 0.0 means the
    /// requirement is met exactly, negative means deficit.
    #[serde(default)]
    pub abstraction_score: Option<f64>,
    #[serde(default)]
    pub banned_matches: Option<Vec<String>>,
}

impl Job {
    pub fn new(
        exercise_id: i64,
        category: impl Into<String>,
        user_id: i64,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            exercise_id,
            category: category.into(),
            user_id,
            workspace_path: workspace_path.into(),
            project_kind: None,
            entry_files: Vec::new(),
            broken: false,
            text_content: String::new(),
            advisory: String::new(),
            abstraction_score: None,
            banned_matches: None,
        }
    }

    /// Directory holding the user submission.
    pub fn user_dir(&self) -> PathBuf {
        self.workspace_path.join(self.user_id.to_string())
    }

    /// Directory holding exercise-provided material (test cases, analysis
    /// definition), created during extraction.
    pub fn data_dir(&self) -> PathBuf {
        self.workspace_path.join("job_data")
    }

    /// Record a user-visible failure. `broken` stays set for the rest of the
    /// job's life.
    pub fn mark_broken(&mut self, text: impl Into<String>) {
        self.broken = true;
        self.text_content = text.into();
    }

    /// Names of structurally missing fields, empty when the job can be
    /// serialized for delivery. A non-empty result after a restart means the
    /// restored state is corrupt and the process must clear the snapshot and
    /// exit.
    pub fn validate(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.category.trim().is_empty() {
            missing.push("category");
        }
        if self.workspace_path == Path::new("") {
            missing.push("workspace_path");
        }
        missing
    }

    /// Public fields shipped to the result sink.
    pub fn payload(&self) -> DeliveryPayload {
        DeliveryPayload {
            user_id: self.user_id,
            exercise_id: self.exercise_id,
            project_kind: self.project_kind.map(|k| k.to_string()),
            category: self.category.clone(),
            broken: self.broken,
            text_content: self.text_content.clone(),
            advisory: self.advisory.clone(),
            abstraction_score: self.abstraction_score,
            banned_matches: self.banned_matches.clone(),
        }
    }
}

/// Verdict shipped to the result sink for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub user_id: i64,
    pub exercise_id: i64,
    pub project_kind: Option<String>,
    pub category: String,
    pub broken: bool,
    pub text_content: String,
    pub advisory: String,
    pub abstraction_score: Option<f64>,
    pub banned_matches: Option<Vec<String>>,
}
