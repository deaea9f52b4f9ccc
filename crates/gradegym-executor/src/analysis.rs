//! Stage 3: static pattern analysis over the submitted sources.
//!
//! Required patterns are counted literally; banned patterns are regexes.
//! The asymmetry mirrors the exercise-definition format.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use gradegym_core::{Error, Job, Result, stage};

use crate::fsutil;

const ANALYSIS_FILE: &str = "abstraction.json";

#[derive(Debug, Deserialize)]
struct AnalysisSpec {
    /// Pattern -> weight; the weights sum to the required total.
    #[serde(default)]
    required: BTreeMap<String, f64>,
    #[serde(default)]
    banned: Vec<String>,
}

pub async fn run(job: &mut Job) -> Result<usize> {
    let path = job.data_dir().join(ANALYSIS_FILE);
    let raw = match tokio::fs::read_to_string(&path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            // An exercise without analysis metadata still gets delivered.
            warn!(user = job.user_id, exercise = job.exercise_id, "no analysis spec, skipping");
            return Ok(stage::DELIVERY);
        }
        Err(err) => return Err(err.into()),
    };
    let spec: AnalysisSpec = serde_json::from_str(&raw)
        .map_err(|err| Error::InvalidInput(format!("{ANALYSIS_FILE}: {err}")))?;

    let source = collect_sources(&job.workspace_path);
    job.abstraction_score = score(&spec.required, &source);
    job.banned_matches = Some(banned_matches(&spec.banned, &source));

    info!(
        user = job.user_id,
        score = job.abstraction_score,
        banned = job.banned_matches.as_ref().map(Vec::len),
        "pattern analysis complete"
    );
    Ok(stage::DELIVERY)
}

/// Concatenated contents of every `.java` file under the workspace.
fn collect_sources(workspace: &Path) -> String {
    let mut combined = String::new();
    for path in fsutil::java_files(workspace) {
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                combined.push_str(&content);
                combined.push('\n');
            }
            Err(err) => warn!(path = %path.display(), error = %err, "unreadable source skipped"),
        }
    }
    combined
}

/// Percent deviation from the required pattern count: 0.0 means exactly met,
/// negative a deficit, positive a surplus. Unbounded in both directions.
fn score(required: &BTreeMap<String, f64>, source: &str) -> Option<f64> {
    let required_total: f64 = required.values().sum();
    if required_total <= 0.0 {
        return None;
    }
    let found_total: f64 = required
        .keys()
        .map(|pattern| source.matches(pattern.as_str()).count() as f64)
        .sum();
    Some(found_total / required_total * 100.0 - 100.0)
}

fn banned_matches(banned: &[String], source: &str) -> Vec<String> {
    let mut matches = Vec::new();
    for pattern in banned {
        match Regex::new(pattern) {
            Ok(regex) => {
                if regex.is_match(source) {
                    matches.push(pattern.clone());
                }
            }
            Err(err) => warn!(pattern = %pattern, error = %err, "unparseable banned pattern skipped"),
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn required(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn exact_requirement_scores_zero() {
        let source = "for (int i = 0; i < n; i++) {}";
        assert_eq!(score(&required(&[("for", 1.0)]), source), Some(0.0));
    }

    #[test]
    fn surplus_exceeds_one_hundred() {
        // Two occurrences against a requirement of one.
        let source = "for (...) {} for (...) {}";
        assert_eq!(score(&required(&[("for", 1.0)]), source), Some(100.0));
    }

    #[test]
    fn deficit_is_negative() {
        let source = "while (true) {}";
        assert_eq!(
            score(&required(&[("for", 2.0), ("while", 2.0)]), source),
            Some(-75.0)
        );
    }

    #[test]
    fn counting_is_literal_not_regex() {
        // A regex metacharacter in a required pattern matches literally.
        let source = "a.b a.b axb";
        assert_eq!(score(&required(&[("a.b", 2.0)]), source), Some(0.0));
    }

    #[test]
    fn empty_requirements_leave_no_score() {
        assert_eq!(score(&BTreeMap::new(), "anything"), None);
    }

    #[test]
    fn banned_patterns_are_regexes() {
        let source = "System.exit(1); // cleanup";
        let found = banned_matches(
            &["System\\.exit\\(\\d+\\)".to_string(), "Thread\\.sleep".to_string()],
            source,
        );
        assert_eq!(found, vec!["System\\.exit\\(\\d+\\)".to_string()]);
    }

    #[test]
    fn invalid_banned_patterns_are_skipped() {
        let found = banned_matches(&["[unclosed".to_string(), "exit".to_string()], "exit here");
        assert_eq!(found, vec!["exit".to_string()]);
    }

    #[tokio::test]
    async fn analyzes_workspace_sources() {
        let workspace = TempDir::new().unwrap();
        let mut job = Job::new(1, "cat", 42, workspace.path());
        fs::create_dir_all(job.user_dir()).unwrap();
        fs::create_dir_all(job.data_dir()).unwrap();
        fs::write(
            job.user_dir().join("Sol.java"),
            "class Sol { void go() { for(;;){} for(;;){} } }",
        )
        .unwrap();
        fs::write(
            job.data_dir().join(ANALYSIS_FILE),
            r#"{"required":{"for":1},"banned":[]}"#,
        )
        .unwrap();

        let next = run(&mut job).await.unwrap();
        assert_eq!(next, stage::DELIVERY);
        assert_eq!(job.abstraction_score, Some(100.0));
        assert_eq!(job.banned_matches, Some(vec![]));
        assert!(!job.broken);
    }

    #[tokio::test]
    async fn missing_spec_skips_analysis() {
        let workspace = TempDir::new().unwrap();
        let mut job = Job::new(1, "cat", 42, workspace.path());
        fs::create_dir_all(job.data_dir()).unwrap();

        let next = run(&mut job).await.unwrap();
        assert_eq!(next, stage::DELIVERY);
        assert!(job.abstraction_score.is_none());
        assert!(job.banned_matches.is_none());
    }
}
