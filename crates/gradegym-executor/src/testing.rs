//! Stage 2: run the compiled project once per test case, feeding inputs on
//! stdin and matching expected outputs against the combined output.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use gradegym_core::{Error, Job, ProjectKind, Result, stage, text};

use crate::build::combined_output;
use crate::fsutil;

/// Bytes of program output kept in a failure diagnostic.
const RUN_OUTPUT_BYTES: usize = 600;
/// Per-test-case wall clock limit.
const RUN_TIMEOUT: Duration = Duration::from_secs(30);
/// Maven spends extra time resolving the exec plugin.
const MAVEN_RUN_TIMEOUT: Duration = Duration::from_secs(60);

const TIMEOUT_TEXT: &str = "took too long";
const NO_MAIN_TEXT: &str = "the project does not contain a Main.java entry point";
const TEST_FILE: &str = "test_cases.json";

#[derive(Debug, Deserialize)]
struct TestFile {
    #[serde(default)]
    test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// One resolved run command; respawned for every test case.
struct Invocation {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
}

impl Invocation {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).current_dir(&self.cwd);
        cmd
    }
}

enum CaseOutcome {
    Output(String),
    Failed(String),
    TimedOut,
}

pub async fn run(job: &mut Job) -> Result<usize> {
    let raw = tokio::fs::read_to_string(job.data_dir().join(TEST_FILE)).await?;
    let tests: TestFile = serde_json::from_str(&raw)
        .map_err(|err| Error::InvalidInput(format!("{TEST_FILE}: {err}")))?;

    let kind = job
        .project_kind
        .ok_or_else(|| Error::Internal("test execution before detection".to_string()))?;

    let invocation = match resolve_invocation(kind, job) {
        Ok(invocation) => invocation,
        Err(RunSetupFailure::MissingMain) => {
            job.mark_broken(NO_MAIN_TEXT);
            return Ok(stage::ADVISORY);
        }
        Err(RunSetupFailure::Infra(err)) => return Err(err),
    };
    let limit = match kind {
        ProjectKind::Maven => MAVEN_RUN_TIMEOUT,
        _ => RUN_TIMEOUT,
    };

    for (index, case) in tests.test_cases.iter().enumerate() {
        match exec_case(&invocation, case, limit).await? {
            CaseOutcome::TimedOut => {
                warn!(user = job.user_id, case = index, "test run exceeded its time limit");
                job.mark_broken(TIMEOUT_TEXT);
                return Ok(stage::DELIVERY);
            }
            CaseOutcome::Failed(output) => {
                job.mark_broken(format!(
                    "the program exited with an error:\n{}",
                    truncated(&output, RUN_OUTPUT_BYTES)
                ));
                return Ok(stage::ADVISORY);
            }
            CaseOutcome::Output(output) => {
                let obtained = match kind {
                    ProjectKind::Ant => filter_ant_output(&output),
                    _ => output,
                };
                if !compare_results(&case.outputs, &obtained) {
                    job.mark_broken(mismatch_diagnostic(index, case, &obtained));
                    return Ok(stage::ADVISORY);
                }
            }
        }
    }

    info!(user = job.user_id, total = tests.test_cases.len(), "all test cases passed");
    job.text_content = format!("all tests passed, {} total", tests.test_cases.len());
    Ok(stage::ANALYSIS)
}

enum RunSetupFailure {
    /// Maven project without a Main.java; a user failure.
    MissingMain,
    Infra(Error),
}

fn resolve_invocation(kind: ProjectKind, job: &Job) -> std::result::Result<Invocation, RunSetupFailure> {
    let user_dir = job.user_dir();
    match kind {
        ProjectKind::Ant => {
            let build_xml = fsutil::find_file(&user_dir, "build.xml").ok_or_else(|| {
                RunSetupFailure::Infra(Error::Internal("build.xml vanished after compilation".to_string()))
            })?;
            Ok(Invocation {
                program: "ant".to_string(),
                args: vec!["run".to_string()],
                cwd: build_xml.parent().unwrap_or(&user_dir).to_path_buf(),
            })
        }
        ProjectKind::Maven => {
            let pom_xml = fsutil::find_file(&user_dir, "pom.xml").ok_or_else(|| {
                RunSetupFailure::Infra(Error::Internal("pom.xml vanished after compilation".to_string()))
            })?;
            let main = fsutil::find_file(&user_dir, "Main.java")
                .ok_or(RunSetupFailure::MissingMain)?;
            let class_ref = main_class_reference(&main);
            Ok(Invocation {
                program: "mvn".to_string(),
                args: vec![
                    "-q".to_string(),
                    "exec:java".to_string(),
                    format!("-Dexec.mainClass={class_ref}"),
                ],
                cwd: pom_xml.parent().unwrap_or(&user_dir).to_path_buf(),
            })
        }
        ProjectKind::SingleFile => {
            let entry = job.entry_files.first().ok_or_else(|| {
                RunSetupFailure::Infra(Error::Internal("single-file project without an entry file".to_string()))
            })?;
            Ok(Invocation {
                program: "java".to_string(),
                args: vec![entry.to_string_lossy().into_owned()],
                cwd: job.workspace_path.clone(),
            })
        }
    }
}

/// `{parent_dir_name}.Main` for a discovered `Main.java`.
fn main_class_reference(main_java: &std::path::Path) -> String {
    let package = main_java
        .parent()
        .and_then(|dir| dir.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{package}.Main")
}

async fn exec_case(invocation: &Invocation, case: &TestCase, limit: Duration) -> Result<CaseOutcome> {
    let mut cmd = invocation.command();
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        for input in &case.inputs {
            stdin.write_all(input.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
        }
        // Dropping closes the pipe so a Scanner at EOF does not hang.
    }

    match timeout(limit, child.wait_with_output()).await {
        // kill_on_drop reaps the child when the elapsed future wins.
        Err(_) => Ok(CaseOutcome::TimedOut),
        Ok(output) => {
            let output = output?;
            let combined = combined_output(&output);
            if output.status.success() {
                Ok(CaseOutcome::Output(combined))
            } else {
                Ok(CaseOutcome::Failed(combined))
            }
        }
    }
}

/// Ant wraps program output in its own logging; keep only `[java]` lines,
/// with the tag stripped.
pub fn filter_ant_output(output: &str) -> String {
    output
        .lines()
        .filter_map(|line| {
            line.trim_start()
                .strip_prefix("[java]")
                .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lenient output matcher: every expected value must appear in the obtained
/// text, case-insensitively and bounded by non-word characters; each match is
/// consumed before the next expected value is searched. Extraneous output
/// around matches is permitted.
pub fn compare_results(expected: &[String], obtained: &str) -> bool {
    let mut remaining = obtained.to_string();
    for value in expected {
        match find_bounded(&remaining, value) {
            Some(range) => {
                remaining.replace_range(range, "");
            }
            None => return false,
        }
    }
    true
}

fn find_bounded(haystack: &str, needle: &str) -> Option<std::ops::Range<usize>> {
    if needle.is_empty() {
        return Some(0..0);
    }
    // The needle is escaped, so the pattern always compiles.
    let pattern = Regex::new(&format!("(?i){}", regex::escape(needle))).ok()?;
    for found in pattern.find_iter(haystack) {
        let before = haystack[..found.start()].chars().next_back();
        let after = haystack[found.end()..].chars().next();
        if !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char) {
            return Some(found.range());
        }
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn truncated(output: &str, limit: usize) -> String {
    if output.len() > limit {
        format!("[truncated] {}", text::tail(output, limit))
    } else {
        output.to_string()
    }
}

fn mismatch_diagnostic(index: usize, case: &TestCase, obtained: &str) -> String {
    format!(
        "test case {} failed ({} passed before it).\nInput given: {:?}\nExpected output: {:?}\nObtained output: {}",
        index + 1,
        index,
        case.inputs,
        case.outputs,
        truncated(obtained, RUN_OUTPUT_BYTES),
    )
}
