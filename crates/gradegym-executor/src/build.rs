//! Stage 1: project-kind detection and compilation.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{info, warn};

use gradegym_core::{Job, ProjectKind, Result, stage, text};

use crate::fsutil;

/// Bytes of combined compiler output kept for the user.
const COMPILE_OUTPUT_BYTES: usize = 1000;

const UNKNOWN_PROJECT_TEXT: &str = "project type could not be determined";
const NO_SOURCES_TEXT: &str = "no source files";

/// Outcome of scanning the user submission for a build fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Detection {
    /// Directory containing `build.xml`.
    Ant(PathBuf),
    /// Directory containing `pom.xml`.
    Maven(PathBuf),
    /// The single `.java` source.
    SingleFile(PathBuf),
    NoSources,
    Unknown,
}

/// Detection precedence: `build.xml` anywhere wins, then `pom.xml`, then a
/// lone `.java` file.
pub fn detect(user_dir: &Path) -> Detection {
    if let Some(build_xml) = fsutil::find_file(user_dir, "build.xml") {
        return Detection::Ant(parent_of(&build_xml, user_dir));
    }
    if let Some(pom_xml) = fsutil::find_file(user_dir, "pom.xml") {
        return Detection::Maven(parent_of(&pom_xml, user_dir));
    }

    let mut sources = fsutil::java_files(user_dir);
    match sources.len() {
        0 => Detection::NoSources,
        1 => Detection::SingleFile(sources.remove(0)),
        _ => Detection::Unknown,
    }
}

fn parent_of(file: &Path, fallback: &Path) -> PathBuf {
    file.parent().map_or_else(|| fallback.to_path_buf(), Path::to_path_buf)
}

pub async fn run(job: &mut Job) -> Result<usize> {
    let user_dir = job.user_dir();

    let (kind, mut invocation) = match detect(&user_dir) {
        Detection::Ant(dir) => (ProjectKind::Ant, ant_compile(dir)),
        Detection::Maven(dir) => (ProjectKind::Maven, maven_compile(dir)),
        Detection::SingleFile(source) => {
            job.entry_files = vec![source.clone()];
            (ProjectKind::SingleFile, javac_compile(&user_dir, source))
        }
        Detection::NoSources => {
            job.mark_broken(NO_SOURCES_TEXT);
            return Ok(stage::ADVISORY);
        }
        Detection::Unknown => {
            job.mark_broken(UNKNOWN_PROJECT_TEXT);
            return Ok(stage::ADVISORY);
        }
    };
    job.project_kind = Some(kind);

    info!(user = job.user_id, kind = %kind, "compiling submission");
    let output = invocation.output().await?;
    if !output.status.success() {
        warn!(
            user = job.user_id,
            kind = %kind,
            code = output.status.code(),
            "compilation failed"
        );
        let combined = combined_output(&output);
        job.mark_broken(text::tail(&combined, COMPILE_OUTPUT_BYTES).to_string());
        return Ok(stage::ADVISORY);
    }

    Ok(stage::TESTING)
}

fn ant_compile(dir: PathBuf) -> Command {
    let mut cmd = Command::new("ant");
    cmd.current_dir(dir);
    cmd
}

fn maven_compile(dir: PathBuf) -> Command {
    let mut cmd = Command::new("mvn");
    cmd.arg("verify").current_dir(dir);
    cmd
}

fn javac_compile(user_dir: &Path, source: PathBuf) -> Command {
    let mut cmd = Command::new("javac");
    cmd.arg("-d").arg(user_dir.join("build")).arg(source);
    cmd
}

/// Stdout followed by stderr, lossily decoded.
pub(crate) fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn build_xml_wins_over_everything() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "proj/build.xml", "<project/>");
        write(dir.path(), "proj/pom.xml", "<project/>");
        write(dir.path(), "proj/src/Main.java", "class Main {}");

        match detect(dir.path()) {
            Detection::Ant(root) => assert!(root.ends_with("proj")),
            other => panic!("expected Ant, got {other:?}"),
        }
    }

    #[test]
    fn pom_xml_wins_over_sources() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "proj/pom.xml", "<project/>");
        write(dir.path(), "proj/src/Main.java", "class Main {}");

        match detect(dir.path()) {
            Detection::Maven(root) => assert!(root.ends_with("proj")),
            other => panic!("expected Maven, got {other:?}"),
        }
    }

    #[test]
    fn a_single_java_file_is_single_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Sol.java", "class Sol {}");

        match detect(dir.path()) {
            Detection::SingleFile(path) => assert!(path.ends_with("Sol.java")),
            other => panic!("expected SingleFile, got {other:?}"),
        }
    }

    #[test]
    fn several_loose_java_files_are_unknown() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "A.java", "class A {}");
        write(dir.path(), "B.java", "class B {}");

        assert_eq!(detect(dir.path()), Detection::Unknown);
    }

    #[test]
    fn empty_submission_has_no_sources() {
        let dir = TempDir::new().unwrap();
        assert_eq!(detect(dir.path()), Detection::NoSources);
    }

    #[tokio::test]
    async fn unknown_project_routes_to_advisory() {
        let workspace = TempDir::new().unwrap();
        let mut job = Job::new(1, "cat", 42, workspace.path());
        fs::create_dir_all(job.user_dir()).unwrap();
        write(&job.user_dir(), "A.java", "class A {}");
        write(&job.user_dir(), "B.java", "class B {}");

        let next = run(&mut job).await.unwrap();
        assert_eq!(next, stage::ADVISORY);
        assert!(job.broken);
        assert_eq!(job.text_content, UNKNOWN_PROJECT_TEXT);
        assert!(job.project_kind.is_none());
    }

    #[tokio::test]
    async fn missing_sources_route_to_advisory() {
        let workspace = TempDir::new().unwrap();
        let mut job = Job::new(1, "cat", 42, workspace.path());
        fs::create_dir_all(job.user_dir()).unwrap();

        let next = run(&mut job).await.unwrap();
        assert_eq!(next, stage::ADVISORY);
        assert_eq!(job.text_content, NO_SOURCES_TEXT);
    }

    /// Requires a JDK on PATH; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn compiles_a_single_file_project() {
        let workspace = TempDir::new().unwrap();
        let mut job = Job::new(1, "cat", 42, workspace.path());
        write(
            &job.user_dir(),
            "Sol.java",
            "public class Sol { public static void main(String[] a) { System.out.println(42); } }",
        );

        let next = run(&mut job).await.unwrap();
        assert_eq!(next, stage::TESTING);
        assert!(!job.broken);
        assert_eq!(job.project_kind, Some(ProjectKind::SingleFile));
        assert!(job.user_dir().join("build/Sol.class").is_file());
    }

    /// Requires a JDK on PATH; run with `cargo test -- --ignored`.
    #[tokio::test]
    #[ignore]
    async fn syntax_error_is_reported_to_the_user() {
        let workspace = TempDir::new().unwrap();
        let mut job = Job::new(1, "cat", 42, workspace.path());
        write(&job.user_dir(), "Sol.java", "public class Sol { this will not compile");

        let next = run(&mut job).await.unwrap();
        assert_eq!(next, stage::ADVISORY);
        assert!(job.broken);
        assert!(!job.text_content.is_empty());
        assert!(job.text_content.len() <= 1000);
    }
}
