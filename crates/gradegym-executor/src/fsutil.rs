//! Directory-walking helpers shared by the detection and test stages.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// First file named `name` under `root`, depth-first.
pub(crate) fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .find(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
}

/// Every `.java` file under `root`.
pub(crate) fn java_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "java")
        })
        .map(|entry| entry.into_path())
        .collect()
}
