use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Create a fresh temporary source tree. The caller must hold onto `TempDir`
/// to keep the directory alive.
pub fn setup_tree() -> TempDir {
    tempfile::tempdir().unwrap()
}

/// Write `contents` to `rel` under `root`, creating parent directories.
pub fn write_source(root: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, contents).unwrap();
    path
}
