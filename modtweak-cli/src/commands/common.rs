use std::{
    fmt,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{bail, Context};
use modtweak::PeImage;

/// Set by the Ctrl+C handler; commands stop at the next step boundary.
static CANCELLED: AtomicBool = AtomicBool::new(false);

/// Returned when a command stops because of Ctrl+C.
#[derive(Debug)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Request cancellation; called from the Ctrl+C handler.
pub fn cancel() {
    CANCELLED.store(true, Ordering::SeqCst);
}

/// Fail with [`Cancelled`] if Ctrl+C was pressed.
///
/// Called between steps, so a commit in progress always finishes or cleans up its temporary
/// file before the process exits.
pub fn ensure_not_cancelled() -> anyhow::Result<()> {
    if CANCELLED.load(Ordering::SeqCst) {
        return Err(Cancelled.into());
    }
    Ok(())
}

/// Load a module, failing early with a readable message if it does not exist.
pub fn load_module(path: &Path) -> anyhow::Result<PeImage> {
    ensure_exists(path, "module")?;
    PeImage::load(path).with_context(|| format!("failed to load module: {}", path.display()))
}

/// Fail with `what does not exist: <path>` if nothing is at `path`.
pub fn ensure_exists(path: &Path, what: &str) -> anyhow::Result<()> {
    if !path.exists() {
        bail!("{what} does not exist: {}", path.display());
    }
    Ok(())
}

/// Collect all `.json` files recursively from a directory.
pub fn collect_manifests(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_manifests_recursive(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_manifests_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_manifests_recursive(&path, files)?;
        } else if is_manifest_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Returns true if the path has a `.json` extension.
pub fn is_manifest_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Extract a display-friendly filename from a path.
pub fn file_display_name(path: &Path) -> String {
    path.file_name().map_or_else(
        || path.display().to_string(),
        |f| f.to_string_lossy().to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_nested_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("minecraft").join("world");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(nested.join("a.JSON"), "{}").unwrap();
        std::fs::write(nested.join("notes.txt"), "").unwrap();

        let files = collect_manifests(dir.path()).unwrap();
        let names: Vec<_> = files.iter().map(|f| file_display_name(f)).collect();
        assert_eq!(files.len(), 2);
        assert!(names.contains(&"a.JSON".to_string()));
        assert!(names.contains(&"b.json".to_string()));
    }

    #[test]
    fn cancellation_stops_at_the_next_check() {
        assert!(ensure_not_cancelled().is_ok());

        cancel();
        let error = ensure_not_cancelled().unwrap_err();
        assert!(error.is::<Cancelled>());

        CANCELLED.store(false, Ordering::SeqCst);
        assert!(ensure_not_cancelled().is_ok());
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_manifests(&dir.path().join("missing")).is_err());
        assert!(ensure_exists(&dir.path().join("missing"), "symbols directory").is_err());
    }
}
