//! Writing a patched image back to disk.
//!
//! The new image is first written to a temporary file next to the destination. Only when that
//! succeeded is the original backed up (for in-place commits) and the temporary file renamed over
//! the destination, so an interrupted commit leaves either the old or the new image in place.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use crate::{file::output::Output, Error, Result};

/// Suffix appended to the original file name for the backup copy.
pub const DEFAULT_BACKUP_SUFFIX: &str = ".backup";

/// Where a commit writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitMode {
    /// Replace the source file, keeping a copy of the original at `<path><backup_suffix>`
    InPlace {
        /// Suffix of the backup file name
        backup_suffix: String,
    },
    /// Write to a separate file and leave the source untouched
    To(PathBuf),
}

impl Default for CommitMode {
    fn default() -> Self {
        CommitMode::InPlace {
            backup_suffix: DEFAULT_BACKUP_SUFFIX.to_string(),
        }
    }
}

/// `path` with `suffix` appended to its file name.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(OsString::new, ToOwned::to_owned);
    name.push(suffix);
    path.with_file_name(name)
}

/// Write `bytes` for the image at `path` according to `mode` and return the written path.
///
/// # Errors
/// Returns [`crate::Error::WriteFailed`] if the temporary file cannot be written or moved into
/// place, and [`crate::Error::BackupFailed`] if the original cannot be copied; the destination is
/// untouched in both cases.
pub fn commit_image(path: &Path, bytes: &[u8], mode: &CommitMode) -> Result<PathBuf> {
    let destination = match mode {
        CommitMode::InPlace { .. } => path.to_path_buf(),
        CommitMode::To(output) => output.clone(),
    };

    let temporary = with_suffix(&destination, ".tmp");
    let mut output = Output::create(&temporary, bytes.len() as u64)?;
    output.write_at(0, bytes)?;
    let temporary = output.finalize()?;

    if let CommitMode::InPlace { backup_suffix } = mode {
        let backup = with_suffix(path, backup_suffix);
        if let Err(source) = fs::copy(path, &backup) {
            let _ = fs::remove_file(&temporary);
            return Err(Error::BackupFailed {
                path: backup,
                source,
            });
        }
        log::info!("Backed up {} to {}", path.display(), backup.display());
    }

    if let Err(error) = fs::rename(&temporary, &destination) {
        let _ = fs::remove_file(&temporary);
        return Err(Error::WriteFailed {
            message: format!("Failed to replace {}: {error}", destination.display()),
        });
    }

    log::info!("Wrote {} bytes to {}", bytes.len(), destination.display());
    Ok(destination)
}
