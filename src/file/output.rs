//! Memory-mapped output file for committing patched images.
//!
//! An [`crate::file::output::Output`] is created at its final size, filled through the mapping
//! and then finalized. An output that is dropped without being finalized removes its file, so a
//! failed commit never leaves a partially written image on disk.

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A writable, memory-mapped file that deletes itself unless finalized.
pub struct Output {
    /// The mapping backing the file contents
    mmap: MmapMut,

    /// Location of the file on disk
    target_path: PathBuf,

    /// Set once the contents have been flushed and the file should be kept
    finalized: bool,
}

impl Output {
    /// Create (or truncate) the file at `target_path` with `size` bytes and map it.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if the file cannot be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();

        if size == 0 {
            return Err(Error::WriteFailed {
                message: format!("Refusing to write empty image to {}", target_path.display()),
            });
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target_path)
            .map_err(|e| Error::WriteFailed {
                message: format!("Failed to create {}: {e}", target_path.display()),
            })?;

        file.set_len(size).map_err(|e| Error::WriteFailed {
            message: format!("Failed to set file size: {e}"),
        })?;

        // The file was just created by us and is not shared with another mapping.
        let mmap = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .map_err(|e| Error::WriteFailed {
                    message: format!("Failed to create memory mapping: {e}"),
                })?
        };

        Ok(Self {
            mmap,
            target_path,
            finalized: false,
        })
    }

    /// Copy `data` into the file at `offset`.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if the write would exceed the file size.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| Error::WriteFailed {
            message: format!("Offset {offset} does not fit the address space"),
        })?;
        let end = start.checked_add(data.len()).unwrap_or(usize::MAX);

        if end > self.mmap.len() {
            return Err(Error::WriteFailed {
                message: format!(
                    "Write would exceed file size: offset={}, len={}, file_size={}",
                    offset,
                    data.len(),
                    self.mmap.len()
                ),
            });
        }

        self.mmap[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Size of the mapped file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Flush pending writes to disk.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.mmap.flush().map_err(|e| Error::WriteFailed {
            message: format!("Failed to flush memory mapping: {e}"),
        })
    }

    /// Flush the contents and keep the file.
    ///
    /// # Errors
    /// Returns [`crate::Error::WriteFailed`] if the flush fails; the file is then removed.
    pub fn finalize(mut self) -> Result<PathBuf> {
        self.flush()?;
        self.finalized = true;
        Ok(self.target_path.clone())
    }

    /// Location of the file on disk.
    #[must_use]
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = std::fs::remove_file(&self.target_path);
        }
    }
}
