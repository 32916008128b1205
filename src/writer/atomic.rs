//! Write-then-rename file replacement.
//!
//! Readers of the destination see either the old content or the new content,
//! never a partial write.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::writer::types::WriteError;

const PUBLIC_MODE: u32 = 0o644;
const PRIVATE_MODE: u32 = 0o600;

/// A destination file replaced atomically.
#[derive(Debug, Clone)]
pub struct AtomicFile {
    path: PathBuf,
    #[cfg_attr(not(unix), allow(dead_code))]
    mode: u32,
}

impl AtomicFile {
    /// World-readable destination (descriptors, certificate chains).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: PUBLIC_MODE,
        }
    }

    /// Owner-only destination (private keys).
    pub fn private(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: PRIVATE_MODE,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `bytes` to a temporary file next to the destination and fsync it.
    ///
    /// Creates the destination directory if needed. The live file is not
    /// touched until [`StagedWrite::commit`].
    pub fn stage(&self, bytes: &[u8]) -> Result<StagedWrite, WriteError> {
        let stage_err = |source| WriteError::Stage {
            path: self.path.clone(),
            source,
        };

        let dir = parent_dir(&self.path);
        std::fs::create_dir_all(dir).map_err(stage_err)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".reconciler-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(stage_err)?;
        temp.write_all(bytes).map_err(stage_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(self.mode))
                .map_err(stage_err)?;
        }

        temp.as_file().sync_all().map_err(stage_err)?;

        Ok(StagedWrite {
            temp,
            target: self.path.clone(),
        })
    }

    /// Stage and commit in one step.
    pub fn write(&self, bytes: &[u8]) -> Result<(), WriteError> {
        self.stage(bytes)?.commit()
    }
}

/// A fully written temporary file waiting to replace its destination.
///
/// Dropping it without committing deletes the temporary file.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        self.temp.path()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the temporary file over the destination.
    pub fn commit(self) -> Result<(), WriteError> {
        let target = self.target;
        self.temp.persist(&target).map_err(|e| WriteError::Commit {
            path: target.clone(),
            source: e.error,
        })?;

        // Persist the rename itself.
        if let Ok(dir) = File::open(parent_dir(&target)) {
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}
