//! Write-then-rename file replacement.
//!
//! A [`StagedFile`] holds complete new contents in `<target>.tmp`. Nothing at
//! `target` changes until [`StagedFile::commit`] renames it into place, and a
//! staged file dropped without a commit removes its temporary.

use crate::error::{Result, ServiceError};
use std::path::{Path, PathBuf};
use tracing::debug;

/// New contents for one file, written but not yet visible at the target path.
#[derive(Debug)]
pub struct StagedFile {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Write `bytes` beside `target`.
    ///
    /// Fails without touching anything when `target` cannot be replaced by a
    /// file (it is a directory).
    pub fn write<P: AsRef<Path>>(target: P, bytes: &[u8]) -> Result<Self> {
        let target = target.as_ref().to_path_buf();
        if target.is_dir() {
            return Err(ServiceError::io(
                &target,
                std::io::Error::other("target is a directory"),
            ));
        }

        let tmp = tmp_path(&target);
        std::fs::write(&tmp, bytes).map_err(|e| ServiceError::io(&tmp, e))?;

        Ok(Self {
            tmp,
            target,
            committed: false,
        })
    }

    /// Final location of the file.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staged contents over the target.
    pub fn commit(mut self) -> Result<()> {
        std::fs::rename(&self.tmp, &self.target).map_err(|e| ServiceError::io(&self.target, e))?;
        self.committed = true;
        debug!(path = %self.target.display(), "Staged file committed");
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

/// `<path>.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
