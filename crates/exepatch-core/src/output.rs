//! Where and how the patched image is written.
//!
//! An empty output path means "patch in place": the executable is backed up
//! to `<file name>.bak` once, then replaced. Every write goes through a temp file
//! in the destination directory and is renamed into place only when complete.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Overwrite the input after backing it up
    InPlace { target: PathBuf, backup: PathBuf },
    /// Write to a separate file, leaving the input untouched
    File(PathBuf),
}

impl Destination {
    /// Resolve the output policy. `None` and empty paths mean in place;
    /// a path equal to the executable is treated the same way.
    pub fn resolve(executable: &Path, output: Option<&Path>) -> Self {
        match output.filter(|p| !p.as_os_str().is_empty()) {
            Some(path) if path != executable => Destination::File(path.to_path_buf()),
            _ => Destination::InPlace {
                target: executable.to_path_buf(),
                backup: backup_path(executable),
            },
        }
    }

    pub fn target(&self) -> &Path {
        match self {
            Destination::InPlace { target, .. } => target,
            Destination::File(path) => path,
        }
    }

    pub fn is_in_place(&self) -> bool {
        matches!(self, Destination::InPlace { .. })
    }

    /// Write `data`, backing up the original first when patching in place
    pub fn write(&self, data: &[u8]) -> Result<()> {
        if let Destination::InPlace { target, backup } = self {
            ensure_backup(target, backup)?;
        }
        write_atomically(self.target(), data)
    }
}

/// `game.exe` -> `game.exe.bak`
pub fn backup_path(executable: &Path) -> PathBuf {
    let mut name = executable
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    executable.with_file_name(name)
}

/// Copy the original to `backup` unless a backup already exists.
///
/// Returns `true` when a new backup was made.
pub fn ensure_backup(original: &Path, backup: &Path) -> Result<bool> {
    if backup.exists() {
        debug!("Backup {} already exists", backup.display());
        return Ok(false);
    }
    fs::copy(original, backup)?;
    info!("Backed up {} to {}", original.display(), backup.display());
    Ok(true)
}

/// Write through a temp file in the same directory, then rename over `path`
pub fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(data)?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .map_err(|e| Error::Io(e.error))?;
    debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(())
}
