// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Backup of prior configuration.
//!
//! Oxicloud overwrites configuration in place. Before it does, every file it
//! is about to replace gets copied into a __backup directory__ named after the
//! time the run started, e.g., `~/nextcloud-backup-20250309-070501`. The
//! credential record of the run lands there too. Backup directories are never
//! cleaned up automatically.

use crate::{
    host::{Host, HostError, Syscall},
    path::backup_dir_name,
};

use chrono::{DateTime, Local};
use std::{
    fs::DirBuilder,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

/// Timestamped backup directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    dir: PathBuf,
}

impl Backup {
    /// Create new backup directory under root.
    ///
    /// Directory is only accessible by its owner.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Create`] if directory cannot be created.
    pub fn create(root: impl AsRef<Path>, now: &DateTime<Local>) -> Result<Self> {
        let dir = root.as_ref().join(backup_dir_name(now));
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)
            .map_err(|source| BackupError::Create {
                source,
                path: dir.clone(),
            })?;
        info!("backup directory is {}", dir.display());

        Ok(Self { dir })
    }

    /// Path to backup directory.
    pub fn path(&self) -> &Path {
        self.dir.as_path()
    }

    /// Path to credential record inside backup directory.
    pub fn record_path(&self) -> PathBuf {
        self.dir.join("credentials.txt")
    }

    /// Copy existing file into backup directory.
    ///
    /// Returns path of copy, or `None` if there was nothing to preserve.
    /// Copies are flattened into the backup directory, with the original
    /// path encoded in the file name, e.g., `/etc/apache2/sites-available/
    /// nextcloud.conf` becomes `etc_apache2_sites-available_nextcloud.conf`.
    /// Literal `%` and `_` are percent encoded first, so distinct paths never
    /// share a copy.
    ///
    /// # Errors
    ///
    /// - Return [`BackupError::Host`] if copy fails.
    #[instrument(skip(self, host), level = "debug")]
    pub fn preserve(&self, host: &impl Host, path: &Path) -> Result<Option<PathBuf>> {
        if !host.exists(path) {
            debug!("nothing to preserve at {}", path.display());
            return Ok(None);
        }

        let dest = self.dir.join(flatten(path));
        host.run(&Syscall::root("cp").arg("-p").arg(path).arg(&dest))?;
        info!("preserved {} as {}", path.display(), dest.display());

        Ok(Some(dest))
    }
}

fn flatten(path: &Path) -> String {
    path.to_string_lossy()
        .trim_start_matches('/')
        .replace('%', "%25")
        .replace('_', "%5F")
        .replace('/', "_")
}

/// Backup error types.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Backup directory cannot be created.
    #[error("failed to create backup directory at {:?}", path.display())]
    Create {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Copy into backup directory failed.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Friendly result alias :3
pub type Result<T, E = BackupError> = std::result::Result<T, E>;
