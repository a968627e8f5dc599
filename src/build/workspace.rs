//! Per-job backing directories
//!
//! Each job owns one directory under the build root, named
//! `YYMMDDhhmmss` plus a random three-digit suffix. The raw binary lands
//! there first and is deleted once the archive beside it is written.

use crate::archive::ArchiveFormat;
use crate::build::job::Artifact;
use crate::error::{BuildsrvError, BuildsrvResult};
use crate::platform::Platform;
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

/// Files and paths belonging to one build
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    dir: PathBuf,
    binary: PathBuf,
    archive: PathBuf,
    download_name: String,
    format: ArchiveFormat,
}

impl JobWorkspace {
    /// Allocate a fresh directory under `root` and lay out file names
    pub async fn create(
        root: &Path,
        platform: &Platform,
        binary_name: &str,
        format: ArchiveFormat,
    ) -> BuildsrvResult<Self> {
        let dir = allocate_dir(root).await?;
        let download_name = platform.download_file_name(binary_name, format);

        Ok(Self {
            binary: dir.join(platform.binary_file_name(binary_name)),
            archive: dir.join(&download_name),
            dir,
            download_name,
            format,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the builder writes the raw binary
    pub fn binary_path(&self) -> &Path {
        &self.binary
    }

    /// Where the packaged artifact goes
    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    /// Delete the raw binary once it has been archived
    pub async fn discard_binary(&self) -> BuildsrvResult<()> {
        fs::remove_file(&self.binary).await.map_err(|e| {
            BuildsrvError::io(format!("removing raw binary {}", self.binary.display()), e)
        })
    }

    /// Remove the whole directory, logging rather than failing
    pub async fn remove(&self) {
        if let Err(e) = remove_dir(&self.dir).await {
            warn!("{}", e);
        }
    }

    /// Describe the finished artifact
    pub fn into_artifact(self) -> Artifact {
        Artifact {
            dir: self.dir,
            path: self.archive,
            display_name: self.download_name,
            format: self.format,
        }
    }
}

/// Create a uniquely named directory under `root`.
///
/// Collisions with an existing directory are retried with a new random
/// suffix; `create_dir` fails atomically on an existing path, so two
/// concurrent callers never get the same directory.
pub async fn allocate_dir(root: &Path) -> BuildsrvResult<PathBuf> {
    fs::create_dir_all(root)
        .await
        .map_err(|e| BuildsrvError::io(format!("creating build root {}", root.display()), e))?;

    loop {
        let ts = Utc::now().format("%y%m%d%H%M%S");
        let suffix = Uuid::new_v4().as_u128() % 1000;
        let dir = root.join(format!("{}{:03}", ts, suffix));

        match fs::create_dir(&dir).await {
            Ok(()) => {
                debug!("Allocated job directory {}", dir.display());
                return Ok(dir);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Job directory {} taken, retrying", dir.display());
            }
            Err(e) => {
                return Err(BuildsrvError::io(
                    format!("creating job directory {}", dir.display()),
                    e,
                ))
            }
        }
    }
}

/// Remove a directory tree. A directory that is already gone is not an
/// error; returns whether anything was removed.
pub async fn remove_dir(dir: &Path) -> BuildsrvResult<bool> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BuildsrvError::io(
            format!("removing directory {}", dir.display()),
            e,
        )),
    }
}
