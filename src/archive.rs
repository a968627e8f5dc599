//! Artifact packaging
//!
//! Bundles the built binary and auxiliary files into a single compressed
//! archive. Entries are stored flat under their base file names.
//!
//! The archive is written to a hidden `.partial` file next to the
//! destination and renamed into place only once complete, so a failed
//! run never leaves a usable artifact behind.

use crate::error::{BuildsrvError, BuildsrvResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Archive container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// Flat zip with deflate compression
    Zip,
    /// Gzip-compressed tarball
    TarGz,
}

impl ArchiveFormat {
    /// Pick the format for a target OS: zip for `zip_os`, tar.gz otherwise
    pub fn for_os(os: &str, zip_os: &[String]) -> Self {
        if zip_os.iter().any(|o| o == os) {
            Self::Zip
        } else {
            Self::TarGz
        }
    }

    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::TarGz => "application/gzip",
        }
    }
}

/// Create an archive at `dest` containing `files`, blocking the caller.
pub fn create_archive(format: ArchiveFormat, dest: &Path, files: &[PathBuf]) -> BuildsrvResult<()> {
    let partial = partial_path(dest)?;

    let result = match format {
        ArchiveFormat::Zip => write_zip(&partial, files),
        ArchiveFormat::TarGz => write_tar_gz(&partial, files),
    }
    .and_then(|()| {
        fs::rename(&partial, dest)
            .map_err(|e| BuildsrvError::io(format!("moving archive to {}", dest.display()), e))
    });

    if result.is_err() {
        if let Err(e) = fs::remove_file(&partial) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove partial archive {}: {}", partial.display(), e);
            }
        }
    } else {
        debug!("Wrote {} archive {}", format.extension(), dest.display());
    }

    result
}

/// Async wrapper running `create_archive` on the blocking pool
pub async fn archive(format: ArchiveFormat, dest: PathBuf, files: Vec<PathBuf>) -> BuildsrvResult<()> {
    tokio::task::spawn_blocking(move || create_archive(format, &dest, &files))
        .await
        .map_err(|e| BuildsrvError::Internal(format!("archive task panicked: {}", e)))?
}

fn partial_path(dest: &Path) -> BuildsrvResult<PathBuf> {
    let name = dest.file_name().ok_or_else(|| BuildsrvError::PathInvalid {
        path: dest.to_path_buf(),
        reason: "archive destination has no file name".to_string(),
    })?;
    let mut partial = std::ffi::OsString::from(".");
    partial.push(name);
    partial.push(".partial");
    Ok(dest.with_file_name(partial))
}

/// Base name of an input file, as stored in the archive
fn entry_name(path: &Path) -> BuildsrvResult<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| BuildsrvError::PathInvalid {
            path: path.to_path_buf(),
            reason: "archive input has no file name".to_string(),
        })
}

fn open_input(path: &Path) -> BuildsrvResult<(File, fs::Metadata)> {
    let file =
        File::open(path).map_err(|e| BuildsrvError::io(format!("opening {}", path.display()), e))?;
    let metadata = file
        .metadata()
        .map_err(|e| BuildsrvError::io(format!("reading metadata of {}", path.display()), e))?;
    if !metadata.is_file() {
        return Err(BuildsrvError::PathInvalid {
            path: path.to_path_buf(),
            reason: "not a regular file".to_string(),
        });
    }
    Ok((file, metadata))
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

fn write_zip(out: &Path, files: &[PathBuf]) -> BuildsrvResult<()> {
    let file = File::create(out)
        .map_err(|e| BuildsrvError::io(format!("creating {}", out.display()), e))?;
    let mut writer = ZipWriter::new(file);

    for path in files {
        let name = entry_name(path)?;
        let (mut input, metadata) = open_input(path)?;
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(file_mode(&metadata));

        writer
            .start_file(name, options)
            .map_err(|e| BuildsrvError::archive(out, e))?;
        io::copy(&mut input, &mut writer)
            .map_err(|e| BuildsrvError::io(format!("copying contents of {}", path.display()), e))?;
    }

    let file = writer.finish().map_err(|e| BuildsrvError::archive(out, e))?;
    file.sync_all()
        .map_err(|e| BuildsrvError::io(format!("syncing {}", out.display()), e))
}

fn write_tar_gz(out: &Path, files: &[PathBuf]) -> BuildsrvResult<()> {
    let file = File::create(out)
        .map_err(|e| BuildsrvError::io(format!("creating {}", out.display()), e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    for path in files {
        let name = entry_name(path)?;
        let (mut input, metadata) = open_input(path)?;

        let mut header = tar::Header::new_gnu();
        header.set_metadata(&metadata);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(metadata.len());
        header.set_mode(file_mode(&metadata));

        builder
            .append_data(&mut header, &name, &mut input)
            .map_err(|e| BuildsrvError::io(format!("adding {} to archive", path.display()), e))?;
    }

    let file = builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| BuildsrvError::io(format!("finishing {}", out.display()), e))?;
    file.sync_all()
        .map_err(|e| BuildsrvError::io(format!("syncing {}", out.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn inputs(dir: &TempDir) -> Vec<PathBuf> {
        let docs = dir.path().join("dist");
        fs::create_dir_all(&docs).unwrap();
        let mut files = Vec::new();
        for name in ["README.txt", "LICENSES.txt", "CHANGES.txt"] {
            let path = docs.join(name);
            fs::write(&path, format!("contents of {}", name)).unwrap();
            files.push(path);
        }
        let binary = dir.path().join("caddy");
        fs::write(&binary, b"\x7fELF binary").unwrap();
        files.push(binary);
        files
    }

    #[test]
    fn format_policy() {
        let zip_os = vec!["windows".to_string(), "darwin".to_string()];
        assert_eq!(ArchiveFormat::for_os("windows", &zip_os), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::for_os("darwin", &zip_os), ArchiveFormat::Zip);
        assert_eq!(ArchiveFormat::for_os("linux", &zip_os), ArchiveFormat::TarGz);
        assert_eq!(ArchiveFormat::TarGz.extension(), "tar.gz");
    }

    #[test]
    fn zip_contains_base_names() {
        let dir = TempDir::new().unwrap();
        let files = inputs(&dir);
        let dest = dir.path().join("out.zip");

        create_archive(ArchiveFormat::Zip, &dest, &files).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&dest).unwrap()).unwrap();
        let mut names: Vec<_> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, vec!["CHANGES.txt", "LICENSES.txt", "README.txt", "caddy"]);

        let mut readme = String::new();
        archive
            .by_name("README.txt")
            .unwrap()
            .read_to_string(&mut readme)
            .unwrap();
        assert_eq!(readme, "contents of README.txt");
    }

    #[test]
    fn tar_gz_contains_base_names() {
        let dir = TempDir::new().unwrap();
        let files = inputs(&dir);
        let dest = dir.path().join("out.tar.gz");

        create_archive(ArchiveFormat::TarGz, &dest, &files).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(File::open(&dest).unwrap()));
        let mut names = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            if name == "caddy" {
                let mut body = Vec::new();
                entry.read_to_end(&mut body).unwrap();
                assert_eq!(body, b"\x7fELF binary");
            }
            names.push(name);
        }
        assert_eq!(names, vec!["README.txt", "LICENSES.txt", "CHANGES.txt", "caddy"]);
    }

    #[test]
    fn missing_input_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let mut files = inputs(&dir);
        files.push(dir.path().join("does-not-exist"));

        for (format, name) in [(ArchiveFormat::Zip, "out.zip"), (ArchiveFormat::TarGz, "out.tar.gz")] {
            let dest = dir.path().join(name);
            let err = create_archive(format, &dest, &files).unwrap_err();
            assert!(err.to_string().contains("IO error"));
            assert!(!dest.exists());
            assert!(!partial_path(&dest).unwrap().exists());
        }
    }

    #[test]
    fn directory_input_rejected() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("out.zip");
        let err =
            create_archive(ArchiveFormat::Zip, &dest, &[dir.path().to_path_buf()]).unwrap_err();
        assert!(matches!(err, BuildsrvError::PathInvalid { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn async_wrapper() {
        let dir = TempDir::new().unwrap();
        let files = inputs(&dir);
        let dest = dir.path().join("out.tar.gz");

        archive(ArchiveFormat::TarGz, dest.clone(), files).await.unwrap();
        assert!(dest.is_file());
    }
}
