//! File operations used by the orchestrator: tree copies, tar.gz archives,
//! point-in-time directory copies and downloads.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::debug;
use sha2::{Digest, Sha256};
use tar::{Archive, Builder};
use walkdir::WalkDir;

use crate::error::{LifecycleError, Result};

pub fn exists(path: &Path) -> bool {
    path.exists()
}

pub fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Remove a directory tree; a missing directory is not an error.
pub fn delete_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)?;
    Ok(())
}

/// Recursively copy the contents of `src` to `dest`.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Take a point-in-time copy of `dir` next to it, returning the copy's path.
pub fn backup_copy(dir: &Path) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M%S");
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let copy = dir.with_file_name(format!("{name}_bak_{stamp}"));
    delete_dir(&copy)?;
    if dir.exists() {
        copy_tree(dir, &copy)?;
    } else {
        fs::create_dir_all(&copy)?;
    }
    Ok(copy)
}

/// Archive `src` (as a top-level directory entry named after it) into
/// `dest_dir/dest_name` as tar + gzip. Returns the archive's hex SHA-256.
/// An existing file at the destination is never overwritten.
pub fn compress_dir(src: &Path, dest_dir: &Path, dest_name: &str) -> Result<String> {
    let archive_path = dest_dir.join(dest_name);
    let archive_err = |e: io::Error| LifecycleError::Archive {
        path: archive_path.display().to_string(),
        message: e.to_string(),
    };

    let top = src
        .file_name()
        .ok_or_else(|| archive_err(io::Error::new(io::ErrorKind::InvalidInput, "no directory name")))?;

    fs::create_dir_all(dest_dir)?;
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&archive_path)
        .map_err(archive_err)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(top, src).map_err(archive_err)?;
    let encoder = builder.into_inner().map_err(archive_err)?;
    encoder.finish().map_err(archive_err)?.flush().map_err(archive_err)?;

    debug!("Archived {} into {}", src.display(), archive_path.display());
    checksum(&archive_path)
}

/// Unpack a tar + gzip archive into `dest_dir`, overwriting existing files.
pub fn decompress(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let archive_err = |e: io::Error| LifecycleError::Archive {
        path: archive_path.display().to_string(),
        message: e.to_string(),
    };
    let file = File::open(archive_path).map_err(archive_err)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.set_overwrite(true);
    archive.set_preserve_permissions(true);
    archive.unpack(dest_dir).map_err(archive_err)?;
    Ok(())
}

/// Hex SHA-256 of a file's contents
pub fn checksum(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Download `url` to `dest`.
pub async fn download(url: &str, dest: &Path) -> Result<()> {
    let download_err = |message: String| LifecycleError::Download {
        url: url.to_string(),
        message,
    };
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| download_err(e.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| download_err(e.to_string()))?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(dest, &bytes)?;
    Ok(())
}

/// Run blocking file work off the async executor.
pub async fn run_blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| LifecycleError::Io(io::Error::new(io::ErrorKind::Other, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_copy_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("resources/1.0");
        write(&src.join("docker-compose.yml"), "services: {}");
        write(&src.join("conf/my.cnf"), "[mysqld]");

        let dest = tmp.path().join("apps/blog");
        copy_tree(&src, &dest).unwrap();
        assert_eq!(
            fs::read_to_string(dest.join("conf/my.cnf")).unwrap(),
            "[mysqld]"
        );
    }

    #[test]
    fn test_archive_restores_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join("apps/mysql/main");
        write(&app.join(".env"), "A=1\n");
        write(&app.join("data/file"), "payload");

        let sum = compress_dir(&app, &tmp.path().join("backups"), "main.tar.gz").unwrap();
        let archive = tmp.path().join("backups/main.tar.gz");
        assert_eq!(sum, checksum(&archive).unwrap());

        fs::write(app.join(".env"), "A=2\n").unwrap();
        decompress(&archive, &tmp.path().join("apps/mysql")).unwrap();
        assert_eq!(fs::read_to_string(app.join(".env")).unwrap(), "A=1\n");
        assert_eq!(fs::read_to_string(app.join("data/file")).unwrap(), "payload");
    }

    #[test]
    fn test_archive_is_never_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join("apps/redis/cache");
        write(&app.join(".env"), "A=1\n");
        let backups = tmp.path().join("backups");

        let first = compress_dir(&app, &backups, "cache.tar.gz").unwrap();
        fs::write(app.join(".env"), "A=2\n").unwrap();
        let err = compress_dir(&app, &backups, "cache.tar.gz").unwrap_err();
        assert!(matches!(err, LifecycleError::Archive { .. }));
        assert_eq!(checksum(&backups.join("cache.tar.gz")).unwrap(), first);
    }

    #[test]
    fn test_backup_copy_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("site");
        write(&dir.join("index.html"), "hi");

        let copy = backup_copy(&dir).unwrap();
        assert_ne!(copy, dir);
        assert_eq!(fs::read_to_string(copy.join("index.html")).unwrap(), "hi");

        delete_dir(&copy).unwrap();
        assert!(!copy.exists());
        // Deleting twice is fine
        delete_dir(&copy).unwrap();
    }
}
