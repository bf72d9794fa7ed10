use std::fs;
use std::io::Write;
use std::path::{Component, Path};

use flate2::read::GzDecoder;
use tar::Archive;
use tempfile::Builder;

use crate::error::MinerError;

pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), MinerError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| MinerError::Filesystem(err.to_string()))?;
    let mut temp = Builder::new()
        .prefix(".ftu-miner")
        .tempfile_in(parent)
        .map_err(|err| MinerError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| MinerError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| MinerError::Filesystem(err.to_string()))?;
    temp.persist(path)
        .map_err(|err| MinerError::Filesystem(format!("{}: {err}", path.display())))?;
    Ok(())
}

pub fn ensure_dir(path: &Path) -> Result<(), MinerError> {
    fs::create_dir_all(path).map_err(|err| MinerError::Filesystem(err.to_string()))
}

/// Extracts a gzip-compressed tarball into `target_dir`, refusing entries
/// that would escape it. Returns the number of regular files written.
pub fn extract_tar_gz(archive_path: &Path, target_dir: &Path) -> Result<usize, MinerError> {
    let metadata = fs::metadata(archive_path)
        .map_err(|err| MinerError::Archive(format!("{}: {err}", archive_path.display())))?;
    if metadata.len() == 0 {
        return Err(MinerError::Archive(format!(
            "{}: empty archive",
            archive_path.display()
        )));
    }
    let file = fs::File::open(archive_path)
        .map_err(|err| MinerError::Archive(format!("open {}: {err}", archive_path.display())))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let entries = archive
        .entries()
        .map_err(|err| MinerError::Archive(err.to_string()))?;

    let mut written = 0;
    for entry in entries {
        let mut entry = entry.map_err(|err| MinerError::Archive(err.to_string()))?;
        let relative = entry
            .path()
            .map_err(|err| MinerError::Archive(err.to_string()))?
            .into_owned();
        if !is_enclosed(&relative) {
            return Err(MinerError::Archive(
                "tar entry path traversal detected".to_string(),
            ));
        }
        let entry_path = target_dir.join(&relative);
        if entry.header().entry_type().is_dir() {
            ensure_dir(&entry_path)?;
            continue;
        }
        if let Some(parent) = entry_path.parent() {
            ensure_dir(parent)?;
        }
        entry
            .unpack(&entry_path)
            .map_err(|err| MinerError::Archive(err.to_string()))?;
        if entry.header().entry_type().is_file() {
            written += 1;
        }
    }
    Ok(written)
}

fn is_enclosed(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
