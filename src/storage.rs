//! Writing downloaded content to disk.
//!
//! The assembled buffer is laid out file after file, in the order the
//! torrent lists them. Every path component comes from the torrent and is
//! sanitized before it touches the filesystem.

use crate::torrent::FileEntry;

use anyhow::{anyhow, bail, Result};

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Sanitize one path component to prevent path traversal and basic issues.
fn sanitize_filename(filename: &str) -> String {
    // Replace path separators with underscores to prevent directory traversal
    let safe_name = filename.replace(['/', '\\'], "_");

    match safe_name.trim() {
        "" => "download".to_string(),
        "." | ".." => "_".to_string(),
        _ => safe_name,
    }
}

/// Where `file` lands under `root`.
pub fn output_path(root: &Path, file: &FileEntry) -> PathBuf {
    let mut path = root.to_path_buf();
    for component in &file.path {
        path.push(sanitize_filename(component));
    }
    path
}

/// Output paths under `root` that already exist.
pub fn existing_outputs(root: &Path, files: &[FileEntry]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|file| output_path(root, file))
        .filter(|path| path.exists())
        .collect()
}

/// Split `data` into `files` and write each one under `root`.
pub fn write_files(root: &Path, files: &[FileEntry], data: &[u8]) -> Result<()> {
    let total: u64 = files.iter().map(|file| file.length).sum();
    if total != data.len() as u64 {
        bail!(
            "files add up to {} bytes but {} bytes were downloaded",
            total,
            data.len()
        );
    }

    let mut offset = 0;
    for file in files {
        let filepath = output_path(root, file);
        if let Some(parent) = filepath.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                anyhow!("could not create directory '{}': {}", parent.display(), e)
            })?;
        }

        let end = offset + file.length as usize;
        let mut output_file = File::create(&filepath)
            .map_err(|e| anyhow!("could not create output file '{}': {}", filepath.display(), e))?;
        output_file
            .write_all(&data[offset..end])
            .map_err(|e| anyhow!("could not write data to file '{}': {}", filepath.display(), e))?;

        debug!("Wrote {} bytes to {}", file.length, filepath.display());
        offset = end;
    }

    Ok(())
}
