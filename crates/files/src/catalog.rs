//! Shared-directory scanning.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use p2pshare_types::FileRecord;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::hash::hash_file;

/// Entry the scanner could not index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of one full pass over the shared directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Indexed files, sorted by name.
    pub files: Vec<FileRecord>,
    pub skipped: Vec<SkippedEntry>,
}

impl ScanReport {
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|file| file.size).sum()
    }
}

/// Walks a shared root and builds the catalog a peer registers.
#[derive(Debug, Clone)]
pub struct CatalogScanner {
    root: PathBuf,
}

impl CatalogScanner {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Recompute the full catalog. Every record lists `peer_id` as its holder.
    ///
    /// Only an unreadable root is an error; unreadable subdirectories, files
    /// that fail to hash and non-UTF-8 names are recorded in
    /// [`ScanReport::skipped`] and logged.
    pub fn scan(&self, peer_id: &str) -> io::Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut pending = vec![self.root.clone()];
        let mut is_root = true;

        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) if is_root => return Err(err),
                Err(err) => {
                    skip(&mut report, dir, err.to_string());
                    continue;
                }
            };
            is_root = false;

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => {
                        skip(&mut report, dir.clone(), err.to_string());
                        continue;
                    }
                };
                let path = entry.path();

                // Symlinked directories are not followed to keep the walk finite.
                let file_type = match entry.file_type() {
                    Ok(file_type) => file_type,
                    Err(err) => {
                        skip(&mut report, path, err.to_string());
                        continue;
                    }
                };
                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }

                let metadata = match fs::metadata(&path) {
                    Ok(metadata) if metadata.is_file() => metadata,
                    Ok(_) => {
                        debug!("Ignoring non-regular entry {}", path.display());
                        continue;
                    }
                    Err(err) => {
                        skip(&mut report, path, err.to_string());
                        continue;
                    }
                };

                let Some(name) = self.relative_name(&path) else {
                    skip(&mut report, path, "file name is not valid UTF-8".into());
                    continue;
                };

                match hash_file(&path) {
                    Ok(hash) => report.files.push(
                        FileRecord::new(name, hash.to_hex(), metadata.len()).held_by(peer_id),
                    ),
                    Err(err) => skip(&mut report, path, format!("hash failed: {err}")),
                }
            }
        }

        report.files.sort_by(|a, b| a.name.cmp(&b.name));
        info!(
            "Found {} files ({} bytes) in {}",
            report.files.len(),
            report.total_bytes(),
            self.root.display()
        );
        Ok(report)
    }

    /// `/`-joined path of `path` relative to the root.
    fn relative_name(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<Vec<_>>>()?;
        Some(parts.join("/"))
    }
}

fn skip(report: &mut ScanReport, path: PathBuf, reason: String) {
    warn!("Skipping {}: {}", path.display(), reason);
    report.skipped.push(SkippedEntry { path, reason });
}
