use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_info, engine_warn};
use thiserror::Error;

use crate::admission::{AdmissionFilter, AdmissionVerdict};
use crate::persist::{ensure_output_dir, PersistError};

#[derive(Debug, Error)]
pub enum RefilterError {
    #[error("cannot scan {path}: {source}")]
    Scan { path: PathBuf, source: io::Error },
    #[error("backup dir unusable: {0}")]
    Backup(#[from] PersistError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefilterStats {
    pub checked: usize,
    pub kept: usize,
    /// Rejected but left in place (page ceiling).
    pub diverted: usize,
    pub moved: usize,
    pub deleted: usize,
}

/// Re-runs admission over already downloaded `*.pdf` files in `dir`.
/// Rejects go to `backup_dir` when given, otherwise they are deleted.
pub fn refilter_directory(
    filter: &AdmissionFilter,
    dir: &Path,
    backup_dir: Option<&Path>,
) -> Result<RefilterStats, RefilterError> {
    if let Some(backup) = backup_dir {
        ensure_output_dir(backup)?;
    }
    let scan_error = |source| RefilterError::Scan {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(scan_error)? {
        let path = entry.map_err(scan_error)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")) {
            files.push(path);
        } else {
            engine_debug!("Not a PDF, left alone: {}", path.display());
        }
    }
    files.sort();

    let mut stats = RefilterStats::default();
    for path in files {
        stats.checked += 1;
        let rejection = match filter.check(&path) {
            AdmissionVerdict::Admitted { .. } => {
                stats.kept += 1;
                continue;
            }
            AdmissionVerdict::Rejected(rejection) => rejection,
        };
        if !rejection.deletes_file() {
            engine_info!("Leaving {} in place: {rejection}", path.display());
            stats.diverted += 1;
            continue;
        }
        match backup_dir {
            Some(backup) => match move_file(&path, backup) {
                Ok(target) => {
                    engine_info!("Moved {} to {}: {rejection}", path.display(), target.display());
                    stats.moved += 1;
                }
                Err(err) => engine_warn!("Could not move {}: {err}", path.display()),
            },
            None => match fs::remove_file(&path) {
                Ok(()) => {
                    engine_info!("Deleted {}: {rejection}", path.display());
                    stats.deleted += 1;
                }
                Err(err) => engine_warn!("Could not delete {}: {err}", path.display()),
            },
        }
    }
    engine_info!(
        "Re-filtered {}: {} checked, {} kept, {} left over the page ceiling, {} moved, {} deleted",
        dir.display(),
        stats.checked,
        stats.kept,
        stats.diverted,
        stats.moved,
        stats.deleted
    );
    Ok(stats)
}

/// Renames into `dir`, falling back to copy and delete across filesystems.
fn move_file(path: &Path, dir: &Path) -> io::Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let target = dir.join(name);
    if fs::rename(path, &target).is_err() {
        fs::copy(path, &target)?;
        fs::remove_file(path)?;
    }
    Ok(target)
}
