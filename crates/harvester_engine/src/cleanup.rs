use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_info, engine_warn};
use harvester_core::DocumentRecord;
use thiserror::Error;

use crate::filename::sidecar_filename;

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("cannot read dataset {path}: {source}")]
    Dataset { path: PathBuf, source: io::Error },
    #[error("cannot scan images dir {path}: {source}")]
    Images { path: PathBuf, source: io::Error },
    #[error("dataset {path} has {lines} unparseable lines; refusing to prune")]
    Malformed { path: PathBuf, lines: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub referenced: usize,
    pub kept: usize,
    pub removed: usize,
}

/// Deletes every file in `images_dir` that no record in `dataset` points at.
/// Sidecars of referenced images are kept. A dataset with any unparseable
/// line deletes nothing, since the images of that line are unknown.
pub fn prune_unreferenced(dataset: &Path, images_dir: &Path) -> Result<CleanupStats, CleanupError> {
    let mut stats = CleanupStats::default();
    let keep = referenced_files(dataset, &mut stats)?;

    let entries = fs::read_dir(images_dir).map_err(|source| CleanupError::Images {
        path: images_dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| CleanupError::Images {
            path: images_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if keep.contains(&name) {
            stats.kept += 1;
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                stats.removed += 1;
                engine_debug!("Removed unreferenced {name}");
            }
            Err(err) => engine_warn!("Could not remove {}: {err}", path.display()),
        }
    }
    engine_info!(
        "Cleanup of {}: kept {}, removed {}",
        images_dir.display(),
        stats.kept,
        stats.removed
    );
    Ok(stats)
}

fn referenced_files(dataset: &Path, stats: &mut CleanupStats) -> Result<HashSet<String>, CleanupError> {
    let file = fs::File::open(dataset).map_err(|source| CleanupError::Dataset {
        path: dataset.to_path_buf(),
        source,
    })?;
    let mut keep = HashSet::new();
    let mut malformed = 0;
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|source| CleanupError::Dataset {
            path: dataset.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record: DocumentRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(err) => {
                malformed += 1;
                engine_warn!("Malformed dataset line in {}: {err}", dataset.display());
                continue;
            }
        };
        for name in record.image_names() {
            stats.referenced += 1;
            keep.insert(sidecar_filename(name));
            keep.insert(name.to_string());
        }
    }
    if malformed > 0 {
        return Err(CleanupError::Malformed {
            path: dataset.to_path_buf(),
            lines: malformed,
        });
    }
    Ok(keep)
}
