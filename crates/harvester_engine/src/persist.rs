use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("could not serialize {0}: {1}")]
    Serialize(String, serde_json::Error),
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::OutputDir(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::OutputDir(e.to_string()))?;
    }
    Ok(())
}

/// Writes `{dir}/{filename}` through a sibling temp file so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        let mut pending = self.begin(filename)?;
        pending.write_all(content)?;
        pending.commit()
    }

    /// Starts an incremental write; the target appears only on `commit`.
    pub fn begin(&self, filename: &str) -> Result<PendingFile, PersistError> {
        ensure_output_dir(&self.dir)?;
        Ok(PendingFile {
            tmp: NamedTempFile::new_in(&self.dir)?,
            target: self.dir.join(filename),
        })
    }

    pub fn write_json<T: Serialize>(&self, filename: &str, value: &T) -> Result<PathBuf, PersistError> {
        let body = serde_json::to_vec(value)
            .map_err(|err| PersistError::Serialize(filename.to_string(), err))?;
        self.write(filename, &body)
    }
}

/// A temp file waiting to replace its target. Dropping it discards the data.
#[derive(Debug)]
pub struct PendingFile {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl PendingFile {
    pub fn commit(mut self) -> Result<PathBuf, PersistError> {
        self.tmp.flush()?;
        self.tmp
            .persist(&self.target)
            .map_err(|e| PersistError::Io(e.error))?;
        Ok(self.target)
    }
}

impl Write for PendingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}
