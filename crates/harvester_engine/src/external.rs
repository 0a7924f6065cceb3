//! Interfaces to collaborators outside the pipeline core: dataset export,
//! object storage listing and batch job submission, each with a local
//! implementation.
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use engine_logging::{engine_info, engine_warn};
use harvester_core::DocumentRecord;
use thiserror::Error;

/// Written to a job's log once the archive has been fully processed; a job
/// whose log carries it is skipped on resubmission.
pub const COMPLETION_MARKER: &str = "Archive processing complete: 100%";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("cannot serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where a finalized dataset ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetHandle {
    pub location: String,
    pub records: usize,
}

pub trait DatasetSink: Send {
    fn append_record(&mut self, record: &DocumentRecord) -> Result<(), SinkError>;
    fn finalize(self: Box<Self>) -> Result<DatasetHandle, SinkError>;
}

/// One JSON record per line, flushed as each record arrives.
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

impl JsonlSink {
    /// Truncates any existing file.
    pub fn create(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(File::create(path)?),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DatasetSink for JsonlSink {
    fn append_record(&mut self, record: &DocumentRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<DatasetHandle, SinkError> {
        self.writer.flush()?;
        Ok(DatasetHandle {
            location: self.path.display().to_string(),
            records: self.records,
        })
    }
}

#[derive(Debug, Error)]
pub enum ListError {
    #[error("bucket {0} not found")]
    NoSuchBucket(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Read-only listing of object keys.
pub trait ObjectLister {
    fn list_prefixes(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ListError>;
}

/// Buckets are directories under `root`; keys are `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct LocalObjectLister {
    root: PathBuf,
}

impl LocalObjectLister {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ObjectLister for LocalObjectLister {
    fn list_prefixes(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, ListError> {
        let base = self.root.join(bucket);
        if !base.is_dir() {
            return Err(ListError::NoSuchBucket(bucket.to_string()));
        }
        let mut keys = Vec::new();
        let mut pending = vec![base.clone()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&base) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// One batch job: a command plus the resources a scheduler should reserve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    pub command: Vec<String>,
    pub cpus: usize,
    pub memory_mb: u64,
    pub timeout: Duration,
    pub log_file: PathBuf,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job {0} has an empty command")]
    EmptyCommand(String),
    #[error("cannot launch job {name}: {source}")]
    Launch { name: String, source: io::Error },
}

pub trait JobScheduler {
    fn submit(&self, job: &JobSpec) -> Result<(), SchedulerError>;
}

/// Runs jobs as local child processes, output appended to the job's log with
/// the `_run.log` suffix.
#[derive(Debug, Default)]
pub struct LocalJobScheduler {
    running: Mutex<Vec<(String, Child)>>,
}

impl LocalJobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for every submitted job, returning exit statuses in submission order.
    pub fn wait_all(&self) -> Vec<(String, io::Result<ExitStatus>)> {
        let running = match self.running.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        running
            .into_iter()
            .map(|(name, mut child)| {
                let status = child.wait();
                (name, status)
            })
            .collect()
    }
}

impl JobScheduler for LocalJobScheduler {
    fn submit(&self, job: &JobSpec) -> Result<(), SchedulerError> {
        let (program, args) = job
            .command
            .split_first()
            .ok_or_else(|| SchedulerError::EmptyCommand(job.name.clone()))?;
        let launch = |source| SchedulerError::Launch {
            name: job.name.clone(),
            source,
        };
        let run_log = run_log_path(&job.log_file);
        if let Some(parent) = run_log.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(launch)?;
        }
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&run_log)
            .map_err(launch)?;
        let stderr = log.try_clone().map_err(launch)?;
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(launch)?;
        match self.running.lock() {
            Ok(mut guard) => guard.push((job.name.clone(), child)),
            Err(poisoned) => poisoned.into_inner().push((job.name.clone(), child)),
        }
        Ok(())
    }
}

/// `x.log` becomes `x_run.log`; other names get `_run.log` appended.
pub fn run_log_path(log_file: &Path) -> PathBuf {
    let name = log_file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let run_name = match name.strip_suffix(".log") {
        Some(stem) => format!("{stem}_run.log"),
        None => format!("{name}_run.log"),
    };
    log_file.with_file_name(run_name)
}

/// True when the log file or its `_run.log` sibling contains [`COMPLETION_MARKER`].
pub fn is_completed(log_file: &Path) -> bool {
    [log_file.to_path_buf(), run_log_path(log_file)]
        .iter()
        .any(|path| {
            fs::read(path)
                .map(|bytes| String::from_utf8_lossy(&bytes).contains(COMPLETION_MARKER))
                .unwrap_or(false)
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitSummary {
    pub submitted: usize,
    pub skipped: usize,
}

/// Submits every job whose log does not yet carry the completion marker.
pub fn submit_pending(
    scheduler: &dyn JobScheduler,
    jobs: &[JobSpec],
) -> Result<SubmitSummary, SchedulerError> {
    let mut summary = SubmitSummary::default();
    for job in jobs {
        if is_completed(&job.log_file) {
            engine_info!("Log {} complete, skipping {}", job.log_file.display(), job.name);
            summary.skipped += 1;
            continue;
        }
        if let Err(err) = scheduler.submit(job) {
            engine_warn!("Submission stopped at {}: {err}", job.name);
            return Err(err);
        }
        summary.submitted += 1;
    }
    Ok(summary)
}
