//! Bounded worker pool running one child process per document under a hard
//! wall-clock timeout.
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use engine_logging::{engine_debug, engine_info, engine_warn};
use harvester_core::{ContentHashIndex, DocumentRecord, ImageRecord};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::{ExtractError, LayoutExtractor, IMAGES_DIR};
use crate::external::{DatasetHandle, DatasetSink, SinkError};
use crate::fetch::secs;
use crate::filename::{document_index, sidecar_filename};
use crate::harvest::read_url_lines;
use crate::persist::PersistError;

const PROGRESS_LOG_EVERY: usize = 100;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("cannot start worker: {0}")]
    Spawn(io::Error),
    #[error("worker thread panicked")]
    WorkerPanicked,
    #[error("dataset sink failed: {0}")]
    Sink(#[from] SinkError),
    #[error("cannot read inputs: {0}")]
    Input(io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub workers: usize,
    #[serde(with = "secs")]
    pub per_document_timeout: Duration,
    pub queue_capacity: usize,
    #[serde(with = "secs")]
    pub poll_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: thread::available_parallelism().map_or(1, |n| n.get()),
            per_document_timeout: Duration::from_secs(30),
            queue_capacity: 64,
            poll_interval: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTask {
    pub pdf_path: PathBuf,
    pub source_url: Option<String>,
    pub output_dir: PathBuf,
}

/// What a child process hands back through its report file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildReport {
    pub record: Option<DocumentRecord>,
    pub images: Vec<ImageRecord>,
}

/// Launches the child process that extracts one document and writes a
/// [`ChildReport`] to `report_path`.
pub trait TaskRunner: Send + Sync {
    fn spawn(&self, task: &ExtractionTask, report_path: &Path) -> io::Result<Child>;
}

/// Re-executes a binary (normally the running one) with an extraction
/// subcommand and the task as flags.
#[derive(Debug, Clone)]
pub struct SelfExecRunner {
    program: PathBuf,
    leading_args: Vec<OsString>,
}

impl SelfExecRunner {
    pub fn new(program: PathBuf, leading_args: Vec<OsString>) -> Self {
        Self {
            program,
            leading_args,
        }
    }

    pub fn current_exe(leading_args: Vec<OsString>) -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, leading_args))
    }
}

impl TaskRunner for SelfExecRunner {
    fn spawn(&self, task: &ExtractionTask, report_path: &Path) -> io::Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg("--pdf")
            .arg(&task.pdf_path)
            .arg("--output-dir")
            .arg(&task.output_dir)
            .arg("--report")
            .arg(report_path);
        if let Some(url) = &task.source_url {
            command.arg("--url").arg(url);
        }
        command.stdin(Stdio::null()).spawn()
    }
}

/// Body of the child process: extract one document and write the report.
pub fn run_child_extraction(
    extractor: &LayoutExtractor,
    task: &ExtractionTask,
    report_path: &Path,
) -> Result<(), ExtractError> {
    let mut hashes = ContentHashIndex::disabled();
    let output = extractor.extract(
        &task.pdf_path,
        task.source_url.clone(),
        &task.output_dir,
        &mut hashes,
    )?;
    let report = match output {
        Some(output) => ChildReport {
            record: Some(output.record),
            images: output.images,
        },
        None => ChildReport {
            record: None,
            images: Vec::new(),
        },
    };
    let body = serde_json::to_vec(&report)
        .map_err(|err| PersistError::Serialize("report".into(), err))?;
    fs::write(report_path, body).map_err(PersistError::Io)?;
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub dispatched: usize,
    pub progressed: usize,
    pub accepted: usize,
    pub discarded: usize,
    pub timed_out: usize,
    pub failed: usize,
    pub dataset: Option<DatasetHandle>,
}

#[derive(Debug, Default)]
struct Counters {
    progressed: AtomicUsize,
    accepted: AtomicUsize,
    discarded: AtomicUsize,
    timed_out: AtomicUsize,
    failed: AtomicUsize,
}

enum WorkItem {
    Document(ExtractionTask),
    Shutdown,
}

#[derive(Debug)]
enum TaskOutcome {
    Accepted(DocumentRecord),
    Discarded,
    TimedOut,
    Failed(String),
}

pub struct BoundedWorkerPool {
    settings: PoolSettings,
    runner: Arc<dyn TaskRunner>,
    reference: ContentHashIndex,
    counters: Arc<Counters>,
}

impl BoundedWorkerPool {
    pub fn new(settings: PoolSettings, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            settings,
            runner,
            reference: ContentHashIndex::disabled(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Enables cross-document dedup; every worker gets its own copy.
    pub fn with_reference(mut self, reference: ContentHashIndex) -> Self {
        self.reference = reference;
        self
    }

    /// Documents finished so far, whatever their outcome.
    pub fn progress(&self) -> usize {
        self.counters.progressed.load(Ordering::SeqCst)
    }

    pub fn run(
        &self,
        tasks: Vec<ExtractionTask>,
        sink: Box<dyn DatasetSink>,
    ) -> Result<PoolReport, PoolError> {
        let workers = self.settings.workers.max(1);
        let total = tasks.len();
        let (task_tx, task_rx) = mpsc::sync_channel::<WorkItem>(self.settings.queue_capacity.max(1));
        let queue = Arc::new(Mutex::new(task_rx));
        let (result_tx, result_rx) = mpsc::channel::<DocumentRecord>();

        let writer = thread::Builder::new()
            .name("dataset-writer".into())
            .spawn(move || write_results(result_rx, sink))
            .map_err(PoolError::Spawn)?;

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let context = WorkerContext {
                id,
                queue: queue.clone(),
                runner: self.runner.clone(),
                timeout: self.settings.per_document_timeout,
                poll_interval: self.settings.poll_interval,
                results: result_tx.clone(),
                counters: self.counters.clone(),
                hashes: self.reference.clone(),
                total,
            };
            let handle = thread::Builder::new()
                .name(format!("extract-worker-{id}"))
                .spawn(move || context.run())
                .map_err(PoolError::Spawn)?;
            handles.push(handle);
        }
        drop(result_tx);

        let mut dispatched = 0;
        for task in tasks {
            if task_tx.send(WorkItem::Document(task)).is_err() {
                engine_warn!("All workers stopped; {} tasks not dispatched", total - dispatched);
                break;
            }
            dispatched += 1;
        }
        for _ in 0..workers {
            let _ = task_tx.send(WorkItem::Shutdown);
        }
        drop(task_tx);

        let mut panicked = false;
        for handle in handles {
            panicked |= handle.join().is_err();
        }
        let dataset = writer.join().map_err(|_| PoolError::WorkerPanicked)??;
        if panicked {
            return Err(PoolError::WorkerPanicked);
        }

        let report = PoolReport {
            dispatched,
            progressed: self.counters.progressed.load(Ordering::SeqCst),
            accepted: self.counters.accepted.load(Ordering::SeqCst),
            discarded: self.counters.discarded.load(Ordering::SeqCst),
            timed_out: self.counters.timed_out.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            dataset: Some(dataset),
        };
        engine_info!(
            "Extraction finished: {} dispatched, {} accepted, {} discarded, {} timed out, {} failed",
            report.dispatched,
            report.accepted,
            report.discarded,
            report.timed_out,
            report.failed
        );
        Ok(report)
    }
}

fn write_results(
    results: Receiver<DocumentRecord>,
    mut sink: Box<dyn DatasetSink>,
) -> Result<DatasetHandle, SinkError> {
    for record in results {
        sink.append_record(&record)?;
    }
    sink.finalize()
}

struct WorkerContext {
    id: usize,
    queue: Arc<Mutex<Receiver<WorkItem>>>,
    runner: Arc<dyn TaskRunner>,
    timeout: Duration,
    poll_interval: Duration,
    results: Sender<DocumentRecord>,
    counters: Arc<Counters>,
    hashes: ContentHashIndex,
    total: usize,
}

impl WorkerContext {
    fn run(mut self) {
        loop {
            let item = {
                let guard = match self.queue.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.recv()
            };
            let task = match item {
                Ok(WorkItem::Document(task)) => task,
                Ok(WorkItem::Shutdown) | Err(_) => break,
            };

            let outcome = self.process(&task);
            let name = task.pdf_path.display();
            match outcome {
                TaskOutcome::Accepted(record) => {
                    self.counters.accepted.fetch_add(1, Ordering::SeqCst);
                    if self.results.send(record).is_err() {
                        engine_warn!("Dataset writer gone; dropping record for {name}");
                    }
                }
                TaskOutcome::Discarded => {
                    self.counters.discarded.fetch_add(1, Ordering::SeqCst);
                    engine_debug!("No record for {name}");
                }
                TaskOutcome::TimedOut => {
                    self.counters.timed_out.fetch_add(1, Ordering::SeqCst);
                    engine_warn!("Terminated {name} after {:?}", self.timeout);
                }
                TaskOutcome::Failed(reason) => {
                    self.counters.failed.fetch_add(1, Ordering::SeqCst);
                    engine_warn!("Skipping {name}: {reason}");
                }
            }
            let done = self.counters.progressed.fetch_add(1, Ordering::SeqCst) + 1;
            if done % PROGRESS_LOG_EVERY == 0 || done == self.total {
                engine_info!("Extraction progress {done}/{}", self.total);
            }
        }
        engine_debug!("Worker {} stopped", self.id);
    }

    fn process(&mut self, task: &ExtractionTask) -> TaskOutcome {
        let scratch = match tempfile::Builder::new().prefix("extract-").tempdir() {
            Ok(dir) => dir,
            Err(err) => return TaskOutcome::Failed(format!("scratch dir: {err}")),
        };
        let report_path = scratch.path().join("report.json");
        let mut child = match self.runner.spawn(task, &report_path) {
            Ok(child) => child,
            Err(err) => return TaskOutcome::Failed(format!("spawn: {err}")),
        };

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return TaskOutcome::TimedOut;
                }
                Ok(None) => thread::sleep(self.poll_interval),
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return TaskOutcome::Failed(format!("wait: {err}"));
                }
            }
        };
        if !status.success() {
            return TaskOutcome::Failed(format!("child exited with {status}"));
        }

        let report: ChildReport = match fs::read(&report_path)
            .map_err(|err| err.to_string())
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|err| err.to_string()))
        {
            Ok(report) => report,
            Err(err) => return TaskOutcome::Failed(format!("unreadable report: {err}")),
        };
        match report.record {
            Some(record) => self.deduplicate(task, record, &report.images),
            None => TaskOutcome::Discarded,
        }
    }

    /// Drops images already seen by this worker, deleting their files.
    fn deduplicate(
        &mut self,
        task: &ExtractionTask,
        record: DocumentRecord,
        images: &[ImageRecord],
    ) -> TaskOutcome {
        if !self.hashes.is_enabled() {
            return TaskOutcome::Accepted(record);
        }
        let mut dropped = HashSet::new();
        for image in images {
            if !self.hashes.admit(&image.content_hash, &image.file_name) {
                let dir = task.output_dir.join(IMAGES_DIR);
                for name in [image.file_name.clone(), sidecar_filename(&image.file_name)] {
                    if let Err(err) = fs::remove_file(dir.join(&name)) {
                        engine_debug!("Could not remove duplicate {name}: {err}");
                    }
                }
                dropped.insert(image.file_name.clone());
            }
        }
        if dropped.is_empty() {
            return TaskOutcome::Accepted(record);
        }
        let record = record.without_images(&dropped);
        if record.image_count() == 0 {
            TaskOutcome::Discarded
        } else {
            TaskOutcome::Accepted(record)
        }
    }
}

/// Every `*.pdf` in `input_dir`, sorted by name, with its source URL from the
/// optional URL map (line `i` describes `{i:08}.pdf`).
pub fn collect_tasks(
    input_dir: &Path,
    url_map: Option<&Path>,
    output_dir: &Path,
) -> Result<Vec<ExtractionTask>, PoolError> {
    let urls = match url_map {
        Some(path) => read_url_lines(path).map_err(PoolError::Input)?,
        None => Vec::new(),
    };
    let mut paths = Vec::new();
    for entry in fs::read_dir(input_dir).map_err(PoolError::Input)? {
        let path = entry.map_err(PoolError::Input)?.path();
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths
        .into_iter()
        .map(|pdf_path| {
            let source_url = document_index(&pdf_path)
                .and_then(|idx| urls.get(idx).cloned().flatten());
            ExtractionTask {
                pdf_path,
                source_url,
                output_dir: output_dir.to_path_buf(),
            }
        })
        .collect())
}

/// `<output_dir>/<input_dir name>.jsonl`
pub fn dataset_path(output_dir: &Path, input_dir: &Path) -> PathBuf {
    let name = input_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    output_dir.join(format!("{name}.jsonl"))
}
