//! Harvester engine: archive reading, downloading, admission, PDF layout
//! extraction and the per-document worker pool.
mod admission;
mod archive;
mod cleanup;
mod config;
mod download;
mod external;
mod extract;
mod fetch;
mod filename;
mod harvest;
mod language;
mod persist;
mod pdf;
mod pool;
mod refilter;
mod types;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod testing;

pub use admission::{sniff_type, AdmissionFilter, AdmissionSettings, AdmissionVerdict, Rejection};
pub use archive::{open_archive, ArchiveError, WarcReader, WarcRecord};
pub use cleanup::{prune_unreferenced, CleanupError, CleanupStats};
pub use config::{ConfigError, PipelineConfig};
pub use download::{
    partition_urls, DownloadOutcome, DownloadSettings, DownloadStats, Downloader, UrlPartition,
};
pub use external::{
    is_completed, run_log_path, submit_pending, DatasetHandle, DatasetSink, JobScheduler, JobSpec,
    JsonlSink, ListError, LocalJobScheduler, LocalObjectLister, ObjectLister, SchedulerError,
    SinkError, SubmitSummary, COMPLETION_MARKER,
};
pub use extract::{
    content_hash, ExtractError, ExtractionOutput, ExtractionSettings, LayoutExtractor, IMAGES_DIR,
};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher, DEFAULT_MAX_BYTES};
pub use filename::{document_filename, document_index, image_filename, sidecar_filename};
pub use harvest::{harvest_archive, harvest_records, read_url_lines, HarvestError, HarvestStats, UrlLine};
pub use language::{LanguageClassifier, LanguageVerdict, WhatlangClassifier};
pub use persist::{ensure_output_dir, AtomicFileWriter, PendingFile, PersistError};
pub use pdf::{
    apply_steps, declared_size, encode_image, recover_image, EncodedImage, ImagePlacement,
    ImageRecoveryError, PageContent, PdfDocument, PdfError,
};
pub use pool::{
    collect_tasks, dataset_path, run_child_extraction, BoundedWorkerPool, ChildReport,
    ExtractionTask, PoolError, PoolReport, PoolSettings, SelfExecRunner, TaskRunner,
};
pub use refilter::{refilter_directory, RefilterError, RefilterStats};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput};
