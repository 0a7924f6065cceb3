use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use harvester_core::MediaClass;

#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Harvest documents linked from crawl metadata archives into an interleaved text/image dataset"
)]
pub struct Cli {
    /// Optional TOML file with pipeline settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Also append log lines to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan a WAT archive and write candidate links as JSONL
    Harvest(HarvestArgs),
    /// Fetch every URL of a candidate-link file and admit the results
    Download(DownloadArgs),
    /// Extract interleaved records from a directory of documents
    Extract(ExtractArgs),
    /// Extract one document and write a report; used by `extract`
    #[command(hide = true)]
    ExtractOne(ExtractOneArgs),
    /// Re-check already downloaded documents and set aside the ones that fail admission
    Filter(FilterArgs),
    /// Delete images no record refers to
    Cleanup(CleanupArgs),
    /// Harvest, download and optionally extract one archive end to end;
    /// needs `--log-file`, whose completion marker makes reruns a no-op
    Run(RunArgs),
    /// Launch `run` jobs for archives whose log is not complete yet
    Submit(SubmitArgs),
}

#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// WAT archive, plain or gzip
    #[arg(long)]
    pub wat: PathBuf,

    /// Candidate-link JSONL to write
    #[arg(long)]
    pub output: PathBuf,

    /// Kind of link to keep (document or video)
    #[arg(long, default_value = "document")]
    pub media_type: MediaClass,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Candidate-link JSONL
    #[arg(long)]
    pub urls: PathBuf,

    /// Directory the numbered documents land in
    #[arg(long)]
    pub target_dir: PathBuf,

    /// Number of processes the URL list is split across
    #[arg(long)]
    pub partitions: Option<usize>,

    /// Only process this partition (set on child processes)
    #[arg(long)]
    pub partition: Option<usize>,

    /// In-flight requests per process
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Keep every fetched file without admission checks
    #[arg(long)]
    pub no_admission: bool,
}

#[derive(Args, Debug)]
pub struct ExtractArgs {
    /// Directory of downloaded documents
    #[arg(long)]
    pub input_dir: PathBuf,

    /// Candidate-link JSONL whose line i is the URL of document i
    #[arg(long)]
    pub url_map: Option<PathBuf>,

    /// Where the dataset and images go
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Worker count
    #[arg(long)]
    pub workers: Option<usize>,

    /// Per-document timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<f64>,

    /// Newline-separated SHA-256 digests of images already in the corpus
    #[arg(long)]
    pub reference_hashes: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ExtractOneArgs {
    #[arg(long)]
    pub pdf: PathBuf,

    #[arg(long)]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub report: PathBuf,

    #[arg(long)]
    pub url: Option<String>,
}

#[derive(Args, Debug)]
pub struct FilterArgs {
    /// Directory of downloaded documents
    #[arg(long)]
    pub dir: PathBuf,

    /// Rejected documents are moved here; without it they are deleted
    #[arg(long)]
    pub backup_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Processed dataset JSONL
    #[arg(long)]
    pub dataset: PathBuf,

    /// Images directory to prune
    #[arg(long)]
    pub images_dir: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// WAT archive URL or local path
    #[arg(long)]
    pub wat_file: String,

    /// Working directory for this archive
    #[arg(long)]
    pub storage_path: PathBuf,

    /// Download processes
    #[arg(long)]
    pub partitions: Option<usize>,

    /// Also extract records after downloading
    #[arg(long)]
    pub extract: bool,
}

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// WAT archive URLs or paths
    #[arg(required = true)]
    pub wat_files: Vec<String>,

    /// Root under which every archive gets its own storage directory
    #[arg(long)]
    pub storage_root: PathBuf,

    /// Directory holding one log per archive
    #[arg(long)]
    pub log_dir: PathBuf,

    #[arg(long, default_value_t = 32)]
    pub cpus: usize,

    #[arg(long, default_value_t = 100 * 1024)]
    pub memory_mb: u64,

    #[arg(long, default_value_t = 1024 * 3600)]
    pub timeout_secs: u64,

    /// Forwarded to each run
    #[arg(long)]
    pub extract: bool,

    /// Wait for local jobs to finish
    #[arg(long)]
    pub wait: bool,
}
