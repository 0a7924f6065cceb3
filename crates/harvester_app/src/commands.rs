use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use engine_logging::{engine_info, engine_warn};
use harvester_core::{ContentHashIndex, LinkHarvester};
use harvester_engine::{
    collect_tasks, dataset_path, ensure_output_dir, harvest_archive, partition_urls,
    prune_unreferenced, read_url_lines, refilter_directory, run_child_extraction, AdmissionFilter,
    BoundedWorkerPool, DownloadSettings, DownloadStats, Downloader, ExtractionTask, JsonlSink,
    LayoutExtractor, PoolReport, PoolSettings, ReqwestFetcher, SelfExecRunner, UrlPartition,
};

use crate::cli::{CleanupArgs, DownloadArgs, ExtractArgs, ExtractOneArgs, FilterArgs, HarvestArgs};
use crate::Context;

pub fn harvest(args: &HarvestArgs) -> Result<()> {
    let mut harvester = LinkHarvester::new(args.media_type);
    harvest_archive(&args.wat, &mut harvester, &args.output)
        .with_context(|| format!("harvesting {}", args.wat.display()))?;
    Ok(())
}

pub fn download(ctx: &Context, args: &DownloadArgs) -> Result<()> {
    let mut settings = ctx.config.download.clone();
    if let Some(partitions) = args.partitions {
        settings.partitions = partitions;
    }
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency;
    }
    let admission = (!args.no_admission).then(|| AdmissionFilter::new(ctx.config.admission.clone()));
    let job = DownloadJob {
        urls: &args.urls,
        target_dir: &args.target_dir,
        settings,
        admission,
    };
    match args.partition {
        Some(index) => job.run_partition(index).map(|_| ()),
        None => job.run(&ctx.forwarded),
    }
}

/// One URL list going into one target directory.
pub struct DownloadJob<'a> {
    pub urls: &'a Path,
    pub target_dir: &'a Path,
    pub settings: DownloadSettings,
    pub admission: Option<AdmissionFilter>,
}

impl DownloadJob<'_> {
    fn partitions(&self) -> Result<Vec<UrlPartition>> {
        let urls = read_url_lines(self.urls)
            .with_context(|| format!("reading {}", self.urls.display()))?;
        Ok(partition_urls(urls, self.settings.partitions))
    }

    /// Runs in-process for a single partition, otherwise one child process
    /// per partition.
    pub fn run(&self, forwarded: &[OsString]) -> Result<()> {
        ensure_output_dir(self.target_dir)?;
        if self.settings.partitions <= 1 {
            let mut stats = DownloadStats::default();
            let runtime = runtime()?;
            let downloader = self.downloader();
            for partition in self.partitions()? {
                stats.merge(&runtime.block_on(downloader.download_partition(&partition)));
            }
            log_download_stats(self.target_dir, &stats);
            return Ok(());
        }

        let count = self.partitions()?.len();
        let exe = std::env::current_exe().context("locating own executable")?;
        let mut children = Vec::with_capacity(count);
        for index in 0..count {
            let mut command = Command::new(&exe);
            command
                .args(forwarded)
                .arg("download")
                .arg("--urls")
                .arg(self.urls)
                .arg("--target-dir")
                .arg(self.target_dir)
                .arg("--partitions")
                .arg(self.settings.partitions.to_string())
                .arg("--partition")
                .arg(index.to_string())
                .arg("--concurrency")
                .arg(self.settings.concurrency.to_string());
            if self.admission.is_none() {
                command.arg("--no-admission");
            }
            let child = command
                .spawn()
                .with_context(|| format!("starting download partition {index}"))?;
            children.push((index, child));
        }

        let mut failed = 0;
        for (index, mut child) in children {
            match child.wait() {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    failed += 1;
                    engine_warn!("Download partition {index} exited with {status}");
                }
                Err(err) => {
                    failed += 1;
                    engine_warn!("Download partition {index} lost: {err}");
                }
            }
        }
        engine_info!("Download of {count} partitions finished, {failed} failed");
        Ok(())
    }

    pub fn run_partition(&self, index: usize) -> Result<DownloadStats> {
        let partitions = self.partitions()?;
        let Some(partition) = partitions.get(index) else {
            engine_info!("Partition {index} of {} is empty", partitions.len());
            return Ok(DownloadStats::default());
        };
        let runtime = runtime()?;
        let stats = runtime.block_on(self.downloader().download_partition(partition));
        Ok(stats)
    }

    fn downloader(&self) -> Downloader {
        Downloader::new(
            Arc::new(ReqwestFetcher::new(self.settings.fetch.clone())),
            self.admission.clone(),
            self.target_dir.to_path_buf(),
            self.settings.concurrency,
        )
    }
}

fn log_download_stats(target_dir: &Path, stats: &DownloadStats) {
    engine_info!(
        "Downloaded into {}: {} attempted, {} fetched, {} admitted, {} rejected, {} too large, {} undeclared, {} failed",
        target_dir.display(),
        stats.attempted,
        stats.fetched,
        stats.admitted,
        stats.rejected,
        stats.too_large,
        stats.undeclared,
        stats.failed
    );
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

pub fn extract(ctx: &Context, args: &ExtractArgs) -> Result<()> {
    let mut settings = ctx.config.pool.clone();
    if let Some(workers) = args.workers {
        settings.workers = workers;
    }
    if let Some(secs) = args.timeout_secs {
        if !secs.is_finite() || secs <= 0.0 {
            bail!("--timeout-secs must be positive");
        }
        settings.per_document_timeout = Duration::from_secs_f64(secs);
    }
    let reference = match &args.reference_hashes {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading reference hashes {}", path.display()))?;
            ContentHashIndex::parse_reference(&text)
        }
        None => ContentHashIndex::disabled(),
    };
    extract_directory(
        ctx,
        &args.input_dir,
        args.url_map.as_deref(),
        &args.output_dir,
        settings,
        reference,
    )?;
    Ok(())
}

pub fn extract_directory(
    ctx: &Context,
    input_dir: &Path,
    url_map: Option<&Path>,
    output_dir: &Path,
    settings: PoolSettings,
    reference: ContentHashIndex,
) -> Result<PoolReport> {
    ensure_output_dir(output_dir)?;
    let tasks = collect_tasks(input_dir, url_map, output_dir)?;
    engine_info!("Extracting {} documents from {}", tasks.len(), input_dir.display());

    let mut leading = vec![OsString::from("extract-one")];
    leading.extend(ctx.forwarded.iter().cloned());
    let runner = SelfExecRunner::current_exe(leading).context("locating own executable")?;
    let sink = JsonlSink::create(&dataset_path(output_dir, input_dir))?;

    let pool = BoundedWorkerPool::new(settings, Arc::new(runner)).with_reference(reference);
    let report = pool.run(tasks, Box::new(sink))?;
    if let Some(dataset) = &report.dataset {
        engine_info!("Wrote {} records to {}", dataset.records, dataset.location);
    }
    Ok(report)
}

pub fn extract_one(ctx: &Context, args: &ExtractOneArgs) -> Result<()> {
    let extractor = LayoutExtractor::new(ctx.config.extraction.clone());
    let task = ExtractionTask {
        pdf_path: args.pdf.clone(),
        source_url: args.url.clone(),
        output_dir: args.output_dir.clone(),
    };
    run_child_extraction(&extractor, &task, &args.report)
        .with_context(|| format!("extracting {}", args.pdf.display()))?;
    Ok(())
}

pub fn filter(ctx: &Context, args: &FilterArgs) -> Result<()> {
    let admission = AdmissionFilter::new(ctx.config.admission.clone());
    refilter_directory(&admission, &args.dir, args.backup_dir.as_deref())
        .with_context(|| format!("re-filtering {}", args.dir.display()))?;
    Ok(())
}

pub fn cleanup(args: &CleanupArgs) -> Result<()> {
    prune_unreferenced(&args.dataset, &args.images_dir)?;
    Ok(())
}

/// Storage layout for one archive, named after its file: `x.warc.wat.gz`
/// gives base `x.warc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub archive: PathBuf,
    pub urls: PathBuf,
    pub documents: PathBuf,
    pub processed: PathBuf,
}

impl ArchiveLayout {
    pub fn new(storage: &Path, archive_name: &str) -> Self {
        let base = archive_base_name(archive_name);
        Self {
            archive: storage.join(archive_name),
            urls: storage.join(format!("{base}_urls.jsonl")),
            documents: storage.join(&base),
            processed: storage.join(format!("{base}_pdfs_processed")),
        }
    }
}

/// Drops the last two extensions.
pub fn archive_base_name(archive_name: &str) -> String {
    let once = Path::new(archive_name).file_stem().unwrap_or_default();
    let twice = Path::new(once).file_stem().unwrap_or_default();
    twice.to_string_lossy().into_owned()
}
