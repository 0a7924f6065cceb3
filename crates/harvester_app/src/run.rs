use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use engine_logging::{engine_info, engine_warn};
use harvester_core::{ContentHashIndex, LinkHarvester, MediaClass};
use harvester_engine::{
    harvest_archive, is_completed, submit_pending, AdmissionFilter, AtomicFileWriter,
    FetchSettings, JobSpec, LocalJobScheduler, ReqwestFetcher, COMPLETION_MARKER,
};

use crate::cli::{RunArgs, SubmitArgs};
use crate::commands::{extract_directory, runtime, ArchiveLayout, DownloadJob};
use crate::Context;

/// Archives smaller than this are leftovers of a failed fetch.
const MIN_ARCHIVE_BYTES: u64 = 100;
const ARCHIVE_FETCH_TIMEOUT: Duration = Duration::from_secs(3600);

/// Processes one archive end to end unless its log already says it is done.
pub fn run_archive(ctx: &Context, args: &RunArgs, log_file: &Path) -> Result<()> {
    if is_completed(log_file) {
        engine_info!("Done processing at {}", args.storage_path.display());
        return Ok(());
    }
    engine_info!("Processing {} into {}", args.wat_file, args.storage_path.display());
    fs::create_dir_all(&args.storage_path)
        .with_context(|| format!("creating {}", args.storage_path.display()))?;

    let layout = ArchiveLayout::new(&args.storage_path, &archive_file_name(&args.wat_file));
    let mut timings = Vec::new();

    let started = Instant::now();
    obtain_archive(&args.wat_file, &layout.archive)?;
    timings.push(("fetch archive", started.elapsed()));

    let started = Instant::now();
    let mut harvester = LinkHarvester::new(MediaClass::Document);
    harvest_archive(&layout.archive, &mut harvester, &layout.urls)?;
    timings.push(("harvest links", started.elapsed()));

    let started = Instant::now();
    let mut settings = ctx.config.download.clone();
    if let Some(partitions) = args.partitions {
        settings.partitions = partitions;
    }
    DownloadJob {
        urls: &layout.urls,
        target_dir: &layout.documents,
        settings,
        admission: Some(AdmissionFilter::new(ctx.config.admission.clone())),
    }
    .run(&ctx.forwarded)?;
    timings.push(("download", started.elapsed()));

    if args.extract {
        let started = Instant::now();
        extract_directory(
            ctx,
            &layout.documents,
            Some(&layout.urls),
            &layout.processed,
            ctx.config.pool.clone(),
            ContentHashIndex::disabled(),
        )?;
        timings.push(("extract", started.elapsed()));
    }

    for (stage, elapsed) in &timings {
        engine_info!("Stage {stage} took {elapsed:.2?}");
    }
    engine_info!("{COMPLETION_MARKER}");
    Ok(())
}

/// Last path segment of a URL or path, without any query string.
fn archive_file_name(source: &str) -> String {
    let without_query = source.split(['?', '#']).next().unwrap_or(source);
    without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query)
        .to_string()
}

fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Places the archive at `target`, fetching or copying it unless a usable copy is there.
fn obtain_archive(source: &str, target: &Path) -> Result<()> {
    let existing = fs::metadata(target).map(|m| m.len()).unwrap_or(0);
    if existing >= MIN_ARCHIVE_BYTES {
        engine_info!("Archive {} already present", target.display());
        return Ok(());
    }

    if !is_remote(source) {
        if Path::new(source) != target {
            fs::copy(source, target)
                .with_context(|| format!("copying {source} to {}", target.display()))?;
        }
        return Ok(());
    }

    let settings = FetchSettings {
        request_timeout: ARCHIVE_FETCH_TIMEOUT,
        max_bytes: u64::MAX,
        require_declared_length: false,
        ..FetchSettings::default()
    };
    let dir = target.parent().map(Path::to_path_buf).unwrap_or_default();
    let name = target
        .file_name()
        .context("archive target has no file name")?
        .to_string_lossy()
        .into_owned();
    let writer = AtomicFileWriter::new(dir);
    let metadata = runtime()?
        .block_on(ReqwestFetcher::new(settings).fetch_to_file(source, &writer, &name))
        .with_context(|| format!("fetching {source}"))?;
    engine_info!("Fetched {} bytes from {source}", metadata.byte_len);
    Ok(())
}

/// Submits one `run` job per archive whose log is not complete.
pub fn submit(ctx: &Context, args: &SubmitArgs) -> Result<()> {
    let exe = std::env::current_exe()
        .context("locating own executable")?
        .to_string_lossy()
        .into_owned();
    fs::create_dir_all(&args.log_dir)
        .with_context(|| format!("creating {}", args.log_dir.display()))?;

    let jobs: Vec<JobSpec> = args
        .wat_files
        .iter()
        .map(|wat| job_for(ctx, args, &exe, wat))
        .collect();
    let scheduler = LocalJobScheduler::new();
    let summary = submit_pending(&scheduler, &jobs)?;
    engine_info!(
        "Submitted {} jobs, skipped {} already complete",
        summary.submitted,
        summary.skipped
    );

    if args.wait {
        for (name, status) in scheduler.wait_all() {
            match status {
                Ok(status) if status.success() => engine_info!("Job {name} finished"),
                Ok(status) => engine_warn!("Job {name} exited with {status}"),
                Err(err) => engine_warn!("Job {name} could not be awaited: {err}"),
            }
        }
    }
    Ok(())
}

fn job_for(ctx: &Context, args: &SubmitArgs, exe: &str, wat: &str) -> JobSpec {
    let archive_name = archive_file_name(wat);
    let warc_name = archive_name
        .strip_suffix(".wat.gz")
        .unwrap_or(&archive_name)
        .to_string();
    let storage: PathBuf = args.storage_root.join(&warc_name);
    let log_file = args.log_dir.join(format!("{archive_name}.log"));

    let mut command = vec![
        exe.to_string(),
        "--log-file".to_string(),
        log_file.to_string_lossy().into_owned(),
    ];
    command.extend(ctx.forwarded.iter().map(|arg| arg.to_string_lossy().into_owned()));
    command.extend([
        "run".to_string(),
        "--wat-file".to_string(),
        wat.to_string(),
        "--storage-path".to_string(),
        storage.to_string_lossy().into_owned(),
    ]);
    if args.extract {
        command.push("--extract".to_string());
    }

    JobSpec {
        name: format!("pdf_{warc_name}"),
        command,
        cpus: args.cpus,
        memory_mb: args.memory_mb,
        timeout: Duration::from_secs(args.timeout_secs),
        log_file,
    }
}
