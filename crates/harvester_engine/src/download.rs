use std::path::{Path, PathBuf};
use std::sync::Arc;

use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::StreamExt;
use harvester_core::FetchedDocument;
use serde::{Deserialize, Serialize};

use crate::admission::{sniff_type, AdmissionFilter, AdmissionVerdict, SNIFF_LEN};
use crate::fetch::{FetchSettings, Fetcher};
use crate::filename::document_filename;
use crate::persist::{AtomicFileWriter, PersistError};
use crate::FailureKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    /// In-flight requests per process.
    pub concurrency: usize,
    /// Worker processes the URL list is split across.
    pub partitions: usize,
    pub fetch: FetchSettings,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            partitions: 1,
            fetch: FetchSettings::default(),
        }
    }
}

/// A contiguous slice of the URL list; entry `k` is written as `start_index + k`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlPartition {
    pub start_index: usize,
    pub urls: Vec<Option<String>>,
}

impl UrlPartition {
    /// `(file index, url)` for every usable entry.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &str)> {
        self.urls
            .iter()
            .enumerate()
            .filter_map(move |(offset, url)| url.as_deref().map(|url| (self.start_index + offset, url)))
    }
}

/// Splits `urls` into at most `parts` contiguous partitions with disjoint index ranges.
pub fn partition_urls(urls: Vec<Option<String>>, parts: usize) -> Vec<UrlPartition> {
    if urls.is_empty() {
        return Vec::new();
    }
    let chunk = urls.len().div_ceil(parts.max(1));
    urls.chunks(chunk)
        .enumerate()
        .map(|(idx, chunk_urls)| UrlPartition {
            start_index: idx * chunk,
            urls: chunk_urls.to_vec(),
        })
        .collect()
}

/// Diagnostic counters; nothing downstream depends on them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadStats {
    pub attempted: usize,
    pub fetched: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub too_large: usize,
    /// Responses skipped because they carried no Content-Length.
    pub undeclared: usize,
    pub failed: usize,
}

impl DownloadStats {
    pub fn merge(&mut self, other: &DownloadStats) {
        self.attempted += other.attempted;
        self.fetched += other.fetched;
        self.admitted += other.admitted;
        self.rejected += other.rejected;
        self.too_large += other.too_large;
        self.undeclared += other.undeclared;
        self.failed += other.failed;
    }

    fn record(&mut self, outcome: &DownloadOutcome) {
        self.attempted += 1;
        match outcome {
            DownloadOutcome::Admitted(_) => {
                self.fetched += 1;
                self.admitted += 1;
            }
            DownloadOutcome::Diverted(_) | DownloadOutcome::Rejected => {
                self.fetched += 1;
                self.rejected += 1;
            }
            DownloadOutcome::TooLarge => self.too_large += 1,
            DownloadOutcome::Undeclared => self.undeclared += 1,
            DownloadOutcome::Failed => self.failed += 1,
        }
    }
}

/// What became of one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// Stored and admitted, or stored with no admission filter configured.
    Admitted(FetchedDocument),
    /// Rejected but left on disk (page ceiling).
    Diverted(FetchedDocument),
    /// Rejected and deleted.
    Rejected,
    TooLarge,
    Undeclared,
    Failed,
}

impl DownloadOutcome {
    /// The file this outcome left on disk, if any.
    pub fn document(&self) -> Option<&FetchedDocument> {
        match self {
            DownloadOutcome::Admitted(doc) | DownloadOutcome::Diverted(doc) => Some(doc),
            _ => None,
        }
    }
}

pub struct Downloader {
    fetcher: Arc<dyn Fetcher>,
    admission: Option<AdmissionFilter>,
    writer: AtomicFileWriter,
    concurrency: usize,
}

impl Downloader {
    /// Without an admission filter every fetched file is kept.
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        admission: Option<AdmissionFilter>,
        target_dir: PathBuf,
        concurrency: usize,
    ) -> Self {
        Self {
            fetcher,
            admission,
            writer: AtomicFileWriter::new(target_dir),
            concurrency: concurrency.max(1),
        }
    }

    pub fn target_dir(&self) -> &Path {
        self.writer.dir()
    }

    pub async fn download_partition(&self, partition: &UrlPartition) -> DownloadStats {
        let outcomes: Vec<DownloadOutcome> = futures_util::stream::iter(partition.entries())
            .map(|(index, url)| self.download_one(index, url))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut stats = DownloadStats::default();
        for outcome in &outcomes {
            stats.record(outcome);
        }
        engine_info!(
            "Partition at {}: {} attempted, {} admitted, {} rejected, {} too large, {} undeclared, {} failed",
            partition.start_index,
            stats.attempted,
            stats.admitted,
            stats.rejected,
            stats.too_large,
            stats.undeclared,
            stats.failed
        );
        stats
    }

    /// Fetches `url` into file number `index` and runs admission on it.
    pub async fn download_one(&self, index: usize, url: &str) -> DownloadOutcome {
        let output = match self.fetcher.fetch(url).await {
            Ok(output) => output,
            Err(err) => {
                match err.kind {
                    FailureKind::TooLarge { .. } | FailureKind::UndeclaredLength => {
                        engine_debug!("Skipping {url}: {err}")
                    }
                    ref kind if kind.is_miss() => engine_debug!("Fetch miss for {url}: {err}"),
                    _ => engine_warn!("Fetch failed for {url}: {err}"),
                }
                return match err.kind {
                    FailureKind::TooLarge { .. } => DownloadOutcome::TooLarge,
                    FailureKind::UndeclaredLength => DownloadOutcome::Undeclared,
                    _ => DownloadOutcome::Failed,
                };
            }
        };

        let writer = self.writer.clone();
        let admission = self.admission.clone();
        let name = document_filename(index);
        let bytes = output.bytes;
        let stored = tokio::task::spawn_blocking(
            move || -> Result<(PathBuf, String, Option<AdmissionVerdict>), PersistError> {
                let path = writer.write(&name, &bytes)?;
                let head = &bytes[..bytes.len().min(SNIFF_LEN)];
                let verdict = admission.map(|filter| filter.check_and_apply(&path));
                Ok((path, sniff_type(head), verdict))
            },
        )
        .await;

        let (local_path, sniffed_type, verdict) = match stored {
            Ok(Ok(stored)) => stored,
            Ok(Err(err)) => {
                engine_warn!("Could not store {url}: {err}");
                return DownloadOutcome::Failed;
            }
            Err(err) => {
                engine_warn!("Admission task for {url} aborted: {err}");
                return DownloadOutcome::Failed;
            }
        };
        let document = FetchedDocument {
            local_path,
            source_url: url.to_string(),
            byte_size: output.metadata.byte_len,
            sniffed_type,
        };
        match verdict {
            None | Some(AdmissionVerdict::Admitted { .. }) => DownloadOutcome::Admitted(document),
            Some(AdmissionVerdict::Rejected(rejection)) if !rejection.deletes_file() => {
                DownloadOutcome::Diverted(document)
            }
            Some(AdmissionVerdict::Rejected(_)) => DownloadOutcome::Rejected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(n: usize) -> Vec<Option<String>> {
        (0..n).map(|i| Some(format!("https://x.org/{i}.pdf"))).collect()
    }

    #[test]
    fn partitions_are_disjoint_and_contiguous() {
        let parts = partition_urls(urls(10), 3);
        let starts: Vec<usize> = parts.iter().map(|p| p.start_index).collect();
        assert_eq!(starts, vec![0, 4, 8]);
        let indices: Vec<usize> = parts
            .iter()
            .flat_map(|p| p.entries().map(|(i, _)| i).collect::<Vec<_>>())
            .collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn blank_entries_keep_their_index() {
        let partition = UrlPartition {
            start_index: 5,
            urls: vec![None, Some("https://x.org/a.pdf".into())],
        };
        let entries: Vec<_> = partition.entries().collect();
        assert_eq!(entries, vec![(6, "https://x.org/a.pdf")]);
    }

    #[test]
    fn more_parts_than_urls() {
        let parts = partition_urls(urls(2), 8);
        assert_eq!(parts.len(), 2);
        assert!(partition_urls(Vec::new(), 4).is_empty());
    }
}
