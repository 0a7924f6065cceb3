use std::fs::File;
use std::io::{self, BufRead, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use engine_logging::{engine_debug, engine_info, engine_warn};
use harvester_core::LinkHarvester;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::{open_archive, ArchiveError, WarcReader, WarcRecord};

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("cannot open archive: {0}")]
    Archive(#[from] ArchiveError),
    #[error("cannot write candidate links: {0}")]
    Output(#[from] io::Error),
}

/// One line of a candidate-link file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlLine {
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestStats {
    pub records: usize,
    pub metadata_records: usize,
    pub malformed: usize,
    pub links_seen: usize,
    pub emitted: usize,
    pub elapsed: Duration,
}

// Only the path down to the link list is modelled; everything else in the
// envelope is ignored.
#[derive(Debug, Deserialize)]
struct WatDocument {
    #[serde(rename = "Envelope")]
    envelope: Envelope,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "Payload-Metadata", default)]
    payload: Option<PayloadMetadata>,
}

#[derive(Debug, Deserialize)]
struct PayloadMetadata {
    #[serde(rename = "HTTP-Response-Metadata", default)]
    http_response: Option<HttpResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct HttpResponseMetadata {
    #[serde(rename = "HTML-Metadata", default)]
    html: Option<HtmlMetadata>,
}

#[derive(Debug, Deserialize)]
struct HtmlMetadata {
    #[serde(rename = "Links", default)]
    links: Vec<LinkEntry>,
}

#[derive(Debug, Deserialize)]
struct LinkEntry {
    #[serde(default)]
    url: Option<String>,
}

/// Links listed in one metadata record, or `None` when the payload is not
/// a WAT envelope.
fn record_links(record: &WarcRecord) -> Option<Vec<String>> {
    let doc: WatDocument = serde_json::from_slice(&record.body).ok()?;
    let links = doc
        .envelope
        .payload
        .and_then(|p| p.http_response)
        .and_then(|h| h.html)
        .map(|html| html.links.into_iter().filter_map(|l| l.url).collect())
        .unwrap_or_default();
    Some(links)
}

/// Scans every metadata record and writes one `{"url": ..}` line per newly
/// emitted candidate link.
pub fn harvest_records<R: BufRead, W: Write>(
    reader: WarcReader<R>,
    harvester: &mut LinkHarvester,
    out: &mut W,
) -> Result<HarvestStats, HarvestError> {
    let started = Instant::now();
    let mut stats = HarvestStats::default();

    for item in reader {
        let record = match item {
            Ok(record) => record,
            Err(err) if err.is_recoverable() => {
                engine_warn!("Skipping archive record: {err}");
                stats.malformed += 1;
                continue;
            }
            Err(err) => {
                engine_warn!("Archive stream ended early: {err}");
                stats.malformed += 1;
                break;
            }
        };
        stats.records += 1;
        if !record
            .record_type()
            .is_some_and(|t| t.eq_ignore_ascii_case("metadata"))
        {
            continue;
        }
        stats.metadata_records += 1;

        let Some(page_url) = record.target_uri().map(str::to_string) else {
            engine_debug!("Metadata record without target URI skipped");
            stats.malformed += 1;
            continue;
        };
        let Some(links) = record_links(&record) else {
            engine_debug!("Unparseable metadata payload for {page_url}");
            stats.malformed += 1;
            continue;
        };

        for link in links {
            stats.links_seen += 1;
            if let Some(candidate) = harvester.offer(&page_url, &link) {
                serde_json::to_writer(&mut *out, &UrlLine { url: candidate.url })
                    .map_err(io::Error::from)?;
                out.write_all(b"\n")?;
                stats.emitted += 1;
            }
        }
    }

    out.flush()?;
    stats.elapsed = started.elapsed();
    Ok(stats)
}

pub fn harvest_archive(
    archive: &Path,
    harvester: &mut LinkHarvester,
    output: &Path,
) -> Result<HarvestStats, HarvestError> {
    let reader = open_archive(archive)?;
    let mut out = BufWriter::new(File::create(output)?);
    let stats = harvest_records(reader, harvester, &mut out)?;
    engine_info!(
        "Harvested {} links ({} metadata records, {} malformed) from {} in {:.2?}",
        stats.emitted,
        stats.metadata_records,
        stats.malformed,
        archive.display(),
        stats.elapsed
    );
    Ok(stats)
}

/// Reads a `{"url": ..}` JSONL file, keeping line positions: entry `i` is line
/// `i`, `None` where the line is blank or malformed.
pub fn read_url_lines(path: &Path) -> io::Result<Vec<Option<String>>> {
    let reader = io::BufReader::new(File::open(path)?);
    let mut urls = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let entry = match serde_json::from_str::<UrlLine>(&line) {
            Ok(entry) => Some(entry.url),
            Err(err) => {
                engine_debug!("Skipping line {} of {}: {err}", number + 1, path.display());
                None
            }
        };
        urls.push(entry);
    }
    Ok(urls)
}
