//! Streaming reader for WARC files (plain or multi-member gzip), as used for
//! crawl metadata (WAT) archives.
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use thiserror::Error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Default ceiling for a single record body; larger bodies are skipped
/// without being buffered.
pub const MAX_RECORD_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("expected a WARC version line, found {0:?}")]
    BadVersion(String),
    #[error("malformed header line {0:?}")]
    BadHeader(String),
    #[error("record has no valid Content-Length")]
    MissingLength,
    #[error("record body truncated: expected {expected} bytes")]
    Truncated { expected: u64 },
    #[error("record body of {0} bytes exceeds the record size limit")]
    Oversized(u64),
}

impl ArchiveError {
    /// Whether the reader is still positioned at a record boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ArchiveError::Oversized(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarcRecord {
    pub version: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WarcRecord {
    /// Header lookup is case-insensitive; the first occurrence wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn record_type(&self) -> Option<&str> {
        self.header("WARC-Type")
    }

    pub fn target_uri(&self) -> Option<&str> {
        self.header("WARC-Target-URI")
    }
}

/// Yields records until end of stream. After the first framing error the
/// reader is exhausted, since the next record boundary cannot be located.
/// An oversized record is consumed and reported, and reading continues.
pub struct WarcReader<R> {
    inner: R,
    max_record_bytes: u64,
    done: bool,
}

impl<R: BufRead> WarcReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_record_bytes: MAX_RECORD_BYTES,
            done: false,
        }
    }

    pub fn with_max_record_bytes(mut self, limit: u64) -> Self {
        self.max_record_bytes = limit;
        self
    }

    fn read_line(&mut self) -> Result<Option<String>, ArchiveError> {
        let mut buf = Vec::new();
        let read = self.inner.read_until(b'\n', &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        let line = String::from_utf8_lossy(&buf);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    fn read_record(&mut self) -> Result<Option<WarcRecord>, ArchiveError> {
        // Records are separated by blank lines.
        let version = loop {
            match self.read_line()? {
                None => return Ok(None),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line,
            }
        };
        if !version.starts_with("WARC/") {
            return Err(ArchiveError::BadVersion(truncate_for_log(&version)));
        }

        let mut headers = Vec::new();
        loop {
            let line = self
                .read_line()?
                .ok_or(ArchiveError::Truncated { expected: 0 })?;
            if line.is_empty() {
                break;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| ArchiveError::BadHeader(truncate_for_log(&line)))?;
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }

        let length: u64 = headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("Content-Length"))
            .and_then(|(_, value)| value.parse().ok())
            .ok_or(ArchiveError::MissingLength)?;

        let mut body_reader = (&mut self.inner).take(length);
        if length > self.max_record_bytes {
            let skipped = io::copy(&mut body_reader, &mut io::sink())?;
            if skipped < length {
                return Err(ArchiveError::Truncated { expected: length });
            }
            return Err(ArchiveError::Oversized(length));
        }
        // The declared length is bounded above, but the buffer still grows
        // only as bytes actually arrive.
        let mut body = Vec::new();
        body_reader.read_to_end(&mut body)?;
        if (body.len() as u64) < length {
            return Err(ArchiveError::Truncated { expected: length });
        }

        Ok(Some(WarcRecord {
            version,
            headers,
            body,
        }))
    }
}

impl<R: BufRead> Iterator for WarcReader<R> {
    type Item = Result<WarcRecord, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = !err.is_recoverable();
                Some(Err(err))
            }
        }
    }
}

/// Opens an archive, transparently decompressing gzip (detected by magic bytes).
pub fn open_archive(path: &Path) -> Result<WarcReader<Box<dyn BufRead + Send>>, ArchiveError> {
    let mut file = BufReader::new(File::open(path)?);
    let is_gzip = file.fill_buf()?.starts_with(&GZIP_MAGIC);
    let reader: Box<dyn BufRead + Send> = if is_gzip {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(file)
    };
    Ok(WarcReader::new(reader))
}

fn truncate_for_log(line: &str) -> String {
    line.chars().take(80).collect()
}
