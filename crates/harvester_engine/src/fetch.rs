use std::io::Write;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use crate::persist::AtomicFileWriter;
use crate::{FailureKind, FetchError, FetchMetadata, FetchOutput};

/// Payloads above 50 MB are mostly scanned image dumps; not worth fetching.
pub const DEFAULT_MAX_BYTES: u64 = 50_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    #[serde(with = "secs")]
    pub connect_timeout: Duration,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    /// Empty means every content type is accepted; sniffing happens at admission.
    pub allowed_content_types: Vec<String>,
    /// Responses without a Content-Length are refused before the body is read.
    pub require_declared_length: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            redirect_limit: 5,
            max_bytes: DEFAULT_MAX_BYTES,
            allowed_content_types: Vec::new(),
            require_declared_length: true,
        }
    }
}

#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    settings: FetchSettings,
}

impl ReqwestFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    fn build_client(&self, redirect_counter: Arc<AtomicUsize>) -> Result<reqwest::Client, FetchError> {
        let redirect_limit = self.settings.redirect_limit;
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            let count = attempt.previous().len();
            redirect_counter.store(count, Ordering::Relaxed);
            if count >= redirect_limit {
                attempt.error("redirect limit exceeded")
            } else {
                attempt.follow()
            }
        });

        reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout)
            .timeout(self.settings.request_timeout)
            .redirect(policy)
            .build()
            .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))
    }

    fn is_content_type_allowed(&self, content_type: &str) -> bool {
        if self.settings.allowed_content_types.is_empty() {
            return true;
        }
        let ct = content_type.split(';').next().unwrap_or(content_type).trim();
        self.settings
            .allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ct))
    }

    fn too_large(&self, actual: u64) -> FetchError {
        FetchError::new(
            FailureKind::TooLarge {
                max_bytes: self.settings.max_bytes,
                actual: Some(actual),
            },
            "response too large",
        )
    }
}

/// A successful response whose headers passed every check.
struct Accepted {
    response: reqwest::Response,
    redirect_counter: Arc<AtomicUsize>,
    final_url: String,
    content_type: Option<String>,
    declared_len: Option<u64>,
}

impl Accepted {
    fn metadata(&self, original_url: &str, byte_len: u64) -> FetchMetadata {
        FetchMetadata {
            original_url: original_url.to_string(),
            final_url: self.final_url.clone(),
            redirect_count: self.redirect_counter.load(Ordering::Relaxed),
            content_type: self.content_type.clone(),
            declared_len: self.declared_len,
            byte_len,
        }
    }
}

impl ReqwestFetcher {
    async fn accept(&self, url: &str) -> Result<Accepted, FetchError> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let redirect_counter = Arc::new(AtomicUsize::new(0));
        let client = self.build_client(redirect_counter.clone())?;

        let response = client.get(parsed).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let declared_len = response.content_length();
        match declared_len {
            Some(content_len) if content_len > self.settings.max_bytes => {
                return Err(self.too_large(content_len));
            }
            None if self.settings.require_declared_length => {
                return Err(FetchError::new(
                    FailureKind::UndeclaredLength,
                    "response has no Content-Length",
                ));
            }
            _ => {}
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        if let Some(ct) = content_type.as_deref() {
            if !self.is_content_type_allowed(ct) {
                return Err(FetchError::new(
                    FailureKind::UnsupportedContentType {
                        content_type: ct.to_string(),
                    },
                    "unsupported content type",
                ));
            }
        }

        Ok(Accepted {
            response,
            redirect_counter,
            final_url,
            content_type,
            declared_len,
        })
    }

    /// Streams the body straight into `{writer dir}/{filename}` instead of
    /// buffering it; nothing is left behind when the transfer fails.
    pub async fn fetch_to_file(
        &self,
        url: &str,
        writer: &AtomicFileWriter,
        filename: &str,
    ) -> Result<FetchMetadata, FetchError> {
        let accepted = self.accept(url).await?;
        let metadata_template = accepted.metadata(url, 0);
        let mut pending = writer.begin(filename).map_err(local_io)?;

        let mut written: u64 = 0;
        let mut stream = accepted.response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            written += chunk.len() as u64;
            if written > self.settings.max_bytes {
                return Err(self.too_large(written));
            }
            pending.write_all(&chunk).map_err(local_io)?;
        }
        pending.commit().map_err(local_io)?;

        Ok(FetchMetadata {
            byte_len: written,
            ..metadata_template
        })
    }
}

#[async_trait::async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchOutput, FetchError> {
        let accepted = self.accept(url).await?;
        let mut bytes = Vec::new();
        let mut stream = accepted.response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            let next_len = bytes.len() as u64 + chunk.len() as u64;
            if next_len > self.settings.max_bytes {
                return Err(self.too_large(next_len));
            }
            bytes.extend_from_slice(&chunk);
        }

        let metadata = FetchMetadata {
            original_url: url.to_string(),
            final_url: accepted.final_url,
            redirect_count: accepted.redirect_counter.load(Ordering::Relaxed),
            content_type: accepted.content_type,
            declared_len: accepted.declared_len,
            byte_len: bytes.len() as u64,
        };

        Ok(FetchOutput { bytes, metadata })
    }
}

fn local_io(err: impl std::fmt::Display) -> FetchError {
    FetchError::new(FailureKind::LocalIo, err.to_string())
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_redirect() {
        return FetchError::new(FailureKind::RedirectLimitExceeded, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}

/// Durations as (possibly fractional) seconds in config files.
pub(crate) mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}
