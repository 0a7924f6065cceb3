use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use engine_logging::{engine_debug, engine_info, engine_warn};
use serde::{Deserialize, Serialize};

use crate::language::{LanguageClassifier, WhatlangClassifier};
use crate::pdf::PdfDocument;

/// Leading bytes inspected when sniffing a file's type.
pub const SNIFF_LEN: usize = 8192;
const GENERIC_TYPE: &str = "application/octet-stream";
const MARKUP_TYPE: &str = "text/html";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionSettings {
    pub max_pages: usize,
    pub target_language: String,
    pub min_confidence: f64,
}

impl Default for AdmissionSettings {
    fn default() -> Self {
        Self {
            max_pages: 50,
            target_language: "hu".to_string(),
            min_confidence: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Unreadable(String),
    TooManyPages { pages: usize, max_pages: usize },
    MarkupPayload { sniffed_type: String },
    NoTargetLanguage { pages_with_text: usize },
}

impl Rejection {
    /// Oversized documents are kept on disk so a later run with a higher
    /// ceiling can pick them up; every other rejection discards the file.
    pub fn deletes_file(&self) -> bool {
        !matches!(self, Rejection::TooManyPages { .. })
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Unreadable(reason) => write!(f, "unreadable ({reason})"),
            Rejection::TooManyPages { pages, max_pages } => {
                write!(f, "{pages} pages exceeds ceiling of {max_pages}")
            }
            Rejection::MarkupPayload { sniffed_type } => write!(f, "markup payload ({sniffed_type})"),
            Rejection::NoTargetLanguage { pages_with_text } => {
                write!(f, "no target-language page among {pages_with_text} with text")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionVerdict {
    Admitted { pages: usize, sniffed_type: String },
    Rejected(Rejection),
}

impl AdmissionVerdict {
    pub fn is_rejected(&self) -> bool {
        matches!(self, AdmissionVerdict::Rejected(_))
    }
}

/// Sniffs the leading bytes of a file by content, ignoring its extension.
pub fn sniff_type(head: &[u8]) -> String {
    if looks_like_markup(head) {
        return MARKUP_TYPE.to_string();
    }
    infer::get(head)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| GENERIC_TYPE.to_string())
}

fn looks_like_markup(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    let trimmed = text.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    if trimmed.starts_with("%pdf-") {
        return false;
    }
    ["<!doctype html", "<html", "<head", "<body"]
        .iter()
        .any(|tag| trimmed.contains(tag))
        || (trimmed.starts_with("<?xml") && trimmed.contains("<html"))
}

fn is_markup_type(mime: &str) -> bool {
    matches!(mime, "text/html" | "application/xhtml+xml" | "text/xml")
}

#[derive(Clone)]
pub struct AdmissionFilter {
    settings: AdmissionSettings,
    classifier: Arc<dyn LanguageClassifier>,
}

impl fmt::Debug for AdmissionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionFilter")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AdmissionFilter {
    pub fn new(settings: AdmissionSettings) -> Self {
        Self::with_classifier(settings, Arc::new(WhatlangClassifier))
    }

    pub fn with_classifier(settings: AdmissionSettings, classifier: Arc<dyn LanguageClassifier>) -> Self {
        Self {
            settings,
            classifier,
        }
    }

    pub fn settings(&self) -> &AdmissionSettings {
        &self.settings
    }

    /// Decides keep/drop without touching the file.
    pub fn check(&self, path: &Path) -> AdmissionVerdict {
        let document = match PdfDocument::open(path) {
            Ok(document) => document,
            Err(err) => return AdmissionVerdict::Rejected(Rejection::Unreadable(err.to_string())),
        };

        let pages = document.page_count();
        if pages > self.settings.max_pages {
            return AdmissionVerdict::Rejected(Rejection::TooManyPages {
                pages,
                max_pages: self.settings.max_pages,
            });
        }

        let sniffed_type = match read_head(path) {
            Ok(head) => sniff_type(&head),
            Err(err) => return AdmissionVerdict::Rejected(Rejection::Unreadable(err.to_string())),
        };
        if is_markup_type(&sniffed_type) {
            return AdmissionVerdict::Rejected(Rejection::MarkupPayload { sniffed_type });
        }

        let mut pages_with_text = 0;
        for page_id in document.page_ids() {
            let text = match document.page_text(page_id) {
                Ok(text) => text,
                Err(err) => {
                    engine_debug!("Page text unavailable in {}: {err}", path.display());
                    continue;
                }
            };
            if text.trim().is_empty() {
                continue;
            }
            pages_with_text += 1;
            if self.is_target_language(&text) {
                return AdmissionVerdict::Admitted { pages, sniffed_type };
            }
        }
        AdmissionVerdict::Rejected(Rejection::NoTargetLanguage { pages_with_text })
    }

    /// Checks the file and deletes it when the rejection calls for it.
    pub fn check_and_apply(&self, path: &Path) -> AdmissionVerdict {
        let verdict = self.check(path);
        if let AdmissionVerdict::Rejected(rejection) = &verdict {
            if rejection.deletes_file() {
                match fs::remove_file(path) {
                    Ok(()) => engine_info!("Dropped {}: {rejection}", path.display()),
                    Err(err) => engine_warn!("Could not delete rejected {}: {err}", path.display()),
                }
            } else {
                engine_info!("Kept {} without admitting it: {rejection}", path.display());
            }
        }
        verdict
    }

    fn is_target_language(&self, text: &str) -> bool {
        self.classifier.classify(text).is_some_and(|verdict| {
            verdict
                .code
                .eq_ignore_ascii_case(&self.settings.target_language)
                && verdict.confidence >= self.settings.min_confidence
        })
    }
}

fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(head)
}
