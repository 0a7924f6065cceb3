use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::sequence::SequenceBuilder;

/// One outbound link worth fetching, discovered on a captured page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLink {
    pub url: String,
    pub source_page_url: String,
}

/// A downloaded file that is still on disk after admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedDocument {
    pub local_path: PathBuf,
    pub source_url: String,
    pub byte_size: u64,
    /// MIME type sniffed from the leading bytes, not the extension.
    pub sniffed_type: String,
}

/// A reading-order text block of one page.
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub page_index: usize,
    pub bbox: Rect,
    pub raw_text: String,
    pub reading_order_index: usize,
}

/// An embedded image that survived filtering and was persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub page_index: usize,
    pub bbox: Rect,
    pub content_hash: String,
    pub width: u32,
    pub height: u32,
    pub file_name: String,
}

/// Sidecar metadata written next to every persisted image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSidecar {
    pub width: u32,
    pub height: u32,
    pub sha256: String,
}

impl From<&ImageRecord> for ImageSidecar {
    fn from(image: &ImageRecord) -> Self {
        Self {
            width: image.width,
            height: image.height,
            sha256: image.content_hash.clone(),
        }
    }
}

/// One position of the interleaved sequence: either text or an image file name, never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceEntry {
    Text(String),
    Image(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("texts has {texts} entries but images has {images}")]
    LengthMismatch { texts: usize, images: usize },
    #[error("entry {0} has both text and image")]
    BothSet(usize),
    #[error("entry {0} has neither text nor image")]
    NeitherSet(usize),
}

/// Final output unit: one document's interleaved text/image sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "RecordLine", try_from = "RecordLine")]
pub struct DocumentRecord {
    pub pdf_name: String,
    pub url: Option<String>,
    pub entries: Vec<SequenceEntry>,
}

impl DocumentRecord {
    pub fn new(pdf_name: impl Into<String>, url: Option<String>, entries: Vec<SequenceEntry>) -> Self {
        Self {
            pdf_name: pdf_name.into(),
            url,
            entries,
        }
    }

    pub fn texts(&self) -> Vec<Option<&str>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                SequenceEntry::Text(text) => Some(text.as_str()),
                SequenceEntry::Image(_) => None,
            })
            .collect()
    }

    pub fn images(&self) -> Vec<Option<&str>> {
        self.entries
            .iter()
            .map(|entry| match entry {
                SequenceEntry::Text(_) => None,
                SequenceEntry::Image(name) => Some(name.as_str()),
            })
            .collect()
    }

    pub fn image_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|entry| match entry {
            SequenceEntry::Image(name) => Some(name.as_str()),
            SequenceEntry::Text(_) => None,
        })
    }

    pub fn image_count(&self) -> usize {
        self.image_names().count()
    }

    /// Rebuilds the sequence without the named images; text entries left adjacent are merged.
    pub fn without_images(&self, dropped: &HashSet<String>) -> DocumentRecord {
        let mut builder = SequenceBuilder::new();
        for entry in &self.entries {
            match entry {
                SequenceEntry::Image(name) if dropped.contains(name) => {}
                SequenceEntry::Image(name) => builder.push_image(name.clone()),
                SequenceEntry::Text(text) => builder.push_text(text),
            }
        }
        DocumentRecord::new(self.pdf_name.clone(), self.url.clone(), builder.finish())
    }
}

/// Wire form: two position-aligned arrays.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecordLine {
    pdf_name: String,
    url: Option<String>,
    texts: Vec<Option<String>>,
    images: Vec<Option<String>>,
}

impl From<DocumentRecord> for RecordLine {
    fn from(record: DocumentRecord) -> Self {
        let mut texts = Vec::with_capacity(record.entries.len());
        let mut images = Vec::with_capacity(record.entries.len());
        for entry in record.entries {
            match entry {
                SequenceEntry::Text(text) => {
                    texts.push(Some(text));
                    images.push(None);
                }
                SequenceEntry::Image(name) => {
                    texts.push(None);
                    images.push(Some(name));
                }
            }
        }
        Self {
            pdf_name: record.pdf_name,
            url: record.url,
            texts,
            images,
        }
    }
}

impl TryFrom<RecordLine> for DocumentRecord {
    type Error = RecordError;

    fn try_from(line: RecordLine) -> Result<Self, Self::Error> {
        if line.texts.len() != line.images.len() {
            return Err(RecordError::LengthMismatch {
                texts: line.texts.len(),
                images: line.images.len(),
            });
        }
        let entries = line
            .texts
            .into_iter()
            .zip(line.images)
            .enumerate()
            .map(|(idx, pair)| match pair {
                (Some(text), None) => Ok(SequenceEntry::Text(text)),
                (None, Some(name)) => Ok(SequenceEntry::Image(name)),
                (Some(_), Some(_)) => Err(RecordError::BothSet(idx)),
                (None, None) => Err(RecordError::NeitherSet(idx)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DocumentRecord {
            pdf_name: line.pdf_name,
            url: line.url,
            entries,
        })
    }
}
