//! PDF access built on `lopdf`: page geometry, text spans, image placements
//! and image recovery.
mod content;
mod fonts;
mod images;
mod objects;

use std::path::Path;

use harvester_core::PageFrame;
use lopdf::{Document, Object, ObjectId, Stream};
use thiserror::Error;

pub use content::{ImagePlacement, PageContent};
pub use images::{apply_steps, declared_size, encode_image, recover_image, EncodedImage, ImageRecoveryError};

use objects::{inherited, numbers};

/// US Letter, used when a page has no usable media box.
const DEFAULT_MEDIA_BOX: [f64; 4] = [0.0, 0.0, 612.0, 792.0];

#[derive(Debug, Error)]
pub enum PdfError {
    #[error("cannot parse document: {0}")]
    Load(#[from] lopdf::Error),
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("unsupported stream filter {0}")]
    UnsupportedFilter(String),
}

pub struct PdfDocument {
    doc: Document,
}

impl PdfDocument {
    pub fn open(path: &Path) -> Result<Self, PdfError> {
        Ok(Self {
            doc: Document::load(path)?,
        })
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    /// Page object ids in page order.
    pub fn page_ids(&self) -> Vec<ObjectId> {
        self.doc.get_pages().into_values().collect()
    }

    pub fn page_frame(&self, page_id: ObjectId) -> Result<PageFrame, PdfError> {
        let page = self.doc.get_dictionary(page_id)?;
        let media = match inherited(&self.doc, page, b"MediaBox") {
            Some(Object::Array(items)) => numbers(&self.doc, items),
            _ => Vec::new(),
        };
        let [llx, lly, urx, ury] = match media[..] {
            [llx, lly, urx, ury] if urx != llx && ury != lly => [llx, lly, urx, ury],
            _ => DEFAULT_MEDIA_BOX,
        };
        Ok(PageFrame::from_media_box(llx, lly, urx, ury))
    }

    /// Text spans and image placements of one page, in content order.
    pub fn page_content(&self, page_id: ObjectId) -> Result<PageContent, PdfError> {
        let page = self.doc.get_dictionary(page_id)?;
        let frame = self.page_frame(page_id)?;
        let resources = match inherited(&self.doc, page, b"Resources") {
            Some(Object::Dictionary(dict)) => Some(dict),
            _ => None,
        };
        let bytes = content::page_content_bytes(&self.doc, page);
        content::Interpreter::new(&self.doc, frame).run(&bytes, resources)
    }

    /// Plain text of one page with line breaks flattened to spaces.
    pub fn page_text(&self, page_id: ObjectId) -> Result<String, PdfError> {
        let content = self.page_content(page_id)?;
        let text = content
            .spans
            .iter()
            .map(|span| span.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        Ok(text.replace(['\n', '\r'], " "))
    }

    pub fn image_stream(&self, object_id: ObjectId) -> Option<&Stream> {
        match self.doc.get_object(object_id).ok()? {
            Object::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }
}
