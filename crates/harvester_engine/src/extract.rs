use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_info, engine_warn};
use harvester_core::{
    associate_images, segment_page, ContentHashIndex, DocumentRecord, ImageFilter, ImageRecord,
    ImageSidecar, Orientation, Rect, SegmentationSettings, SequenceBuilder,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::filename::{image_filename, sidecar_filename};
use crate::pdf::{
    apply_steps, declared_size, encode_image, recover_image, ImagePlacement, PdfDocument, PdfError,
};
use crate::persist::{AtomicFileWriter, PersistError};

/// Images are written to this subdirectory of the extraction output directory.
pub const IMAGES_DIR: &str = "images";

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot open document: {0}")]
    Pdf(#[from] PdfError),
    #[error("cannot persist image: {0}")]
    Persist(#[from] PersistError),
    #[error("document path has no file name: {0}")]
    BadPath(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub max_pages: usize,
    pub filter: ImageFilter,
    #[serde(skip)]
    pub segmentation: SegmentationSettings,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_pages: 50,
            filter: ImageFilter::default(),
            segmentation: SegmentationSettings::default(),
        }
    }
}

/// A document record together with the images it references.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionOutput {
    pub record: DocumentRecord,
    pub images: Vec<ImageRecord>,
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

#[derive(Debug, Clone, Default)]
pub struct LayoutExtractor {
    settings: ExtractionSettings,
}

impl LayoutExtractor {
    pub fn new(settings: ExtractionSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    /// Extracts one document. `Ok(None)` means the document produced no record:
    /// too many pages, or no image survived.
    pub fn extract(
        &self,
        pdf_path: &Path,
        source_url: Option<String>,
        output_dir: &Path,
        hashes: &mut ContentHashIndex,
    ) -> Result<Option<ExtractionOutput>, ExtractError> {
        let bad_path = || ExtractError::BadPath(pdf_path.to_path_buf());
        let pdf_name = pdf_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(bad_path)?
            .to_string();
        let stem = pdf_path
            .file_stem()
            .and_then(|n| n.to_str())
            .ok_or_else(bad_path)?
            .to_string();

        let document = PdfDocument::open(pdf_path)?;
        let pages = document.page_count();
        if pages > self.settings.max_pages {
            engine_info!("Skipping {pdf_name}: {pages} pages exceeds {}", self.settings.max_pages);
            return Ok(None);
        }

        let writer = AtomicFileWriter::new(output_dir.join(IMAGES_DIR));
        let mut visited = HashSet::new();
        let mut builder = SequenceBuilder::new();
        let mut images = Vec::new();

        for (page_index, page_id) in document.page_ids().into_iter().enumerate() {
            let content = match document.page_content(page_id) {
                Ok(content) => content,
                Err(err) => {
                    engine_warn!("{pdf_name} page {page_index}: {err}");
                    continue;
                }
            };
            let image_areas: Vec<Rect> = content.images.iter().map(|p| p.bbox).collect();
            let blocks = segment_page(
                page_index,
                &content.spans,
                &image_areas,
                &self.settings.segmentation,
            );
            if blocks.is_empty() {
                engine_debug!("{pdf_name} page {page_index}: no text blocks");
                continue;
            }

            let mut page_images = Vec::new();
            for placement in &content.images {
                if !visited.insert(placement.object_id) {
                    continue;
                }
                if let Some(image) =
                    self.extract_image(&document, placement, page_index, &stem, &writer, hashes)?
                {
                    page_images.push(image);
                }
            }

            let assigned = associate_images(
                &blocks,
                page_images
                    .iter()
                    .map(|image| (image.file_name.as_str(), &image.bbox)),
            );
            builder.push_page(&blocks, &assigned);
            images.extend(page_images);
        }

        if images.is_empty() {
            engine_debug!("{pdf_name}: no image survived");
            return Ok(None);
        }
        let record = DocumentRecord::new(pdf_name, source_url, builder.finish());
        Ok(Some(ExtractionOutput { record, images }))
    }

    /// One image placement; filter rejections and recovery failures skip the image.
    fn extract_image(
        &self,
        document: &PdfDocument,
        placement: &ImagePlacement,
        page_index: usize,
        stem: &str,
        writer: &AtomicFileWriter,
        hashes: &mut ContentHashIndex,
    ) -> Result<Option<ImageRecord>, ExtractError> {
        let object = placement.object_id;
        let filter = &self.settings.filter;
        let Some(stream) = document.image_stream(object) else {
            return Ok(None);
        };
        let Some((width, height)) = declared_size(document.document(), stream) else {
            engine_debug!("Image {object:?} has no usable dimensions");
            return Ok(None);
        };
        if let Err(rejection) = filter.check_dimensions(width, height) {
            engine_debug!("Image {object:?} on page {page_index}: {rejection}");
            return Ok(None);
        }

        let pixels = match recover_image(document.document(), stream) {
            Ok(pixels) => pixels,
            Err(err) => {
                engine_debug!("Image {object:?} on page {page_index} not recovered: {err}");
                return Ok(None);
            }
        };
        let components = u32::from(pixels.color().channel_count());
        let orientation = Orientation::classify(&placement.ctm);
        let corrected = apply_steps(pixels, orientation.correction_steps());
        let encoded = match encode_image(&corrected) {
            Ok(encoded) => encoded,
            Err(err) => {
                engine_debug!("Image {object:?} on page {page_index} not encoded: {err}");
                return Ok(None);
            }
        };
        if let Err(rejection) = filter.check_payload(encoded.bytes.len(), width, height, components) {
            engine_debug!("Image {object:?} on page {page_index}: {rejection}");
            return Ok(None);
        }

        let digest = content_hash(&encoded.bytes);
        let file_name = image_filename(stem, page_index, object.0, encoded.extension);
        if !hashes.admit(&digest, &file_name) {
            engine_debug!(
                "Image {file_name} duplicates {}",
                hashes.first_claim(&digest).unwrap_or("a reference image")
            );
            return Ok(None);
        }

        let record = ImageRecord {
            page_index,
            bbox: placement.bbox,
            content_hash: digest,
            width,
            height,
            file_name,
        };
        writer.write(&record.file_name, &encoded.bytes)?;
        writer.write_json(&sidecar_filename(&record.file_name), &ImageSidecar::from(&record))?;
        if orientation != Orientation::Upright {
            engine_debug!("Corrected {} ({})", record.file_name, orientation.label());
        }
        Ok(Some(record))
    }
}
