//! Harvester core: pure link, layout and record logic shared by the engine.
mod association;
mod columns;
mod geometry;
mod hashes;
mod image_filter;
mod links;
mod model;
mod orientation;
mod sequence;

pub use association::{associate_images, nearest_block};
pub use columns::{
    detect_columns, group_lines, order_blocks, segment_page, ColumnRegion, SegmentationSettings,
    TextLine, TextSpan,
};
pub use geometry::{Matrix, PageFrame, Rect};
pub use hashes::ContentHashIndex;
pub use image_filter::{ImageFilter, ImageRejection};
pub use links::{
    normalize_link, BanList, LinkHarvester, MediaClass, UnknownMediaClass, DEFAULT_BAN_WORDS,
};
pub use model::{
    CandidateLink, DocumentRecord, FetchedDocument, ImageRecord, ImageSidecar, RecordError,
    SequenceEntry, TextBlock,
};
pub use orientation::{Orientation, PixelStep};
pub use sequence::{clean_block_text, collapse_whitespace, SequenceBuilder};
