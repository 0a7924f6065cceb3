use std::collections::HashSet;

use harvester_core::{
    associate_images, detect_columns, group_lines, nearest_block, order_blocks, segment_page,
    DocumentRecord, ImageFilter, ImageRejection, Matrix, Orientation, Rect, SegmentationSettings,
    SequenceBuilder, SequenceEntry, TextBlock, TextSpan,
};
use pretty_assertions::assert_eq;

fn span(x0: f64, y0: f64, x1: f64, text: &str) -> TextSpan {
    TextSpan {
        bbox: Rect::new(x0, y0, x1, y0 + 12.0),
        text: text.to_string(),
        font_size: 12.0,
    }
}

fn block(x0: f64, y0: f64, x1: f64, y1: f64, text: &str) -> TextBlock {
    TextBlock {
        page_index: 0,
        bbox: Rect::new(x0, y0, x1, y1),
        raw_text: text.to_string(),
        reading_order_index: 0,
    }
}

fn assert_aligned(record: &DocumentRecord) {
    let texts = record.texts();
    let images = record.images();
    assert_eq!(texts.len(), images.len());
    for (text, image) in texts.iter().zip(images.iter()) {
        assert!(text.is_none() != image.is_none());
    }
}

#[test]
fn spans_on_one_baseline_form_a_line_with_spaces() {
    let spans = vec![
        span(10.0, 10.0, 40.0, "Hello"),
        span(44.0, 10.0, 80.0, "world"),
        span(10.0, 30.0, 50.0, "Next"),
    ];
    let lines = group_lines(&spans, &SegmentationSettings::default());
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].text, "Hello world");
    assert_eq!(lines[1].text, "Next");
}

#[test]
fn reading_order_is_deterministic() {
    let blocks = vec![
        block(300.0, 100.0, 500.0, 120.0, "c"),
        block(10.0, 10.0, 200.0, 30.0, "a"),
        block(10.0, 100.0, 200.0, 120.0, "b"),
        block(300.0, 10.0, 500.0, 30.0, "d"),
    ];
    let first = order_blocks(blocks.clone());
    let mut reversed = blocks;
    reversed.reverse();
    let second = order_blocks(reversed);

    let texts = |bs: &[TextBlock]| bs.iter().map(|b| b.raw_text.clone()).collect::<Vec<_>>();
    assert_eq!(texts(&first), vec!["a", "d", "b", "c"]);
    assert_eq!(texts(&first), texts(&second));
    assert_eq!(
        first.iter().map(|b| b.reading_order_index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3]
    );
}

#[test]
fn two_column_page_keeps_columns_apart() {
    let mut spans = Vec::new();
    for row in 0..4 {
        let y = 100.0 + row as f64 * 14.0;
        spans.push(span(50.0, y, 250.0, &format!("left {row}")));
        spans.push(span(320.0, y, 520.0, &format!("right {row}")));
    }
    let settings = SegmentationSettings::default();
    let lines = group_lines(&spans, &settings);
    assert_eq!(lines.len(), 8);

    let regions = detect_columns(&lines, &[], &settings);
    assert_eq!(regions.len(), 2);
    assert!(regions[0].bbox.x1 <= 250.0);
    assert!(regions[1].bbox.x0 >= 320.0);

    let blocks = segment_page(3, &spans, &[], &settings);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].raw_text, "left 0\nleft 1\nleft 2\nleft 3");
    assert_eq!(blocks[1].raw_text, "right 0\nright 1\nright 2\nright 3");
    assert!(blocks.iter().all(|b| b.page_index == 3));
}

#[test]
fn distant_paragraphs_become_separate_blocks() {
    let spans = vec![
        span(50.0, 100.0, 300.0, "first paragraph"),
        span(50.0, 114.0, 300.0, "continues here"),
        span(50.0, 300.0, 300.0, "second paragraph"),
    ];
    let blocks = segment_page(0, &spans, &[], &SegmentationSettings::default());
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].raw_text, "first paragraph\ncontinues here");
    assert_eq!(blocks[1].raw_text, "second paragraph");
}

#[test]
fn text_inside_image_areas_is_ignored() {
    let spans = vec![
        span(50.0, 100.0, 200.0, "caption below"),
        span(60.0, 250.0, 120.0, "pixel text"),
    ];
    let image_area = Rect::new(40.0, 200.0, 400.0, 400.0);
    let blocks = segment_page(0, &spans, &[image_area], &SegmentationSettings::default());
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].raw_text, "caption below");
}

#[test]
fn images_attach_to_nearest_block_and_ties_keep_first() {
    let blocks = vec![
        block(0.0, 0.0, 100.0, 20.0, "top"),
        block(0.0, 200.0, 100.0, 220.0, "bottom"),
    ];
    let near_bottom = Rect::new(0.0, 230.0, 100.0, 330.0);
    assert_eq!(nearest_block(&blocks, &near_bottom), Some(1));

    let midway = Rect::new(0.0, 100.0, 100.0, 120.0);
    assert_eq!(nearest_block(&blocks, &midway), Some(0));
    assert_eq!(nearest_block(&[], &midway), None);

    let assigned = associate_images(
        &blocks,
        [("a.jpg", &near_bottom), ("b.jpg", &midway), ("c.jpg", &near_bottom)],
    );
    assert_eq!(
        assigned,
        vec![vec!["b.jpg".to_string()], vec!["a.jpg".to_string(), "c.jpg".to_string()]]
    );
}

#[test]
fn page_assembly_emits_images_before_their_block_and_merges_text() {
    let blocks = vec![
        block(0.0, 0.0, 100.0, 20.0, "Intro-\nduction text"),
        block(0.0, 40.0, 100.0, 60.0, "more\ntext"),
        block(0.0, 300.0, 100.0, 320.0, "after figure"),
    ];
    let assigned = vec![vec![], vec![], vec!["fig.jpg".to_string()]];
    let mut builder = SequenceBuilder::new();
    builder.push_page(&blocks, &assigned);
    let record = DocumentRecord::new("doc.pdf", None, builder.finish());

    assert_eq!(
        record.entries,
        vec![
            SequenceEntry::Text("Introduction text more text".into()),
            SequenceEntry::Image("fig.jpg".into()),
            SequenceEntry::Text("after figure".into()),
        ]
    );
    assert_aligned(&record);
}

#[test]
fn record_serializes_as_aligned_arrays_and_rejects_misaligned_lines() {
    let record = DocumentRecord::new(
        "00000001.pdf",
        Some("https://a.com/x.pdf".into()),
        vec![
            SequenceEntry::Image("00000001_page_0_xref_7.jpg".into()),
            SequenceEntry::Text("caption".into()),
        ],
    );
    let line = serde_json::to_string(&record).unwrap();
    assert_eq!(
        line,
        r#"{"pdf_name":"00000001.pdf","url":"https://a.com/x.pdf","texts":[null,"caption"],"images":["00000001_page_0_xref_7.jpg",null]}"#
    );
    let parsed: DocumentRecord = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed, record);
    assert_aligned(&parsed);

    let both = r#"{"pdf_name":"x","url":null,"texts":["a"],"images":["b"]}"#;
    assert!(serde_json::from_str::<DocumentRecord>(both).is_err());
    let short = r#"{"pdf_name":"x","url":null,"texts":["a", null],"images":[null]}"#;
    assert!(serde_json::from_str::<DocumentRecord>(short).is_err());
}

#[test]
fn dropping_images_remerges_neighbouring_text() {
    let record = DocumentRecord::new(
        "d.pdf",
        None,
        vec![
            SequenceEntry::Text("before".into()),
            SequenceEntry::Image("dup.jpg".into()),
            SequenceEntry::Text("after".into()),
            SequenceEntry::Image("keep.jpg".into()),
        ],
    );
    let dropped: HashSet<String> = ["dup.jpg".to_string()].into_iter().collect();
    let pruned = record.without_images(&dropped);
    assert_eq!(
        pruned.entries,
        vec![
            SequenceEntry::Text("before after".into()),
            SequenceEntry::Image("keep.jpg".into()),
        ]
    );
    assert_eq!(pruned.image_count(), 1);
}

#[test]
fn image_dimension_boundary_is_exclusive_at_150() {
    let filter = ImageFilter::default();
    assert_eq!(
        filter.check_dimensions(150, 400),
        Err(ImageRejection::TooSmall {
            width: 150,
            height: 400
        })
    );
    assert_eq!(filter.check_dimensions(151, 400), Ok(()));
    assert!(filter.check_dimensions(400, 20_000).is_err());
    assert_eq!(filter.check_dimensions(400, 19_999), Ok(()));
}

#[test]
fn image_payload_thresholds() {
    let filter = ImageFilter::default();
    assert!(filter.check_payload(2048, 300, 300, 3).is_err());
    // 300 * 300 * 3 * 0.05 = 13500
    assert!(filter.check_payload(13_500, 300, 300, 3).is_err());
    assert_eq!(filter.check_payload(13_501, 300, 300, 3), Ok(()));
}

#[test]
fn orientation_classes_follow_matrix_signs() {
    let cases = [
        (Matrix::new(200.0, 0.0, 0.0, 100.0, 5.0, 5.0), Orientation::Upright),
        (Matrix::new(-200.0, 0.0, 0.0, -100.0, 0.0, 0.0), Orientation::Rotate180),
        (Matrix::new(-200.0, 0.0, 0.0, 100.0, 0.0, 0.0), Orientation::FlipHorizontal),
        (Matrix::new(200.0, 0.0, 0.0, -100.0, 0.0, 0.0), Orientation::FlipVertical),
        (Matrix::new(0.0, 100.0, -200.0, 0.0, 0.0, 0.0), Orientation::Rotate90),
        (Matrix::new(0.0, -100.0, 200.0, 0.0, 0.0, 0.0), Orientation::Rotate270),
        (Matrix::new(0.0, 100.0, 200.0, 0.0, 0.0, 0.0), Orientation::FlipVerticalRotate90),
        (Matrix::new(0.0, -100.0, -200.0, 0.0, 0.0, 0.0), Orientation::Rotate90FlipVertical),
        (Matrix::new(1.0, 0.5, 0.5, 1.0, 0.0, 0.0), Orientation::Upright),
    ];
    for (matrix, expected) in cases {
        assert_eq!(Orientation::classify(&matrix), expected, "{matrix:?}");
    }
}

#[test]
fn inverse_steps_undo_corrections() {
    for orientation in Orientation::ALL {
        let steps = orientation.correction_steps();
        let inverse = orientation.inverse_steps();
        assert_eq!(steps.len(), inverse.len());
        for (step, undo) in steps.iter().rev().zip(inverse.iter()) {
            assert_eq!(step.inverse(), *undo);
        }
    }
}
