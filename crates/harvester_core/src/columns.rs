//! Page segmentation: spans -> lines -> column regions -> reading-order text blocks.

use crate::geometry::Rect;
use crate::model::TextBlock;

/// A run of glyphs shown by one text operator, already in top-left page space.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpan {
    pub bbox: Rect,
    pub text: String,
    pub font_size: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub bbox: Rect,
    pub text: String,
    pub font_size: f64,
}

/// Tunables for grouping; expressed as multiples of the font size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentationSettings {
    pub baseline_tolerance: f64,
    pub max_word_gap: f64,
    pub space_gap: f64,
    pub max_line_gap: f64,
    pub max_column_gap: f64,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            baseline_tolerance: 0.5,
            max_word_gap: 1.5,
            space_gap: 0.15,
            max_line_gap: 0.8,
            max_column_gap: 1.5,
        }
    }
}

/// Groups spans, in content order, into visual lines.
pub fn group_lines(spans: &[TextSpan], settings: &SegmentationSettings) -> Vec<TextLine> {
    let mut lines: Vec<TextLine> = Vec::new();
    for span in spans {
        if span.text.is_empty() {
            continue;
        }
        let size = span.font_size.max(1.0);
        let joins = lines.last().is_some_and(|line| {
            let same_baseline =
                (line.bbox.y1 - span.bbox.y1).abs() <= settings.baseline_tolerance * size;
            let gap = span.bbox.x0 - line.bbox.x1;
            same_baseline && gap >= -settings.baseline_tolerance * size && gap <= settings.max_word_gap * size
        });
        match lines.last_mut() {
            Some(line) if joins => {
                let gap = span.bbox.x0 - line.bbox.x1;
                let needs_space = gap > settings.space_gap * size
                    && !line.text.ends_with(char::is_whitespace)
                    && !span.text.starts_with(char::is_whitespace);
                if needs_space {
                    line.text.push(' ');
                }
                line.text.push_str(&span.text);
                line.bbox = line.bbox.union(&span.bbox);
                line.font_size = line.font_size.max(span.font_size);
            }
            _ => lines.push(TextLine {
                bbox: span.bbox,
                text: span.text.clone(),
                font_size: span.font_size,
            }),
        }
    }
    lines.retain(|line| !line.text.trim().is_empty());
    lines
}

/// A column region with the indices of the lines it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRegion {
    pub bbox: Rect,
    pub lines: Vec<usize>,
}

/// Detects column regions by greedily growing non-intersecting boxes over vertically adjacent lines.
///
/// Lines lying wholly inside one of `exclusions` (image areas) are ignored.
/// Regions come back sorted by top, then left.
pub fn detect_columns(
    lines: &[TextLine],
    exclusions: &[Rect],
    settings: &SegmentationSettings,
) -> Vec<ColumnRegion> {
    let mut order: Vec<usize> = (0..lines.len())
        .filter(|&idx| !exclusions.iter().any(|area| area.contains(&lines[idx].bbox)))
        .collect();
    order.sort_by(|&a, &b| lines[a].bbox.reading_cmp(&lines[b].bbox));

    let mut regions: Vec<ColumnRegion> = Vec::new();
    for idx in order {
        let line = &lines[idx];
        let max_gap = settings.max_column_gap * line.bbox.height().max(line.font_size);
        let target = (0..regions.len()).rev().find(|&r| {
            let region = &regions[r].bbox;
            region.horizontal_overlap(&line.bbox) > 0.0
                && line.bbox.y0 - region.y1 <= max_gap
                && !grows_into_other(&regions, r, &region.union(&line.bbox))
        });
        match target {
            Some(r) => {
                regions[r].bbox = regions[r].bbox.union(&line.bbox);
                regions[r].lines.push(idx);
            }
            None => regions.push(ColumnRegion {
                bbox: line.bbox,
                lines: vec![idx],
            }),
        }
    }

    merge_adjacent_regions(&mut regions, lines, settings);
    regions.sort_by(|a, b| a.bbox.reading_cmp(&b.bbox));
    regions
}

fn grows_into_other(regions: &[ColumnRegion], skip: usize, candidate: &Rect) -> bool {
    regions
        .iter()
        .enumerate()
        .any(|(idx, other)| idx != skip && candidate.intersects(&other.bbox))
}

fn merge_adjacent_regions(
    regions: &mut Vec<ColumnRegion>,
    lines: &[TextLine],
    settings: &SegmentationSettings,
) {
    loop {
        let mut merged = false;
        'outer: for i in 0..regions.len() {
            for j in 0..regions.len() {
                if i == j {
                    continue;
                }
                let (upper, lower) = (&regions[i].bbox, &regions[j].bbox);
                let typical = region_line_height(&regions[i], lines);
                let gap = lower.y0 - upper.y1;
                if upper.horizontal_overlap(lower) <= 0.0
                    || gap < 0.0
                    || gap > settings.max_column_gap * typical
                {
                    continue;
                }
                let union = upper.union(lower);
                let collides = regions
                    .iter()
                    .enumerate()
                    .any(|(k, other)| k != i && k != j && union.intersects(&other.bbox));
                if collides {
                    continue;
                }
                let absorbed = regions.remove(j);
                let keep = if j < i { i - 1 } else { i };
                regions[keep].bbox = union;
                regions[keep].lines.extend(absorbed.lines);
                merged = true;
                break 'outer;
            }
        }
        if !merged {
            break;
        }
    }
}

fn region_line_height(region: &ColumnRegion, lines: &[TextLine]) -> f64 {
    let total: f64 = region
        .lines
        .iter()
        .map(|&idx| lines[idx].bbox.height().max(lines[idx].font_size))
        .sum();
    (total / region.lines.len().max(1) as f64).max(1.0)
}

/// Segments one page into text blocks sorted by (top, left).
pub fn segment_page(
    page_index: usize,
    spans: &[TextSpan],
    image_areas: &[Rect],
    settings: &SegmentationSettings,
) -> Vec<TextBlock> {
    let lines = group_lines(spans, settings);
    let regions = detect_columns(&lines, image_areas, settings);

    let mut blocks: Vec<(Rect, String)> = Vec::new();
    for region in &regions {
        let mut region_lines: Vec<&TextLine> = region.lines.iter().map(|&idx| &lines[idx]).collect();
        region_lines.sort_by(|a, b| a.bbox.reading_cmp(&b.bbox));
        let first_block = blocks.len();
        for line in region_lines {
            let joins = blocks[first_block..].iter().rposition(|(bbox, _)| {
                let gap = line.bbox.y0 - bbox.y1;
                bbox.horizontal_overlap(&line.bbox) > 0.0
                    && gap <= settings.max_line_gap * line.bbox.height().max(line.font_size)
            });
            match joins {
                Some(offset) => {
                    let (bbox, text) = &mut blocks[first_block + offset];
                    *bbox = bbox.union(&line.bbox);
                    text.push('\n');
                    text.push_str(line.text.trim_end());
                }
                None => blocks.push((line.bbox, line.text.trim_end().to_string())),
            }
        }
    }

    order_blocks(
        blocks
            .into_iter()
            .map(|(bbox, raw_text)| TextBlock {
                page_index,
                bbox,
                raw_text,
                reading_order_index: 0,
            })
            .collect(),
    )
}

/// Sorts blocks by (top, left) and stamps their reading-order index.
pub fn order_blocks(mut blocks: Vec<TextBlock>) -> Vec<TextBlock> {
    blocks.sort_by(|a, b| a.bbox.reading_cmp(&b.bbox));
    for (idx, block) in blocks.iter_mut().enumerate() {
        block.reading_order_index = idx;
    }
    blocks
}
