use crate::geometry::Rect;
use crate::model::TextBlock;

/// Index of the block whose center is nearest to `image`'s center; the first minimum wins.
pub fn nearest_block(blocks: &[TextBlock], image: &Rect) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, block) in blocks.iter().enumerate() {
        let distance = block.bbox.center_distance(image);
        match best {
            Some((_, closest)) if distance >= closest => {}
            _ => best = Some((idx, distance)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Assigns each image (in extraction order) to its nearest block.
///
/// The result has one list per block holding the image names in extraction order.
pub fn associate_images<'a, I>(blocks: &[TextBlock], images: I) -> Vec<Vec<String>>
where
    I: IntoIterator<Item = (&'a str, &'a Rect)>,
{
    let mut assigned = vec![Vec::new(); blocks.len()];
    for (name, bbox) in images {
        if let Some(idx) = nearest_block(blocks, bbox) {
            assigned[idx].push(name.to_string());
        }
    }
    assigned
}
