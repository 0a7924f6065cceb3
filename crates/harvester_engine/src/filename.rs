use std::path::Path;

/// Name of the `index`-th downloaded document: the zero-padded index, so line `i` of the
/// URL list maps to `{i:08}.pdf`.
pub fn document_filename(index: usize) -> String {
    format!("{index:08}.pdf")
}

/// Recovers the URL list index from a downloaded document name.
pub fn document_index(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// `{stem}_page_{page}_xref_{object}.{ext}`; stable across reruns on the same input.
pub fn image_filename(pdf_stem: &str, page_number: usize, object_number: u32, ext: &str) -> String {
    format!(
        "{}_page_{page_number}_xref_{object_number}.{ext}",
        sanitize_stem(pdf_stem)
    )
}

/// The sidecar sits next to the image with the extension swapped for `json`.
pub fn sidecar_filename(image_name: &str) -> String {
    match image_name.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.json"),
        None => format!("{image_name}.json"),
    }
}

fn sanitize_stem(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned.to_string()
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}
