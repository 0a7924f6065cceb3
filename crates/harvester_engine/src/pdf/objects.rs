//! Small accessors over `lopdf` objects that resolve references and tolerate
//! the usual variations (integer vs real numbers, inline vs indirect values).
use engine_logging::engine_debug;
use lopdf::{Dictionary, Document, Object, Stream};

use super::PdfError;

const MAX_REFERENCE_DEPTH: usize = 16;
const MAX_PARENT_DEPTH: usize = 32;

/// Follows indirect references; dangling references resolve to `None`.
pub(crate) fn resolve<'a>(doc: &'a Document, mut object: &'a Object) -> Option<&'a Object> {
    for _ in 0..MAX_REFERENCE_DEPTH {
        match object {
            Object::Reference(id) => object = doc.get_object(*id).ok()?,
            other => return Some(other),
        }
    }
    None
}

pub(crate) fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

pub(crate) fn get<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    dict.get(key).ok().and_then(|object| resolve(doc, object))
}

pub(crate) fn get_number(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<f64> {
    get(doc, dict, key).and_then(number)
}

pub(crate) fn get_name<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match get(doc, dict, key)? {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

pub(crate) fn get_dict<'a>(
    doc: &'a Document,
    dict: &'a Dictionary,
    key: &[u8],
) -> Option<&'a Dictionary> {
    match get(doc, dict, key)? {
        Object::Dictionary(inner) => Some(inner),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

pub(crate) fn get_array<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [Object]> {
    match get(doc, dict, key)? {
        Object::Array(items) => Some(items.as_slice()),
        _ => None,
    }
}

pub(crate) fn numbers(doc: &Document, items: &[Object]) -> Vec<f64> {
    items
        .iter()
        .filter_map(|item| resolve(doc, item).and_then(number))
        .collect()
}

/// Looks `key` up on a page dictionary, walking the `/Parent` chain for
/// inheritable attributes (`/Resources`, `/MediaBox`).
pub(crate) fn inherited<'a>(doc: &'a Document, page: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut current = page;
    for _ in 0..MAX_PARENT_DEPTH {
        if let Some(value) = get(doc, current, key) {
            return Some(value);
        }
        current = get_dict(doc, current, b"Parent")?;
    }
    None
}

/// Names of the filters applied to a stream, outermost first.
pub(crate) fn filters(doc: &Document, stream: &Stream) -> Vec<Vec<u8>> {
    match get(doc, &stream.dict, b"Filter") {
        Some(Object::Name(name)) => vec![name.clone()],
        Some(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match resolve(doc, item) {
                Some(Object::Name(name)) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Filters `Stream::decompressed_content` knows how to undo.
const DECODABLE_FILTERS: [&[u8]; 2] = [b"FlateDecode", b"LZWDecode"];

/// Undoes `filters` on a detached copy of the stream. lopdf refuses
/// `/Subtype /Image` streams and unresolved `/Filter` references, so the copy
/// carries the resolved names and no subtype.
pub(crate) fn decode_filters(stream: &Stream, filters: &[Vec<u8>]) -> lopdf::Result<Vec<u8>> {
    let mut dict = stream.dict.clone();
    dict.remove(b"Subtype");
    let names = filters.iter().map(|name| Object::Name(name.clone())).collect();
    dict.set("Filter", Object::Array(names));
    Stream::new(dict, stream.content.clone()).decompressed_content()
}

/// Decoded stream bytes. Fails on filters that cannot be undone here.
pub(crate) fn stream_bytes(doc: &Document, stream: &Stream) -> Result<Vec<u8>, PdfError> {
    let filters = filters(doc, stream);
    if filters.is_empty() {
        return Ok(stream.content.clone());
    }
    if let Some(unknown) = filters.iter().find(|f| !DECODABLE_FILTERS.contains(&f.as_slice())) {
        return Err(PdfError::UnsupportedFilter(String::from_utf8_lossy(unknown).into_owned()));
    }
    decode_filters(stream, &filters)
        .map_err(|err| PdfError::Malformed(format!("cannot decode stream: {err}")))
}

/// Bytes of a content-like stream (page contents, forms, CMaps). When the
/// filters cannot be undone the raw bytes are returned; the parser drops
/// whatever does not tokenize.
pub(crate) fn content_bytes(doc: &Document, stream: &Stream) -> Vec<u8> {
    let filters = filters(doc, stream);
    if filters.is_empty() {
        return stream.content.clone();
    }
    match decode_filters(stream, &filters) {
        Ok(bytes) => bytes,
        Err(err) => {
            engine_debug!("Using raw stream bytes, decoding failed: {err}");
            stream.content.clone()
        }
    }
}
