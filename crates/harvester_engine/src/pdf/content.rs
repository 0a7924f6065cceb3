//! Content-stream interpreter: positioned text spans and image placements.
use std::collections::HashMap;
use std::rc::Rc;

use engine_logging::{engine_debug, engine_warn};
use harvester_core::{Matrix, PageFrame, Rect, TextSpan};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};

use super::fonts::Font;
use super::objects::{content_bytes, get, get_array, get_dict, get_name, number, numbers, resolve};
use super::PdfError;

const MAX_FORM_DEPTH: usize = 8;
/// TJ adjustments at least this wide (thousandths of an em) read as word breaks.
const TJ_SPACE_THRESHOLD: f64 = 250.0;

/// One placement of an image XObject; `ctm` is the raw PDF placement matrix
/// (unit square to user space) and `bbox` its footprint in page space.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub object_id: ObjectId,
    pub ctm: Matrix,
    pub bbox: Rect,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    pub spans: Vec<TextSpan>,
    pub images: Vec<ImagePlacement>,
}

#[derive(Debug, Clone)]
struct GraphicsState {
    ctm: Matrix,
    font: Option<Rc<Font>>,
    font_size: f64,
    char_spacing: f64,
    word_spacing: f64,
    horizontal_scale: f64,
    leading: f64,
    rise: f64,
}

impl GraphicsState {
    fn new(ctm: Matrix) -> Self {
        Self {
            ctm,
            font: None,
            font_size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            horizontal_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
        }
    }
}

enum Shown<'o> {
    Bytes(&'o [u8]),
    Adjust(f64),
}

pub(crate) struct Interpreter<'a> {
    doc: &'a Document,
    frame: PageFrame,
    fonts: HashMap<ObjectId, Rc<Font>>,
    fallback_font: Rc<Font>,
    out: PageContent,
}

impl<'a> Interpreter<'a> {
    pub fn new(doc: &'a Document, frame: PageFrame) -> Self {
        Self {
            doc,
            frame,
            fonts: HashMap::new(),
            fallback_font: Rc::new(Font::default()),
            out: PageContent::default(),
        }
    }

    pub fn run(mut self, content: &[u8], resources: Option<&'a Dictionary>) -> Result<PageContent, PdfError> {
        self.execute(content, resources, GraphicsState::new(Matrix::IDENTITY), 0)?;
        Ok(self.out)
    }

    fn execute(
        &mut self,
        bytes: &[u8],
        resources: Option<&'a Dictionary>,
        base: GraphicsState,
        depth: usize,
    ) -> Result<(), PdfError> {
        let content = Content::decode(bytes)
            .map_err(|err| PdfError::Malformed(format!("content stream: {err}")))?;

        let mut gs = base;
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut tm = Matrix::IDENTITY;
        let mut tlm = Matrix::IDENTITY;
        let doc = self.doc;

        for op in &content.operations {
            let nums = || numbers(doc, &op.operands);
            match op.operator.as_str() {
                "q" => stack.push(gs.clone()),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        gs = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix_from(&nums()) {
                        gs.ctm = m.then(&gs.ctm);
                    }
                }
                "BT" => {
                    tm = Matrix::IDENTITY;
                    tlm = Matrix::IDENTITY;
                }
                "Tf" => {
                    if let (Some(Object::Name(name)), Some(size)) =
                        (op.operands.first(), op.operands.get(1).and_then(number))
                    {
                        gs.font = Some(self.font(resources, name));
                        gs.font_size = size;
                    }
                }
                "Tc" => set_first(&nums(), &mut gs.char_spacing),
                "Tw" => set_first(&nums(), &mut gs.word_spacing),
                "TL" => set_first(&nums(), &mut gs.leading),
                "Ts" => set_first(&nums(), &mut gs.rise),
                "Tz" => {
                    if let Some(scale) = nums().first() {
                        gs.horizontal_scale = scale / 100.0;
                    }
                }
                "Td" | "TD" => {
                    if let [tx, ty] = nums()[..] {
                        if op.operator == "TD" {
                            gs.leading = -ty;
                        }
                        tlm = Matrix::translate(tx, ty).then(&tlm);
                        tm = tlm;
                    }
                }
                "Tm" => {
                    if let Some(m) = matrix_from(&nums()) {
                        tlm = m;
                        tm = m;
                    }
                }
                "T*" => {
                    tlm = Matrix::translate(0.0, -gs.leading).then(&tlm);
                    tm = tlm;
                }
                "Tj" => {
                    if let Some(bytes) = op.operands.first().and_then(string_bytes) {
                        self.show(&gs, &mut tm, &[Shown::Bytes(bytes)]);
                    }
                }
                "'" => {
                    tlm = Matrix::translate(0.0, -gs.leading).then(&tlm);
                    tm = tlm;
                    if let Some(bytes) = op.operands.first().and_then(string_bytes) {
                        self.show(&gs, &mut tm, &[Shown::Bytes(bytes)]);
                    }
                }
                "\"" => {
                    if let [Some(aw), Some(ac)] = [
                        op.operands.first().and_then(number),
                        op.operands.get(1).and_then(number),
                    ] {
                        gs.word_spacing = aw;
                        gs.char_spacing = ac;
                    }
                    tlm = Matrix::translate(0.0, -gs.leading).then(&tlm);
                    tm = tlm;
                    if let Some(bytes) = op.operands.get(2).and_then(string_bytes) {
                        self.show(&gs, &mut tm, &[Shown::Bytes(bytes)]);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = op.operands.first() {
                        let shown: Vec<Shown> = items
                            .iter()
                            .filter_map(|item| match item {
                                Object::String(bytes, _) => Some(Shown::Bytes(bytes.as_slice())),
                                other => number(other).map(Shown::Adjust),
                            })
                            .collect();
                        self.show(&gs, &mut tm, &shown);
                    }
                }
                "Do" => {
                    if let Some(Object::Name(name)) = op.operands.first() {
                        self.invoke_xobject(resources, name, &gs, depth);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn font(&mut self, resources: Option<&'a Dictionary>, name: &[u8]) -> Rc<Font> {
        let Some(entry) = resources
            .and_then(|res| get_dict(self.doc, res, b"Font"))
            .and_then(|fonts| fonts.get(name).ok())
        else {
            return self.fallback_font.clone();
        };
        let id = entry.as_reference().ok();
        if let Some(font) = id.and_then(|id| self.fonts.get(&id)) {
            return font.clone();
        }
        let font = match resolve(self.doc, entry) {
            Some(Object::Dictionary(dict)) => Rc::new(Font::load(self.doc, dict)),
            _ => self.fallback_font.clone(),
        };
        if let Some(id) = id {
            self.fonts.insert(id, font.clone());
        }
        font
    }

    fn show(&mut self, gs: &GraphicsState, tm: &mut Matrix, items: &[Shown<'_>]) {
        let font = gs.font.clone().unwrap_or_else(|| self.fallback_font.clone());
        let size = gs.font_size;
        let start = *tm;
        let mut advance = 0.0;
        let mut text = String::new();

        for item in items {
            match item {
                Shown::Bytes(bytes) => {
                    for glyph in font.decode(bytes) {
                        let mut tx = glyph.width / 1000.0 * size + gs.char_spacing;
                        if glyph.is_word_space {
                            tx += gs.word_spacing;
                        }
                        advance += tx * gs.horizontal_scale;
                        text.push_str(&glyph.text);
                    }
                }
                Shown::Adjust(amount) => {
                    advance -= amount / 1000.0 * size * gs.horizontal_scale;
                    if *amount <= -TJ_SPACE_THRESHOLD && !text.is_empty() && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
            }
        }
        *tm = Matrix::translate(advance, 0.0).then(&start);

        if text.trim().is_empty() {
            return;
        }
        let rendering = start.then(&gs.ctm);
        let (x0, y0, x1, y1) = rendering.transform_rect(
            0.0,
            gs.rise - 0.2 * size,
            advance,
            gs.rise + 0.8 * size,
        );
        let bbox = self.frame.to_page_rect(x0, y0, x1, y1);
        if bbox.height() <= 0.0 {
            return;
        }
        self.out.spans.push(TextSpan {
            bbox,
            text,
            font_size: bbox.height(),
        });
    }

    fn invoke_xobject(
        &mut self,
        resources: Option<&'a Dictionary>,
        name: &[u8],
        gs: &GraphicsState,
        depth: usize,
    ) {
        let Some(entry) = resources
            .and_then(|res| get_dict(self.doc, res, b"XObject"))
            .and_then(|xobjects| xobjects.get(name).ok())
        else {
            engine_debug!("Unknown XObject /{}", String::from_utf8_lossy(name));
            return;
        };
        let Some(Object::Stream(stream)) = resolve(self.doc, entry) else {
            return;
        };

        match get_name(self.doc, &stream.dict, b"Subtype") {
            Some(b"Image") => {
                if let Ok(object_id) = entry.as_reference() {
                    let (x0, y0, x1, y1) = gs.ctm.transform_rect(0.0, 0.0, 1.0, 1.0);
                    self.out.images.push(ImagePlacement {
                        object_id,
                        ctm: gs.ctm,
                        bbox: self.frame.to_page_rect(x0, y0, x1, y1),
                    });
                }
            }
            Some(b"Form") if depth < MAX_FORM_DEPTH => {
                let form_matrix = get_array(self.doc, &stream.dict, b"Matrix")
                    .and_then(|items| matrix_from(&numbers(self.doc, items)))
                    .unwrap_or(Matrix::IDENTITY);
                let form_resources = get_dict(self.doc, &stream.dict, b"Resources").or(resources);
                let bytes = content_bytes(self.doc, stream);
                let mut inner = gs.clone();
                inner.ctm = form_matrix.then(&gs.ctm);
                // A broken form loses only its own marks, not the page.
                if let Err(err) = self.execute(&bytes, form_resources, inner, depth + 1) {
                    engine_warn!("Skipping form XObject /{}: {err}", String::from_utf8_lossy(name));
                }
            }
            _ => {}
        }
    }
}

fn matrix_from(values: &[f64]) -> Option<Matrix> {
    match *values {
        [a, b, c, d, e, f] => Some(Matrix::new(a, b, c, d, e, f)),
        _ => None,
    }
}

fn set_first(values: &[f64], target: &mut f64) {
    if let Some(value) = values.first() {
        *target = *value;
    }
}

fn string_bytes(object: &Object) -> Option<&[u8]> {
    match object {
        Object::String(bytes, _) => Some(bytes.as_slice()),
        _ => None,
    }
}

/// Concatenated, decoded page content streams.
pub(crate) fn page_content_bytes(doc: &Document, page: &Dictionary) -> Vec<u8> {
    let streams: Vec<&Object> = match get(doc, page, b"Contents") {
        Some(Object::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
        None => Vec::new(),
    };
    let mut bytes = Vec::new();
    for item in streams {
        if let Some(Object::Stream(stream)) = resolve(doc, item) {
            bytes.extend(content_bytes(doc, stream));
            bytes.push(b'\n');
        }
    }
    bytes
}
