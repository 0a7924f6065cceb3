//! Synthetic PDF documents for tests.
use std::error::Error;
use std::io::{self, Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::thread;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// An RGB image XObject placed with a `cm` matrix, stored raw unless
/// `compressed` asks for `/FlateDecode`.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub placement: [i64; 6],
    pub compressed: bool,
}

impl FixtureImage {
    /// Deterministic pseudo-random pixels; noise survives JPEG size heuristics.
    pub fn noise(width: u32, height: u32, seed: u32) -> Self {
        Self {
            width,
            height,
            pixels: noise_pixels(width, height, seed),
            placement: [i64::from(width), 0, 0, i64::from(height), 0, 0],
            compressed: false,
        }
    }

    /// A single flat colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            pixels,
            placement: [i64::from(width), 0, 0, i64::from(height), 0, 0],
            compressed: false,
        }
    }

    pub fn placed(mut self, matrix: [i64; 6]) -> Self {
        self.placement = matrix;
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compressed = true;
        self
    }
}

fn zlib(bytes: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

pub fn noise_pixels(width: u32, height: u32, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..width as usize * height as usize * 3)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixtureText {
    pub x: i64,
    pub y: i64,
    pub size: i64,
    pub text: String,
}

/// A form XObject drawn with the page's resources. The content is stored
/// as given, so a filter that does not match it makes the form unreadable.
#[derive(Debug, Clone, PartialEq)]
pub struct FixtureForm {
    pub content: Vec<u8>,
    pub filter: Option<String>,
}

impl FixtureForm {
    pub fn raw(content: &[u8]) -> Self {
        Self {
            content: content.to_vec(),
            filter: None,
        }
    }

    pub fn flate(content: &[u8]) -> io::Result<Self> {
        Ok(Self {
            content: zlib(content)?,
            filter: Some("FlateDecode".to_string()),
        })
    }

    pub fn with_filter(mut self, filter: &str) -> Self {
        self.filter = Some(filter.to_string());
        self
    }
}

/// A page in PDF user space (origin bottom-left).
#[derive(Debug, Clone, PartialEq)]
pub struct FixturePage {
    pub width: i64,
    pub height: i64,
    pub texts: Vec<FixtureText>,
    pub images: Vec<FixtureImage>,
    pub forms: Vec<FixtureForm>,
}

impl Default for FixturePage {
    fn default() -> Self {
        Self {
            width: 612,
            height: 792,
            texts: Vec::new(),
            images: Vec::new(),
            forms: Vec::new(),
        }
    }
}

impl FixturePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text at baseline `(x, y)` in Helvetica.
    pub fn text(mut self, x: i64, y: i64, size: i64, text: &str) -> Self {
        self.texts.push(FixtureText {
            x,
            y,
            size,
            text: text.to_string(),
        });
        self
    }

    pub fn image(mut self, image: FixtureImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn form(mut self, form: FixtureForm) -> Self {
        self.forms.push(form);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdfBuilder {
    pages: Vec<FixturePage>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: FixturePage) -> Self {
        self.pages.push(page);
        self
    }

    pub fn save(&self, path: &Path) -> Result<(), Box<dyn Error>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut kids = Vec::new();
        for page in &self.pages {
            let mut xobjects = lopdf::Dictionary::new();
            let mut operations = Vec::new();

            for (idx, image) in page.images.iter().enumerate() {
                let mut dict = dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => i64::from(image.width),
                    "Height" => i64::from(image.height),
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                };
                let samples = if image.compressed {
                    dict.set("Filter", "FlateDecode");
                    zlib(&image.pixels)?
                } else {
                    image.pixels.clone()
                };
                let image_id = doc.add_object(Stream::new(dict, samples));
                let name = format!("Im{idx}");
                xobjects.set(name.as_bytes().to_vec(), Object::Reference(image_id));
                operations.push(Operation::new("q", vec![]));
                operations.push(Operation::new(
                    "cm",
                    image.placement.iter().map(|v| Object::Integer(*v)).collect(),
                ));
                operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
                operations.push(Operation::new("Q", vec![]));
            }

            for (idx, form) in page.forms.iter().enumerate() {
                let mut dict = dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Form",
                    "BBox" => vec![0.into(), 0.into(), Object::Integer(page.width), Object::Integer(page.height)],
                };
                if let Some(filter) = &form.filter {
                    dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
                }
                let form_id = doc.add_object(Stream::new(dict, form.content.clone()));
                let name = format!("Fm{idx}");
                xobjects.set(name.as_bytes().to_vec(), Object::Reference(form_id));
                operations.push(Operation::new("q", vec![]));
                operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
                operations.push(Operation::new("Q", vec![]));
            }

            for text in &page.texts {
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new(
                    "Tf",
                    vec![Object::Name(b"F1".to_vec()), Object::Integer(text.size)],
                ));
                operations.push(Operation::new(
                    "Td",
                    vec![Object::Integer(text.x), Object::Integer(text.y)],
                ));
                operations.push(Operation::new("Tj", vec![Object::string_literal(text.text.as_str())]));
                operations.push(Operation::new("ET", vec![]));
            }

            let content = Content { operations }.encode()?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, content));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), Object::Integer(page.width), Object::Integer(page.height)],
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                    "XObject" => xobjects,
                },
            });
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path)?;
        Ok(())
    }
}

/// Serves `body` once over HTTP/1.1 with no Content-Length, ending it by
/// closing the connection. Returns the URL to request.
pub fn serve_without_length(body: Vec<u8>) -> io::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    thread::spawn(move || {
        let Ok((mut stream, _)) = listener.accept() else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }
        let head = b"HTTP/1.1 200 OK\r\nContent-Type: application/pdf\r\nConnection: close\r\n\r\n";
        // The client may hang up after the headers; that is fine.
        let _ = stream.write_all(head).and_then(|()| stream.write_all(&body));
    });
    Ok(format!("http://{addr}/document.pdf"))
}
