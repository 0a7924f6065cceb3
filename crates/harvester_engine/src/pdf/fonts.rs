//! Character decoding and glyph widths for text-showing operators.
use std::collections::HashMap;

use encoding_rs::{Encoding, MACINTOSH, WINDOWS_1252};
use lopdf::{Dictionary, Document, Object};

use super::objects::{content_bytes, get, get_array, get_dict, get_name, get_number, numbers, resolve};

const DEFAULT_SIMPLE_WIDTH: f64 = 500.0;
const DEFAULT_CID_WIDTH: f64 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Glyph {
    pub text: String,
    /// Advance in glyph space (thousandths of the font size).
    pub width: f64,
    /// Single-byte code 32, which also receives word spacing.
    pub is_word_space: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Font {
    code_len: usize,
    to_unicode: HashMap<u32, String>,
    simple: Vec<String>,
    widths: Widths,
}

#[derive(Debug, Clone)]
enum Widths {
    Simple {
        first_char: u32,
        widths: Vec<f64>,
        missing: f64,
    },
    Cid {
        ranges: Vec<(u32, u32, f64)>,
        default: f64,
    },
}

impl Widths {
    fn width(&self, code: u32) -> f64 {
        match self {
            Widths::Simple {
                first_char,
                widths,
                missing,
            } => code
                .checked_sub(*first_char)
                .and_then(|idx| widths.get(idx as usize))
                .copied()
                .unwrap_or(*missing),
            Widths::Cid { ranges, default } => ranges
                .iter()
                .find(|(lo, hi, _)| (*lo..=*hi).contains(&code))
                .map(|(_, _, w)| *w)
                .unwrap_or(*default),
        }
    }
}

impl Default for Font {
    fn default() -> Self {
        Self {
            code_len: 1,
            to_unicode: HashMap::new(),
            simple: base_table(WINDOWS_1252),
            widths: Widths::Simple {
                first_char: 0,
                widths: Vec::new(),
                missing: DEFAULT_SIMPLE_WIDTH,
            },
        }
    }
}

impl Font {
    pub fn load(doc: &Document, dict: &Dictionary) -> Font {
        let subtype = get_name(doc, dict, b"Subtype").unwrap_or(&b"Type1"[..]);
        let to_unicode = match get(doc, dict, b"ToUnicode") {
            Some(Object::Stream(stream)) => parse_cmap(&content_bytes(doc, stream)),
            _ => CMap::default(),
        };

        if subtype == b"Type0" {
            return Font {
                code_len: 2,
                to_unicode: to_unicode.map,
                simple: Vec::new(),
                widths: cid_widths(doc, dict),
            };
        }

        let (base, differences) = match get(doc, dict, b"Encoding") {
            Some(Object::Name(name)) => (base_encoding(name), None),
            Some(Object::Dictionary(enc)) => (
                get_name(doc, enc, b"BaseEncoding")
                    .map(base_encoding)
                    .unwrap_or(WINDOWS_1252),
                get_array(doc, enc, b"Differences"),
            ),
            _ => (WINDOWS_1252, None),
        };
        let mut simple = base_table(base);
        if let Some(differences) = differences {
            apply_differences(doc, &mut simple, differences);
        }

        let missing = get_dict(doc, dict, b"FontDescriptor")
            .and_then(|desc| get_number(doc, desc, b"MissingWidth"))
            .unwrap_or(DEFAULT_SIMPLE_WIDTH);
        let widths = Widths::Simple {
            first_char: get_number(doc, dict, b"FirstChar").unwrap_or(0.0).max(0.0) as u32,
            widths: get_array(doc, dict, b"Widths")
                .map(|items| numbers(doc, items))
                .unwrap_or_default(),
            missing,
        };

        Font {
            code_len: to_unicode.code_len.unwrap_or(1),
            to_unicode: to_unicode.map,
            simple,
            widths,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Vec<Glyph> {
        bytes
            .chunks(self.code_len)
            .map(|chunk| {
                let code = chunk.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b));
                let text = match self.to_unicode.get(&code) {
                    Some(text) => text.clone(),
                    None if self.code_len == 1 => self.simple[code as usize].clone(),
                    None => char::from_u32(code).map(String::from).unwrap_or_default(),
                };
                Glyph {
                    text,
                    width: self.widths.width(code),
                    is_word_space: self.code_len == 1 && code == 32,
                }
            })
            .collect()
    }
}

fn base_encoding(name: &[u8]) -> &'static Encoding {
    match name {
        b"MacRomanEncoding" => MACINTOSH,
        _ => WINDOWS_1252,
    }
}

fn base_table(encoding: &'static Encoding) -> Vec<String> {
    (0u8..=255)
        .map(|byte| {
            if byte < 0x20 {
                return String::new();
            }
            let bytes = [byte];
            let (text, _) = encoding.decode_without_bom_handling(&bytes);
            text.into_owned()
        })
        .collect()
}

fn apply_differences(doc: &Document, table: &mut [String], differences: &[Object]) {
    let mut code: usize = 0;
    for item in differences {
        match resolve(doc, item) {
            Some(Object::Integer(start)) => code = (*start).max(0) as usize,
            Some(Object::Name(name)) => {
                if let (Some(slot), Some(text)) = (table.get_mut(code), glyph_name_text(name)) {
                    *slot = text;
                }
                code += 1;
            }
            _ => {}
        }
    }
}

/// Unicode text for a glyph name: `uniXXXX`, single characters and a small set
/// of common Latin names.
fn glyph_name_text(name: &[u8]) -> Option<String> {
    let name = std::str::from_utf8(name).ok()?;
    if let Some(hex) = name.strip_prefix("uni") {
        if hex.len() == 4 {
            let value = u32::from_str_radix(hex, 16).ok()?;
            return char::from_u32(value).map(String::from);
        }
    }
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(c.to_string());
    }
    let c = match name {
        "space" => ' ',
        "period" => '.',
        "comma" => ',',
        "colon" => ':',
        "semicolon" => ';',
        "hyphen" | "minus" => '-',
        "endash" => '\u{2013}',
        "emdash" => '\u{2014}',
        "quoteright" => '\u{2019}',
        "quoteleft" => '\u{2018}',
        "quotedblleft" => '\u{201C}',
        "quotedblright" => '\u{201D}',
        "quotedblbase" => '\u{201E}',
        "parenleft" => '(',
        "parenright" => ')',
        "exclam" => '!',
        "question" => '?',
        "slash" => '/',
        "percent" => '%',
        "zero" => '0',
        "one" => '1',
        "two" => '2',
        "three" => '3',
        "four" => '4',
        "five" => '5',
        "six" => '6',
        "seven" => '7',
        "eight" => '8',
        "nine" => '9',
        "aacute" => 'á',
        "eacute" => 'é',
        "iacute" => 'í',
        "oacute" => 'ó',
        "odieresis" => 'ö',
        "ohungarumlaut" => 'ő',
        "uacute" => 'ú',
        "udieresis" => 'ü',
        "uhungarumlaut" => 'ű',
        "Aacute" => 'Á',
        "Eacute" => 'É',
        "Iacute" => 'Í',
        "Oacute" => 'Ó',
        "Odieresis" => 'Ö',
        "Ohungarumlaut" => 'Ő',
        "Uacute" => 'Ú',
        "Udieresis" => 'Ü',
        "Uhungarumlaut" => 'Ű',
        _ => return None,
    };
    Some(c.to_string())
}

fn cid_widths(doc: &Document, dict: &Dictionary) -> Widths {
    let descendant = get_array(doc, dict, b"DescendantFonts")
        .and_then(|items| items.first())
        .and_then(|item| match resolve(doc, item) {
            Some(Object::Dictionary(d)) => Some(d),
            _ => None,
        });
    let Some(descendant) = descendant else {
        return Widths::Cid {
            ranges: Vec::new(),
            default: DEFAULT_CID_WIDTH,
        };
    };
    let default = get_number(doc, descendant, b"DW").unwrap_or(DEFAULT_CID_WIDTH);
    let mut ranges = Vec::new();
    if let Some(items) = get_array(doc, descendant, b"W") {
        // Either `c [w1 w2 ...]` or `c_first c_last w`.
        let mut idx = 0;
        while idx < items.len() {
            let Some(first) = resolve(doc, &items[idx]).and_then(super::objects::number) else {
                break;
            };
            let first = first.max(0.0) as u32;
            match items.get(idx + 1).and_then(|item| resolve(doc, item)) {
                Some(Object::Array(list)) => {
                    for (offset, width) in numbers(doc, list).into_iter().enumerate() {
                        let code = first + offset as u32;
                        ranges.push((code, code, width));
                    }
                    idx += 2;
                }
                Some(last) => {
                    let last = super::objects::number(last).unwrap_or(0.0).max(0.0) as u32;
                    let width = items
                        .get(idx + 2)
                        .and_then(|item| resolve(doc, item))
                        .and_then(super::objects::number)
                        .unwrap_or(default);
                    ranges.push((first, last, width));
                    idx += 3;
                }
                None => break,
            }
        }
    }
    Widths::Cid { ranges, default }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct CMap {
    pub code_len: Option<usize>,
    pub map: HashMap<u32, String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Hex(Vec<u8>),
    Word(String),
    Open,
    Close,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '<' => {
                let mut hex = String::new();
                for h in chars.by_ref() {
                    if h == '>' {
                        break;
                    }
                    if h.is_ascii_hexdigit() {
                        hex.push(h);
                    }
                }
                if hex.len() % 2 == 1 {
                    hex.push('0');
                }
                let bytes = (0..hex.len())
                    .step_by(2)
                    .filter_map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
                    .collect();
                tokens.push(Token::Hex(bytes));
            }
            '[' => tokens.push(Token::Open),
            ']' => tokens.push(Token::Close),
            '%' => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {}
            c => {
                let mut word = c.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '<' | '[' | ']') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    tokens
}

fn code_of(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, b| (acc << 8) | u32::from(*b))
}

fn utf16_text(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            [single] => u16::from(*single),
            _ => 0,
        })
        .collect();
    String::from_utf16_lossy(&units)
}

/// Parses the `bfchar`/`bfrange`/`codespacerange` sections of a ToUnicode CMap.
pub(crate) fn parse_cmap(bytes: &[u8]) -> CMap {
    let text = String::from_utf8_lossy(bytes);
    let tokens = tokenize(&text);
    let mut cmap = CMap::default();
    let mut idx = 0;
    let hex_at = |i: usize| match tokens.get(i) {
        Some(Token::Hex(bytes)) => Some(bytes.clone()),
        _ => None,
    };

    while idx < tokens.len() {
        let Token::Word(word) = &tokens[idx] else {
            idx += 1;
            continue;
        };
        idx += 1;
        match word.as_str() {
            "begincodespacerange" => {
                if let Some(lo) = hex_at(idx) {
                    cmap.code_len = Some(lo.len().max(1));
                }
            }
            "beginbfchar" => {
                while let (Some(src), Some(dst)) = (hex_at(idx), hex_at(idx + 1)) {
                    cmap.map.insert(code_of(&src), utf16_text(&dst));
                    idx += 2;
                }
            }
            "beginbfrange" => loop {
                let (Some(lo), Some(hi)) = (hex_at(idx), hex_at(idx + 1)) else {
                    break;
                };
                let (lo, hi) = (code_of(&lo), code_of(&hi));
                match tokens.get(idx + 2) {
                    Some(Token::Hex(dst)) => {
                        let base = utf16_text(dst);
                        let mut base_chars: Vec<char> = base.chars().collect();
                        for code in lo..=hi.min(lo.saturating_add(0xFFFF)) {
                            cmap.map.insert(code, base_chars.iter().collect());
                            if let Some(last) = base_chars.last_mut() {
                                *last = char::from_u32(*last as u32 + 1).unwrap_or(*last);
                            }
                        }
                        idx += 3;
                    }
                    Some(Token::Open) => {
                        idx += 3;
                        let mut code = lo;
                        while let Some(Token::Hex(dst)) = tokens.get(idx) {
                            if code <= hi {
                                cmap.map.insert(code, utf16_text(dst));
                            }
                            code += 1;
                            idx += 1;
                        }
                        if matches!(tokens.get(idx), Some(Token::Close)) {
                            idx += 1;
                        }
                    }
                    _ => break,
                }
            },
            _ => {}
        }
    }
    cmap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmap_sections_are_parsed() {
        let cmap = parse_cmap(
            b"1 begincodespacerange <0000> <FFFF> endcodespacerange\n\
              2 beginbfchar <0003> <0020> <0011> <0151> endbfchar\n\
              1 beginbfrange <0024> <0026> <0041> endbfrange\n\
              1 beginbfrange <0030> <0031> [<00E9> <0171>] endbfrange",
        );
        assert_eq!(cmap.code_len, Some(2));
        assert_eq!(cmap.map.get(&3).map(String::as_str), Some(" "));
        assert_eq!(cmap.map.get(&0x11).map(String::as_str), Some("ő"));
        assert_eq!(cmap.map.get(&0x26).map(String::as_str), Some("C"));
        assert_eq!(cmap.map.get(&0x31).map(String::as_str), Some("ű"));
    }

    #[test]
    fn default_font_decodes_win_ansi() {
        let glyphs = Font::default().decode(b"A \xe9");
        let text: String = glyphs.iter().map(|g| g.text.as_str()).collect();
        assert_eq!(text, "A é");
        assert!(glyphs[1].is_word_space);
        assert_eq!(glyphs[0].width, DEFAULT_SIMPLE_WIDTH);
    }

    #[test]
    fn base_tables_follow_their_encoding() {
        let win = base_table(base_encoding(b"WinAnsiEncoding"));
        let mac = base_table(base_encoding(b"MacRomanEncoding"));
        assert_eq!(win.len(), 256);
        assert_eq!(win[0x80], "€");
        assert_eq!(mac[0x8e], "é");
        assert_eq!(win[0x41], mac[0x41]);
        assert!(win[0x0a].is_empty());
    }

    #[test]
    fn glyph_names_cover_hungarian_letters() {
        assert_eq!(glyph_name_text(b"ohungarumlaut").as_deref(), Some("ő"));
        assert_eq!(glyph_name_text(b"uni0171").as_deref(), Some("ű"));
        assert_eq!(glyph_name_text(b"g").as_deref(), Some("g"));
        assert_eq!(glyph_name_text(b"f_f_i"), None);
    }
}
