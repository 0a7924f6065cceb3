//! Language identification capability used by admission.

/// A classifier verdict: language code and confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LanguageVerdict {
    pub code: String,
    pub confidence: f64,
}

pub trait LanguageClassifier: Send + Sync {
    /// `None` when the text carries no usable signal.
    fn classify(&self, text: &str) -> Option<LanguageVerdict>;
}

/// Trigram classifier backed by `whatlang`, reporting ISO 639-1 codes where one exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhatlangClassifier;

impl LanguageClassifier for WhatlangClassifier {
    fn classify(&self, text: &str) -> Option<LanguageVerdict> {
        let flattened = text.replace(['\n', '\r'], " ");
        let info = whatlang::detect(&flattened)?;
        let code = info.lang().code();
        Some(LanguageVerdict {
            code: iso_639_1(code).unwrap_or(code).to_string(),
            confidence: info.confidence(),
        })
    }
}

fn iso_639_1(code: &str) -> Option<&'static str> {
    let short = match code {
        "afr" => "af",
        "aka" => "ak",
        "amh" => "am",
        "ara" => "ar",
        "aze" => "az",
        "bel" => "be",
        "ben" => "bn",
        "bul" => "bg",
        "cat" => "ca",
        "ces" => "cs",
        "cmn" => "zh",
        "dan" => "da",
        "deu" => "de",
        "ell" => "el",
        "eng" => "en",
        "epo" => "eo",
        "est" => "et",
        "fin" => "fi",
        "fra" => "fr",
        "guj" => "gu",
        "heb" => "he",
        "hin" => "hi",
        "hrv" => "hr",
        "hun" => "hu",
        "hye" => "hy",
        "ind" => "id",
        "ita" => "it",
        "jav" => "jv",
        "jpn" => "ja",
        "kan" => "kn",
        "kat" => "ka",
        "khm" => "km",
        "kor" => "ko",
        "lat" => "la",
        "lav" => "lv",
        "lit" => "lt",
        "mal" => "ml",
        "mar" => "mr",
        "mkd" => "mk",
        "mya" => "my",
        "nep" => "ne",
        "nld" => "nl",
        "nob" => "nb",
        "ori" => "or",
        "pan" => "pa",
        "pes" => "fa",
        "pol" => "pl",
        "por" => "pt",
        "ron" => "ro",
        "rus" => "ru",
        "sin" => "si",
        "slk" => "sk",
        "slv" => "sl",
        "sna" => "sn",
        "spa" => "es",
        "srp" => "sr",
        "swe" => "sv",
        "tam" => "ta",
        "tel" => "te",
        "tgl" => "tl",
        "tha" => "th",
        "tuk" => "tk",
        "tur" => "tr",
        "ukr" => "uk",
        "urd" => "ur",
        "uzb" => "uz",
        "vie" => "vi",
        "yid" => "yi",
        "zul" => "zu",
        _ => return None,
    };
    Some(short)
}
