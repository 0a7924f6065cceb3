use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::model::CandidateLink;

static DOC_EXT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\.(pdf)$").unwrap());
static VIDEO_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(mp4|wav|avi|mov|webm)$").unwrap());
static YOUTUBE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://(www\.)?youtube\.com/watch\?v=\w+").unwrap());
static VIMEO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://(www\.)?vimeo\.com/\d+").unwrap());
static DOT_SEGMENTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.+/").unwrap());

pub const DEFAULT_BAN_WORDS: &[&str] = &["porn", "xxx", "sex", "ad", "banner"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaClass {
    Document,
    Video,
}

impl MediaClass {
    pub fn matches(&self, link: &str) -> bool {
        match self {
            MediaClass::Document => DOC_EXT.is_match(link),
            MediaClass::Video => {
                YOUTUBE.is_match(link) || VIMEO.is_match(link) || VIDEO_EXT.is_match(link)
            }
        }
    }
}

impl fmt::Display for MediaClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaClass::Document => write!(f, "document"),
            MediaClass::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown media class {0:?} (expected \"document\" or \"video\")")]
pub struct UnknownMediaClass(pub String);

impl FromStr for MediaClass {
    type Err = UnknownMediaClass;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" => Ok(MediaClass::Document),
            "video" => Ok(MediaClass::Video),
            other => Err(UnknownMediaClass(other.to_string())),
        }
    }
}

/// Case-insensitive substring ban list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanList {
    words: Vec<String>,
}

impl BanList {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|w| w.as_ref().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn is_banned(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.words.iter().any(|word| lower.contains(word.as_str()))
    }
}

impl Default for BanList {
    fn default() -> Self {
        Self::new(DEFAULT_BAN_WORDS)
    }
}

/// Turns a link found on `page_url` into an absolute URL.
///
/// Absolute http(s) links pass through, protocol-relative links get `http:`,
/// anything else is rebased onto the page host with dot segments removed.
pub fn normalize_link(page_url: &str, link: &str) -> Option<String> {
    let link = link.trim();
    if link.is_empty() {
        return None;
    }
    if link.to_ascii_lowercase().starts_with("http") {
        return Some(link.to_string());
    }
    if link.starts_with("//") {
        return Some(format!("http:{link}"));
    }
    if has_foreign_scheme(link) {
        return None;
    }

    let mut path = if link.contains("./") {
        DOT_SEGMENTS.replace_all(link, "").into_owned()
    } else {
        link.to_string()
    };
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    let page = Url::parse(page_url).ok()?;
    let host = page.host_str()?;
    let netloc = match page.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Some(format!("https://{netloc}{path}"))
}

fn has_foreign_scheme(link: &str) -> bool {
    let lower = link.to_ascii_lowercase();
    ["mailto:", "javascript:", "data:", "tel:", "ftp:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

/// Per-run link filter: ban list, media class, normalization and dedup.
#[derive(Debug, Clone)]
pub struct LinkHarvester {
    target: MediaClass,
    ban_list: BanList,
    seen: HashSet<String>,
}

impl LinkHarvester {
    pub fn new(target: MediaClass) -> Self {
        Self::with_ban_list(target, BanList::default())
    }

    pub fn with_ban_list(target: MediaClass, ban_list: BanList) -> Self {
        Self {
            target,
            ban_list,
            seen: HashSet::new(),
        }
    }

    pub fn target(&self) -> MediaClass {
        self.target
    }

    /// Returns the candidate the first time a qualifying link is offered, `None` otherwise.
    pub fn offer(&mut self, page_url: &str, link: &str) -> Option<CandidateLink> {
        if self.ban_list.is_banned(link) || !self.target.matches(link.trim()) {
            return None;
        }
        let url = normalize_link(page_url, link)?;
        if !self.seen.insert(url.clone()) {
            return None;
        }
        Some(CandidateLink {
            url,
            source_page_url: page_url.to_string(),
        })
    }

    pub fn emitted(&self) -> usize {
        self.seen.len()
    }
}
