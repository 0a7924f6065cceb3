use std::collections::HashMap;

/// Content-hash index for cross-document image dedup over one run.
///
/// Disabled unless a reference corpus is supplied; a disabled index admits everything.
#[derive(Debug, Clone, Default)]
pub struct ContentHashIndex {
    enabled: bool,
    seen: HashMap<String, Option<String>>,
}

impl ContentHashIndex {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled index seeded with reference digests.
    pub fn with_reference<I, S>(digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let seen = digests
            .into_iter()
            .map(|d| d.as_ref().trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .map(|d| (d, None))
            .collect();
        Self {
            enabled: true,
            seen,
        }
    }

    /// Parses newline-delimited hex digests; `#` starts a comment line.
    pub fn parse_reference(text: &str) -> Self {
        Self::with_reference(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#')),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records `digest` and reports whether it is novel. Always true when disabled.
    pub fn admit(&mut self, digest: &str, file_name: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let key = digest.to_ascii_lowercase();
        if self.seen.contains_key(&key) {
            return false;
        }
        self.seen.insert(key, Some(file_name.to_string()));
        true
    }

    /// The file that first claimed `digest` in this run, if any.
    pub fn first_claim(&self, digest: &str) -> Option<&str> {
        self.seen
            .get(&digest.to_ascii_lowercase())
            .and_then(|name| name.as_deref())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
