use std::sync::LazyLock;

use regex::Regex;

use crate::model::{SequenceEntry, TextBlock};

static WRAPPED_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\w)\n(\w)").unwrap());
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Builds the interleaved sequence, merging consecutive text entries.
///
/// Only the tag of the last emitted entry is inspected: text following an
/// image-only entry always opens a new entry.
#[derive(Debug, Default)]
pub struct SequenceBuilder {
    entries: Vec<SequenceEntry>,
}

impl SequenceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_image(&mut self, file_name: impl Into<String>) {
        self.entries.push(SequenceEntry::Image(file_name.into()));
    }

    pub fn push_text(&mut self, text: &str) {
        if let Some(SequenceEntry::Text(previous)) = self.entries.last_mut() {
            if !previous.ends_with(' ') {
                previous.push(' ');
            }
            previous.push_str(text);
        } else {
            self.entries.push(SequenceEntry::Text(text.to_string()));
        }
    }

    /// Emits one page: for every block, its assigned images first, then its text.
    pub fn push_page(&mut self, blocks: &[TextBlock], images_per_block: &[Vec<String>]) {
        for (idx, block) in blocks.iter().enumerate() {
            if let Some(images) = images_per_block.get(idx) {
                for name in images {
                    self.push_image(name.clone());
                }
            }
            self.push_text(&clean_block_text(&block.raw_text));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finalizes the sequence, collapsing whitespace runs in every text entry.
    pub fn finish(self) -> Vec<SequenceEntry> {
        self.entries
            .into_iter()
            .map(|entry| match entry {
                SequenceEntry::Text(text) => SequenceEntry::Text(collapse_whitespace(&text)),
                image => image,
            })
            .collect()
    }
}

/// Undoes line-wrapping artifacts inside one block: hyphenated breaks and mid-sentence newlines.
pub fn clean_block_text(raw: &str) -> String {
    let trimmed = raw.trim_matches('\n').replace("-\n", "");
    WRAPPED_WORD.replace_all(&trimmed, "$1 $2").into_owned()
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text, " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::{clean_block_text, collapse_whitespace, SequenceBuilder};
    use crate::model::SequenceEntry;

    #[test]
    fn hyphenated_breaks_are_joined() {
        assert_eq!(clean_block_text("exam-\nple text\n"), "example text");
    }

    #[test]
    fn wrapped_words_get_a_space() {
        assert_eq!(clean_block_text("first\nsecond"), "first second");
    }

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(collapse_whitespace("a \n\t b"), "a b");
    }

    #[test]
    fn text_after_image_starts_new_entry() {
        let mut builder = SequenceBuilder::new();
        builder.push_text("one");
        builder.push_image("img.jpg");
        builder.push_text("two");
        builder.push_text("three");
        assert_eq!(
            builder.finish(),
            vec![
                SequenceEntry::Text("one".into()),
                SequenceEntry::Image("img.jpg".into()),
                SequenceEntry::Text("two three".into()),
            ]
        );
    }
}
