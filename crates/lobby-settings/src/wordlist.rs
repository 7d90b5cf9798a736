//! The bad-word list used by the auto-moderation filters.

use std::path::Path;

use serde::Deserialize;

use crate::errors::{Result, SettingsError};

/// Lower-cased, deduplicated list of filtered words. Loaded once at startup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BadWords {
    words: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WordListFile {
    Plain(Vec<String>),
    Wrapped { words: Vec<String> },
}

impl BadWords {
    /// Build from raw entries. Entries are trimmed and lower-cased; blanks and
    /// repeats are dropped. Order of first appearance is kept.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out: Vec<String> = Vec::new();
        for word in words {
            let word = word.as_ref().trim().to_lowercase();
            if word.is_empty() || out.contains(&word) {
                continue;
            }
            out.push(word);
        }
        Self { words: out }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.words.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Load the list from a JSON file holding either `["w1", "w2"]` or `{"words": [...]}`.
pub fn load_bad_words(path: &Path) -> Result<BadWords> {
    let shown = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|e| SettingsError::WordList {
        path: shown.clone(),
        reason: e.to_string(),
    })?;
    let file: WordListFile = serde_json::from_str(&content).map_err(|e| SettingsError::WordList {
        path: shown.clone(),
        reason: e.to_string(),
    })?;
    let words = match file {
        WordListFile::Plain(words) | WordListFile::Wrapped { words } => words,
    };
    let list = BadWords::new(words);
    tracing::debug!(path = %shown, count = list.len(), "loaded word list");
    Ok(list)
}
