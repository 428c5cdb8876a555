//! Translation dictionary: ordered original → translated mapping

use std::collections::HashMap;
use std::ops::Range;

use tracing::debug;

use crate::cleanup::{CleanupPolicy, ExclusionRules, fix_spaces};

/// One `(msgid, msgstr)` pair as read from a translation file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRecord {
    pub msgid: String,
    pub msgstr: String,
}

impl TranslationRecord {
    pub fn new(msgid: impl Into<String>, msgstr: impl Into<String>) -> Self {
        Self {
            msgid: msgid.into(),
            msgstr: msgstr.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationEntry {
    pub original: String,
    pub translated: String,
    pub language: Option<String>,
}

impl TranslationEntry {
    /// Empty translations are kept in the dictionary but never patched
    pub fn is_noop(&self) -> bool {
        self.translated.is_empty()
    }
}

/// Ordered mapping from original strings to cleaned translations.
///
/// Built once per patch run and immutable afterwards. When an original
/// repeats, the first translation seen wins and later ones are counted in
/// [`Dictionary::duplicates`].
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    language: Option<String>,
    entries: Vec<TranslationEntry>,
    index: HashMap<String, usize>,
    duplicates: usize,
    /// Position of the first entry in the dictionary this one was cut from
    first_index: usize,
}

impl Dictionary {
    /// Build a dictionary from translation records, applying symbol
    /// substitution and exclusion-aware space fixing to every `msgstr`.
    pub fn load<I>(
        records: I,
        language: Option<&str>,
        exclusions: &ExclusionRules,
        policy: &CleanupPolicy,
    ) -> Self
    where
        I: IntoIterator<Item = TranslationRecord>,
    {
        let mut dictionary = Self {
            language: language.map(str::to_string),
            ..Default::default()
        };

        for record in records {
            let mut translated = policy.symbols.apply(&record.msgstr);
            if policy.fix_spaces && !exclusions.is_excluded(language, &record.msgid) {
                translated = fix_spaces(&record.msgid, &translated);
            }
            dictionary.push(record.msgid, translated);
        }

        debug!(
            "Loaded dictionary: {} entries, {} duplicates ignored",
            dictionary.len(),
            dictionary.duplicates
        );
        dictionary
    }

    /// Build a dictionary from already-cleaned pairs
    pub fn from_pairs<I, K, V>(pairs: I, language: Option<&str>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut dictionary = Self {
            language: language.map(str::to_string),
            ..Default::default()
        };
        for (original, translated) in pairs {
            dictionary.push(original.into(), translated.into());
        }
        dictionary
    }

    fn push(&mut self, original: String, translated: String) {
        if self.index.contains_key(&original) {
            self.duplicates += 1;
            return;
        }
        self.index.insert(original.clone(), self.entries.len());
        self.entries.push(TranslationEntry {
            original,
            translated,
            language: self.language.clone(),
        });
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.index
            .get(original)
            .map(|&i| self.entries[i].translated.as_str())
    }

    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of records dropped because their original was already present
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Entries that would actually change the executable
    pub fn patchable(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter().filter(|e| !e.is_noop())
    }

    /// A dictionary holding only the entries in `range`, used to bisect a
    /// translation that breaks the executable. Entries keep their positions
    /// in the full dictionary (see [`Dictionary::position`]).
    pub fn subset(&self, range: Range<usize>) -> Self {
        let start = range.start.min(self.entries.len());
        let end = range.end.clamp(start, self.entries.len());
        let pairs = self.entries[start..end]
            .iter()
            .map(|e| (e.original.clone(), e.translated.clone()));
        Self {
            first_index: self.first_index + start,
            ..Self::from_pairs(pairs, self.language())
        }
    }

    /// Position of the `i`-th entry in the full dictionary
    pub fn position(&self, i: usize) -> usize {
        self.first_index + i
    }
}
