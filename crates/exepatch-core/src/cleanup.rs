//! Translation text cleanup applied before strings are encoded.
//!
//! Two passes run on every `msgstr`:
//!
//! 1. [`SymbolTable::apply`] replaces typographic symbols that single-byte
//!    codepages rarely carry (curly quotes, dashes, ellipsis, NBSP).
//! 2. [`fix_spaces`] makes the translation's leading and trailing spaces match
//!    the original, unless the original is listed in [`ExclusionRules`].

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Character substitution table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolTable {
    map: BTreeMap<char, String>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        let pairs: &[(char, &str)] = &[
            ('\u{00a0}', " "),
            ('\u{2002}', " "),
            ('\u{2003}', " "),
            ('\u{2009}', " "),
            ('\u{200b}', ""),
            ('\u{feff}', ""),
            ('\u{2010}', "-"),
            ('\u{2011}', "-"),
            ('\u{2012}', "-"),
            ('\u{2013}', "-"),
            ('\u{2014}', "-"),
            ('\u{2212}', "-"),
            ('\u{2018}', "'"),
            ('\u{2019}', "'"),
            ('\u{201a}', ","),
            ('\u{201c}', "\""),
            ('\u{201d}', "\""),
            ('\u{201e}', "\""),
            ('\u{2026}', "..."),
        ];
        Self::from_pairs(pairs.iter().map(|(c, s)| (*c, s.to_string())))
    }
}

impl SymbolTable {
    /// A table that leaves text untouched
    pub fn empty() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub fn from_pairs<I: IntoIterator<Item = (char, String)>>(pairs: I) -> Self {
        Self {
            map: pairs.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, symbol: char, replacement: impl Into<String>) {
        self.map.insert(symbol, replacement.into());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn apply(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match self.map.get(&c) {
                Some(replacement) => out.push_str(replacement),
                None => out.push(c),
            }
        }
        out
    }
}

/// Per-language prefixes of original strings whose spaces must not be fixed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionRules {
    by_language: BTreeMap<String, BTreeSet<String>>,
    /// Used when the active language has no entry of its own
    default: BTreeSet<String>,
}

impl ExclusionRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Build rules from a language → prefixes map, dropping empty prefixes
    pub fn from_map(map: BTreeMap<String, Vec<String>>) -> Self {
        let by_language = map
            .into_iter()
            .map(|(language, prefixes)| {
                let set = prefixes.into_iter().filter(|p| !p.is_empty()).collect();
                (language, set)
            })
            .collect();
        Self {
            by_language,
            default: BTreeSet::new(),
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.by_language
            .iter()
            .map(|(language, prefixes)| (language.clone(), prefixes.iter().cloned().collect()))
            .collect()
    }

    pub fn add(&mut self, language: &str, prefix: &str) -> bool {
        if prefix.is_empty() {
            return false;
        }
        self.by_language
            .entry(language.to_string())
            .or_default()
            .insert(prefix.to_string())
    }

    pub fn remove(&mut self, language: &str, prefix: &str) -> bool {
        let Some(set) = self.by_language.get_mut(language) else {
            return false;
        };
        let removed = set.remove(prefix);
        if set.is_empty() {
            self.by_language.remove(language);
        }
        removed
    }

    /// Prefixes in effect for `language`
    pub fn for_language(&self, language: Option<&str>) -> &BTreeSet<String> {
        language
            .and_then(|lang| self.by_language.get(lang))
            .unwrap_or(&self.default)
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.by_language.keys().map(String::as_str)
    }

    pub fn is_excluded(&self, language: Option<&str>, original: &str) -> bool {
        self.for_language(language)
            .iter()
            .any(|prefix| original.starts_with(prefix.as_str()))
    }
}

/// Cleanup settings for one dictionary load
#[derive(Debug, Clone)]
pub struct CleanupPolicy {
    pub symbols: SymbolTable,
    /// Add necessary leading/trailing spaces
    pub fix_spaces: bool,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            symbols: SymbolTable::default(),
            fix_spaces: true,
        }
    }
}

/// Make the translation's leading and trailing space runs equal to the original's.
///
/// Empty translations stay empty, and whitespace-only originals leave the
/// translation untouched.
pub fn fix_spaces(original: &str, translation: &str) -> String {
    if translation.is_empty() || original.trim_matches(' ').is_empty() {
        return translation.to_string();
    }

    let leading = original.len() - original.trim_start_matches(' ').len();
    let trailing = original.len() - original.trim_end_matches(' ').len();
    let core = translation.trim_matches(' ');

    let mut out = String::with_capacity(core.len() + leading + trailing);
    out.extend(std::iter::repeat_n(' ', leading));
    out.push_str(core);
    out.extend(std::iter::repeat_n(' ', trailing));
    out
}
