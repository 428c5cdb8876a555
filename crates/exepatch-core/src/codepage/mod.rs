//! Single-byte codepages the patcher can write into an executable.
//!
//! Windows and KOI8 pages are backed by `encoding_rs`; the two DOS pages it
//! lacks (437 and 850) use the tables in [`tables`].

mod filter;
mod tables;

use std::fmt;

use encoding_rs::Encoding;

use crate::error::{Error, Result};

pub use filter::{filter_codepages, is_feasible};

#[derive(Clone, Copy)]
enum Backend {
    Table(&'static str),
    /// WHATWG label understood by `Encoding::for_label`
    Whatwg(&'static str),
}

/// A single-byte text encoding identified by its short name (e.g. `cp1251`)
#[derive(Clone, Copy)]
pub struct Codepage {
    name: &'static str,
    backend: Backend,
}

const SUPPORTED: &[Codepage] = &[
    Codepage::table("cp437", tables::CP437_HIGH),
    Codepage::table("cp850", tables::CP850_HIGH),
    Codepage::whatwg("cp866", "ibm866"),
    Codepage::whatwg("cp874", "windows-874"),
    Codepage::whatwg("cp1250", "windows-1250"),
    Codepage::whatwg("cp1251", "windows-1251"),
    Codepage::whatwg("cp1252", "windows-1252"),
    Codepage::whatwg("cp1253", "windows-1253"),
    Codepage::whatwg("cp1254", "windows-1254"),
    Codepage::whatwg("cp1255", "windows-1255"),
    Codepage::whatwg("cp1256", "windows-1256"),
    Codepage::whatwg("cp1257", "windows-1257"),
    Codepage::whatwg("cp1258", "windows-1258"),
    Codepage::whatwg("koi8r", "koi8-r"),
    Codepage::whatwg("koi8u", "koi8-u"),
];

/// Fallback when nothing else is known about the translation
pub const DEFAULT_CODEPAGE: &str = "cp437";

impl Codepage {
    const fn table(name: &'static str, high: &'static str) -> Self {
        Self {
            name,
            backend: Backend::Table(high),
        }
    }

    const fn whatwg(name: &'static str, label: &'static str) -> Self {
        Self {
            name,
            backend: Backend::Whatwg(label),
        }
    }

    /// Look up a codepage by name.
    ///
    /// Accepts `cp1251`, `CP1251`, `windows-1251`, `ibm866`, `koi8-r` and the like.
    pub fn lookup(name: &str) -> Result<Self> {
        let normalized = normalize_name(name);
        SUPPORTED
            .iter()
            .find(|cp| cp.name == normalized)
            .copied()
            .ok_or_else(|| Error::UnknownCodepage(name.to_string()))
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Encode `text`, failing on the first character the codepage cannot represent
    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let unencodable = || Error::Unencodable {
            codepage: self.name.to_string(),
            text: text.to_string(),
        };

        match self.backend {
            Backend::Table(high) => text
                .chars()
                .map(|c| {
                    if c.is_ascii() {
                        Some(c as u8)
                    } else {
                        high.chars().position(|h| h == c).map(|i| 0x80 + i as u8)
                    }
                })
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(unencodable),
            Backend::Whatwg(label) => {
                let (bytes, _, had_errors) = whatwg_encoding(label).encode(text);
                if had_errors {
                    Err(unencodable())
                } else {
                    Ok(bytes.into_owned())
                }
            }
        }
    }

    /// Decode bytes; unmappable bytes become U+FFFD
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self.backend {
            Backend::Table(high) => bytes
                .iter()
                .map(|&b| {
                    if b < 0x80 {
                        b as char
                    } else {
                        high.chars().nth((b - 0x80) as usize).unwrap_or('\u{fffd}')
                    }
                })
                .collect(),
            Backend::Whatwg(label) => {
                let (decoded, _) = whatwg_encoding(label).decode_without_bom_handling(bytes);
                decoded.into_owned()
            }
        }
    }
}

impl PartialEq for Codepage {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Codepage {}

impl fmt::Debug for Codepage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Codepage").field(&self.name).finish()
    }
}

impl fmt::Display for Codepage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Every codepage the patcher knows, in registry order
pub fn supported_codepages() -> &'static [Codepage] {
    SUPPORTED
}

/// Sort codepages by the number in their name (`cp437` < `cp866` < `cp1251`)
pub fn sort_codepages(codepages: &mut [Codepage]) {
    codepages.sort_by_key(|cp| (numeric_key(cp.name), cp.name));
}

fn whatwg_encoding(label: &str) -> &'static Encoding {
    // Labels in SUPPORTED are all known to encoding_rs
    Encoding::for_label(label.as_bytes()).unwrap_or(encoding_rs::WINDOWS_1252)
}

fn numeric_key(name: &str) -> u32 {
    let digits: String = name.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(u32::MAX)
}

fn normalize_name(name: &str) -> String {
    let compact: String = name
        .trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect();

    if let Some(rest) = compact.strip_prefix("windows") {
        format!("cp{}", rest)
    } else if let Some(rest) = compact.strip_prefix("ibm") {
        format!("cp{}", rest)
    } else {
        compact
    }
}
