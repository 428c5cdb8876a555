//! Minimal gettext PO reader.
//!
//! Yields `(msgid, msgstr)` records in file order plus the header metadata.
//! Context (`msgctxt`) is parsed but not part of the key, plural entries keep
//! `msgstr[0]`, and obsolete `#~` entries are skipped.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::dictionary::TranslationRecord;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct PoFile {
    meta: BTreeMap<String, String>,
    records: Vec<TranslationRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Context,
    Id,
    IdPlural,
    Str,
    /// `msgstr[n]` with n > 0
    Ignored,
}

#[derive(Debug, Default)]
struct PendingEntry {
    context: Option<String>,
    msgid: Option<String>,
    msgstr: Option<String>,
}

impl PendingEntry {
    fn has_translation(&self) -> bool {
        self.msgstr.is_some()
    }
}

impl PoFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut file = PoFile::default();
        let mut pending = PendingEntry::default();
        let mut field: Option<Field> = None;

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw_line.trim();

            if line.is_empty() {
                file.flush(&mut pending)?;
                field = None;
                continue;
            }

            if line.starts_with("#~") {
                field = None;
                continue;
            }

            if line.starts_with('#') {
                if pending.has_translation() {
                    file.flush(&mut pending)?;
                }
                field = None;
                continue;
            }

            if line.starts_with('"') {
                let Some(current) = field else {
                    return Err(syntax(line_no, "continuation string without a keyword"));
                };
                let value = unquote(line, line_no)?;
                pending.append(current, &value);
                continue;
            }

            let (keyword, rest) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| syntax(line_no, "expected keyword followed by a string"))?;
            let value = unquote(rest.trim(), line_no)?;

            let next = match keyword {
                "msgctxt" => Field::Context,
                "msgid" => Field::Id,
                "msgid_plural" => Field::IdPlural,
                "msgstr" | "msgstr[0]" => Field::Str,
                k if k.starts_with("msgstr[") => Field::Ignored,
                other => return Err(syntax(line_no, &format!("unknown keyword '{}'", other))),
            };

            if matches!(next, Field::Context | Field::Id) && pending.has_translation() {
                file.flush(&mut pending)?;
            }

            pending.start(next, value);
            field = Some(next);
        }

        file.flush(&mut pending)?;
        Ok(file)
    }

    fn flush(&mut self, pending: &mut PendingEntry) -> Result<()> {
        let entry = std::mem::take(pending);
        let Some(msgid) = entry.msgid else {
            return Ok(());
        };
        let msgstr = entry.msgstr.unwrap_or_default();

        if msgid.is_empty() && entry.context.is_none() {
            self.meta = parse_header(&msgstr);
        } else {
            self.records.push(TranslationRecord { msgid, msgstr });
        }
        Ok(())
    }

    pub fn meta(&self) -> &BTreeMap<String, String> {
        &self.meta
    }

    /// Value of the `Language:` header, if present and non-empty
    pub fn language(&self) -> Option<&str> {
        self.meta
            .get("Language")
            .map(String::as_str)
            .filter(|lang| !lang.is_empty())
    }

    pub fn records(&self) -> &[TranslationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<TranslationRecord> {
        self.records
    }
}

impl PendingEntry {
    fn start(&mut self, field: Field, value: String) {
        match field {
            Field::Context => self.context = Some(value),
            Field::Id => self.msgid = Some(value),
            Field::Str => self.msgstr = Some(value),
            Field::IdPlural | Field::Ignored => {}
        }
    }

    fn append(&mut self, field: Field, value: &str) {
        let target = match field {
            Field::Context => self.context.as_mut(),
            Field::Id => self.msgid.as_mut(),
            Field::Str => self.msgstr.as_mut(),
            Field::IdPlural | Field::Ignored => None,
        };
        if let Some(target) = target {
            target.push_str(value);
        }
    }
}

fn parse_header(msgstr: &str) -> BTreeMap<String, String> {
    msgstr
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

fn unquote(s: &str, line_no: usize) -> Result<String> {
    let inner = s
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| s.len() >= 2)
        .ok_or_else(|| syntax(line_no, "string must be enclosed in double quotes"))?;

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return Err(syntax(line_no, "dangling escape at end of string")),
        }
    }
    Ok(out)
}

fn syntax(line: usize, message: &str) -> Error {
    Error::PoSyntax {
        line,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# Translation of hardcoded strings
msgid ""
msgstr ""
"Project-Id-Version: test\n"
"Language: ru\n"
"Content-Type: text/plain; charset=UTF-8\n"

#: 0x1234
msgid "Hello"
msgstr "Привет"

#, fuzzy
msgctxt "menu"
msgid "Quit"
msgstr ""
"Вый"
"ти"

msgid "Line\nbreak \"quoted\""
msgstr "Строка\nперенос"

#~ msgid "Old"
#~ msgstr "Старое"

msgid "%d dwarf"
msgid_plural "%d dwarves"
msgstr[0] "%d дварф"
msgstr[1] "%d дварфа"
"#;

    #[test]
    fn test_parse_records_and_meta() {
        let po = PoFile::parse(SAMPLE).unwrap();
        assert_eq!(po.language(), Some("ru"));
        assert_eq!(po.meta().get("Project-Id-Version").map(String::as_str), Some("test"));

        let records = po.records();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0], TranslationRecord::new("Hello", "Привет"));
        assert_eq!(records[1], TranslationRecord::new("Quit", "Выйти"));
        assert_eq!(records[2].msgid, "Line\nbreak \"quoted\"");
        assert_eq!(records[2].msgstr, "Строка\nперенос");
        assert_eq!(records[3], TranslationRecord::new("%d dwarf", "%d дварф"));
    }

    #[test]
    fn test_entries_without_blank_lines() {
        let text = "msgid \"a\"\nmsgstr \"1\"\nmsgid \"b\"\nmsgstr \"2\"\n";
        let po = PoFile::parse(text).unwrap();
        assert_eq!(po.records().len(), 2);
        assert_eq!(po.language(), None);
    }

    #[test]
    fn test_syntax_errors() {
        let err = PoFile::parse("msgid \"a\"\nbogus \"x\"\n").unwrap_err();
        assert!(matches!(err, Error::PoSyntax { line: 2, .. }));

        let err = PoFile::parse("\"orphan\"\n").unwrap_err();
        assert!(matches!(err, Error::PoSyntax { line: 1, .. }));

        let err = PoFile::parse("msgid \"unterminated\n").unwrap_err();
        assert!(matches!(err, Error::PoSyntax { line: 1, .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hardcoded_ru.po");
        fs::write(&path, SAMPLE).unwrap();
        let po = PoFile::load(&path).unwrap();
        assert_eq!(po.records().len(), 4);
    }
}
