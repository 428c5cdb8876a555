use std::fmt;

use strum::Display;

/// How an operand or pointer field refers to a string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceKind {
    /// Absolute address in an immediate or displacement (`push str`, `mov eax, str`)
    Absolute,
    /// `[rip + disp32]` addressing on x86-64
    RipRelative,
    /// Pointer stored in a data section (string tables)
    DataPointer,
    /// Immediate carrying the string's byte length next to a code reference
    Length,
}

/// One field in the image that points at, or delimits, a string occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringReference {
    pub kind: ReferenceKind,
    /// VA of the referencing instruction or pointer slot
    pub address: u64,
    /// File offset of the field to rewrite
    pub field_offset: usize,
    /// Field width in bytes
    pub width: usize,
    /// Field is sign-extended by the CPU when used
    pub signed: bool,
    /// VA of the next instruction; base for RIP-relative fields
    pub next_ip: u64,
}

/// One byte-exact copy of an encoded original inside a data section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringOccurrence {
    pub offset: usize,
    pub va: u64,
    /// Encoded length without the NUL terminator
    pub length: usize,
    /// Bytes available for an in-place replacement, NUL included
    pub span: usize,
    pub standalone: bool,
    /// Some reference reads bytes inside the span other than the start
    pub pinned: bool,
    pub references: Vec<StringReference>,
}

impl StringOccurrence {
    pub fn span_range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.span
    }

    /// `va` falls inside the span past the first byte
    pub fn contains_inner_va(&self, va: u64) -> bool {
        va > self.va && va < self.va + self.span as u64
    }

    /// References that carry the string's address
    pub fn address_references(&self) -> impl Iterator<Item = &StringReference> {
        self.references
            .iter()
            .filter(|r| r.kind != ReferenceKind::Length)
    }

    pub fn length_references(&self) -> impl Iterator<Item = &StringReference> {
        self.references
            .iter()
            .filter(|r| r.kind == ReferenceKind::Length)
    }
}

/// Every kept occurrence of one original string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
    /// Position in the list of originals handed to the scanner
    pub index: usize,
    pub original: String,
    pub encoded: Vec<u8>,
    pub occurrences: Vec<StringOccurrence>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmatchedReason {
    NotFound,
    Unencodable { codepage: String },
}

impl fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnmatchedReason::NotFound => write!(f, "not found in any data section"),
            UnmatchedReason::Unencodable { codepage } => {
                write!(f, "cannot be encoded in {}", codepage)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmatchedEntry {
    pub index: usize,
    pub original: String,
    pub reason: UnmatchedReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnclassifiedReason {
    Interior { delta: usize },
    /// Lands on the terminator or the padding after it
    Terminator { delta: usize },
    UnsupportedWidth { width: usize },
}

impl fmt::Display for UnclassifiedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnclassifiedReason::Interior { delta } => {
                write!(f, "points {} bytes into the string", delta)
            }
            UnclassifiedReason::Terminator { delta } => {
                write!(f, "points {} bytes past the start, at the terminator or padding", delta)
            }
            UnclassifiedReason::UnsupportedWidth { width } => {
                write!(f, "{}-byte field cannot hold an address", width)
            }
        }
    }
}

/// A reference that was seen but excluded from planning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnclassifiedReference {
    pub original: String,
    /// VA of the referencing instruction
    pub address: u64,
    pub target: u64,
    pub reason: UnclassifiedReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub entries: Vec<ScannedEntry>,
    pub unmatched: Vec<UnmatchedEntry>,
    pub unclassified: Vec<UnclassifiedReference>,
}

impl ScanReport {
    pub fn occurrence_count(&self) -> usize {
        self.entries.iter().map(|e| e.occurrences.len()).sum()
    }

    pub fn reference_count(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|e| &e.occurrences)
            .map(|o| o.references.len())
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// Look for string-length immediates around code references
    pub detect_lengths: bool,
    /// Instructions before and after a reference searched for a length
    pub length_window: usize,
    /// Treat aligned pointers in data sections as references
    pub data_pointers: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            detect_lengths: true,
            length_window: 2,
            data_pointers: true,
        }
    }
}
