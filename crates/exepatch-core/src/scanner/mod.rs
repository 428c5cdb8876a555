//! Executable scanner: finds string occurrences and the fields that refer to them.
//!
//! Occurrences are located by byte search in data sections; references come
//! from a linear sweep over code sections plus a pointer sweep over data
//! sections.

mod types;
mod xref;

use std::collections::{BTreeMap, HashSet, VecDeque};

use memchr::memmem;
use tracing::{debug, info};

use crate::cancel::{CancelToken, Step};
use crate::codepage::Codepage;
use crate::pe::{PeImage, Section, read_u32, read_u64};

pub use types::*;
use xref::{CodeWalker, DecodedInstruction, FieldKind, OperandField};

/// Cancellation is checked once per this many decoded instructions
const CANCEL_CHECK_INTERVAL: usize = 0x4000;

/// Shorter strings make length immediates indistinguishable from noise
const MIN_LENGTH_FOR_DETECTION: usize = 3;

const STRING_ALIGNMENT: usize = 4;

pub struct Scanner<'a> {
    data: &'a [u8],
    image: &'a PeImage,
    codepage: Codepage,
    options: ScanOptions,
}

#[derive(Debug)]
struct Candidate {
    entry: usize,
    occurrence: StringOccurrence,
}

enum Target {
    Start(usize),
    Interior {
        candidate: usize,
        delta: usize,
    },
    /// Terminator or padding of a candidate; `slot` is set when the byte can
    /// also be read as an empty string
    Tail {
        candidate: usize,
        delta: usize,
        slot: Option<usize>,
    },
    EmptySlot {
        offset: usize,
    },
    Unrelated,
}

/// Working state of one scan
struct ScanState<'s> {
    originals: Vec<&'s str>,
    candidates: Vec<Candidate>,
    /// Occurrence VA -> index into `candidates`
    by_va: BTreeMap<u64, usize>,
    /// First original that encodes to an empty string
    empty_entry: Option<usize>,
    /// Length fields already attributed to a string
    length_fields: HashSet<usize>,
    unclassified: Vec<UnclassifiedReference>,
}

struct PendingLength {
    candidate: usize,
    remaining: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(data: &'a [u8], image: &'a PeImage, codepage: Codepage) -> Self {
        Self {
            data,
            image,
            codepage,
            options: ScanOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    /// Locate every original and its references.
    ///
    /// Per-entry problems (missing strings, unencodable text, odd references)
    /// end up in the report; the scan itself only stops on cancellation.
    pub fn scan<S: AsRef<str>>(&self, originals: &[S], cancel: &CancelToken) -> Step<ScanReport> {
        let mut state = ScanState {
            originals: originals.iter().map(AsRef::as_ref).collect(),
            candidates: Vec::new(),
            by_va: BTreeMap::new(),
            empty_entry: None,
            length_fields: HashSet::new(),
            unclassified: Vec::new(),
        };
        let mut encoded = Vec::with_capacity(originals.len());
        let mut unmatched = Vec::new();

        for index in 0..state.originals.len() {
            let original = state.originals[index];
            if cancel.is_cancelled() {
                return Step::Cancelled;
            }

            let bytes = match self.codepage.encode(original) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("Skipping {:?}: {}", original, e);
                    unmatched.push(UnmatchedEntry {
                        index,
                        original: original.to_string(),
                        reason: UnmatchedReason::Unencodable {
                            codepage: self.codepage.name().to_string(),
                        },
                    });
                    encoded.push(None);
                    continue;
                }
            };

            if bytes.is_empty() {
                state.empty_entry.get_or_insert(index);
            } else {
                self.find_occurrences(&mut state, index, &bytes);
            }
            encoded.push(Some(bytes));
        }
        debug!(
            "Found {} candidate occurrences for {} originals",
            state.candidates.len(),
            originals.len()
        );

        for section in self.image.code_sections() {
            if self.scan_code_section(&mut state, section, cancel).is_cancelled() {
                return Step::Cancelled;
            }
        }

        if self.options.data_pointers {
            for section in self.image.data_sections() {
                if cancel.is_cancelled() {
                    return Step::Cancelled;
                }
                self.scan_data_pointers(&mut state, section);
            }
        }

        let report = finish(state, encoded, unmatched);
        info!(
            "Scan complete: {} entries matched ({} occurrences, {} references), {} unmatched",
            report.entries.len(),
            report.occurrence_count(),
            report.reference_count(),
            report.unmatched.len()
        );
        Step::Done(report)
    }

    fn find_occurrences(&self, state: &mut ScanState, entry: usize, needle: &[u8]) {
        for section in self.image.data_sections() {
            let range = section.raw_range();
            let bytes = &self.data[range.clone()];

            for pos in memmem::find_iter(bytes, needle) {
                if bytes.get(pos + needle.len()) != Some(&0) {
                    continue;
                }
                let offset = range.start + pos;
                let Some(va) = self.image.offset_to_va(offset) else {
                    continue;
                };
                if state.by_va.contains_key(&va) {
                    continue;
                }

                let standalone = pos == 0 || bytes[pos - 1] == 0;
                let occurrence = StringOccurrence {
                    offset,
                    va,
                    length: needle.len(),
                    span: span_at(bytes, pos, needle.len()),
                    standalone,
                    pinned: false,
                    references: Vec::new(),
                };
                state.by_va.insert(va, state.candidates.len());
                state.candidates.push(Candidate { entry, occurrence });
            }
        }
    }

    fn classify(&self, state: &ScanState, value: u64) -> Target {
        if let Some(&candidate) = state.by_va.get(&value) {
            return Target::Start(candidate);
        }

        let slot = self.empty_slot_at(state, value);
        if let Some((&start, &candidate)) = state.by_va.range(..value).next_back() {
            let delta = (value - start) as usize;
            let occurrence = &state.candidates[candidate].occurrence;
            if delta < occurrence.length {
                return Target::Interior { candidate, delta };
            }
            if delta < occurrence.span {
                return Target::Tail {
                    candidate,
                    delta,
                    slot,
                };
            }
        }

        match slot {
            Some(offset) => Target::EmptySlot { offset },
            None => Target::Unrelated,
        }
    }

    /// File offset of a NUL at `value` that can hold the empty original
    fn empty_slot_at(&self, state: &ScanState, value: u64) -> Option<usize> {
        state.empty_entry?;
        let section = self.image.data_section_for_va(value)?;
        let offset = self.image.va_to_offset(value)?;
        let at_start = offset == section.raw_offset as usize;
        (self.data[offset] == 0 && (at_start || self.data[offset - 1] == 0)).then_some(offset)
    }

    /// Record a reference into the middle of a string and pin every span it lands in
    fn record_inner(
        state: &mut ScanState,
        instr: &DecodedInstruction,
        field: &OperandField,
        candidate: usize,
        reason: UnclassifiedReason,
    ) {
        let original = state.originals[state.candidates[candidate].entry];
        state.unclassified.push(UnclassifiedReference {
            original: original.to_string(),
            address: instr.address,
            target: field.value,
            reason,
        });
        for c in &mut state.candidates {
            if c.occurrence.contains_inner_va(field.value) {
                c.occurrence.pinned = true;
            }
        }
    }

    /// Register an occurrence of the empty original at `offset`
    fn claim_empty_slot(&self, state: &mut ScanState, offset: usize, va: u64) -> Option<usize> {
        let entry = state.empty_entry?;
        let section = self.image.section_for_offset(offset)?;
        let range = section.raw_range();
        let pos = offset - range.start;

        let index = state.candidates.len();
        state.candidates.push(Candidate {
            entry,
            occurrence: StringOccurrence {
                offset,
                va,
                length: 0,
                span: span_at(&self.data[range], pos, 0),
                standalone: false,
                pinned: false,
                references: Vec::new(),
            },
        });
        state.by_va.insert(va, index);
        Some(index)
    }

    fn record_field(
        &self,
        state: &mut ScanState,
        instr: &DecodedInstruction,
        field: OperandField,
    ) -> Option<usize> {
        let candidate = match self.classify(state, field.value) {
            Target::Start(candidate) => candidate,
            Target::EmptySlot { offset }
            | Target::Tail {
                slot: Some(offset),
                ..
            } if instr.takes_address => self.claim_empty_slot(state, offset, field.value)?,
            Target::Interior { candidate, delta } => {
                let reason = UnclassifiedReason::Interior { delta };
                Self::record_inner(state, instr, &field, candidate, reason);
                return None;
            }
            Target::Tail {
                candidate, delta, ..
            } => {
                let reason = UnclassifiedReason::Terminator { delta };
                Self::record_inner(state, instr, &field, candidate, reason);
                return None;
            }
            Target::EmptySlot { .. } | Target::Unrelated => return None,
        };

        if field.width != 4 && field.width != 8 {
            let original = state.originals[state.candidates[candidate].entry];
            state.unclassified.push(UnclassifiedReference {
                original: original.to_string(),
                address: instr.address,
                target: field.value,
                reason: UnclassifiedReason::UnsupportedWidth { width: field.width },
            });
            return None;
        }

        let kind = match field.kind {
            FieldKind::RipDisplacement => ReferenceKind::RipRelative,
            FieldKind::Displacement | FieldKind::Immediate => ReferenceKind::Absolute,
        };
        state.candidates[candidate]
            .occurrence
            .references
            .push(StringReference {
                kind,
                address: instr.address,
                field_offset: field.field_offset,
                width: field.width,
                signed: field.signed,
                next_ip: instr.next_ip,
            });
        Some(candidate)
    }

    fn record_length(
        state: &mut ScanState,
        candidate: usize,
        instr_address: u64,
        instr_next_ip: u64,
        field: OperandField,
    ) -> bool {
        let occurrence = &state.candidates[candidate].occurrence;
        if occurrence.length < MIN_LENGTH_FOR_DETECTION
            || field.value != occurrence.length as u64
            || state.length_fields.contains(&field.field_offset)
        {
            return false;
        }

        state.length_fields.insert(field.field_offset);
        state.candidates[candidate]
            .occurrence
            .references
            .push(StringReference {
                kind: ReferenceKind::Length,
                address: instr_address,
                field_offset: field.field_offset,
                width: field.width,
                signed: field.signed,
                next_ip: instr_next_ip,
            });
        true
    }

    fn scan_code_section(
        &self,
        state: &mut ScanState,
        section: &Section,
        cancel: &CancelToken,
    ) -> Step<()> {
        let range = section.raw_range();
        let base_ip = self.image.image_base() + section.virtual_address as u64;
        let walker = CodeWalker::new(
            self.image.bitness(),
            &self.data[range.clone()],
            base_ip,
            range.start,
        );
        debug!(
            "Decoding {} ({:#x} bytes at {:#x})",
            section.name,
            range.len(),
            base_ip
        );

        let window = self.options.length_window;
        let mut recent: VecDeque<DecodedInstruction> = VecDeque::with_capacity(window + 1);
        let mut pending: Vec<PendingLength> = Vec::new();

        for (count, instr) in walker.enumerate() {
            if count % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
                return Step::Cancelled;
            }

            let hits: Vec<usize> = instr
                .fields()
                .filter_map(|field| self.record_field(state, &instr, field))
                .collect();

            if !self.options.detect_lengths {
                continue;
            }

            // Lengths loaded after an earlier reference
            if let Some(field) = instr.length_candidate() {
                for p in &pending {
                    if Self::record_length(state, p.candidate, instr.address, instr.next_ip, field) {
                        break;
                    }
                }
            }
            pending.retain_mut(|p| {
                p.remaining -= 1;
                p.remaining > 0
            });

            // Lengths loaded before this reference
            for &candidate in &hits {
                for prev in recent.iter().rev() {
                    if let Some(field) = prev.length_candidate()
                        && Self::record_length(state, candidate, prev.address, prev.next_ip, field)
                    {
                        break;
                    }
                }
                if window > 0 {
                    pending.push(PendingLength {
                        candidate,
                        remaining: window,
                    });
                }
            }

            if hits.is_empty() {
                recent.push_back(instr);
                if recent.len() > window {
                    recent.pop_front();
                }
            } else {
                recent.clear();
            }
        }

        Step::Done(())
    }

    fn scan_data_pointers(&self, state: &mut ScanState, section: &Section) {
        let width = self.image.pointer_width();
        let range = section.raw_range();
        let mut offset = range.start.div_ceil(width) * width;

        while offset + width <= range.end {
            let value = if width == 8 {
                read_u64(self.data, offset).ok()
            } else {
                read_u32(self.data, offset).ok().map(u64::from)
            };

            if let Some(&candidate) = value.and_then(|v| state.by_va.get(&v))
                && let Some(address) = self.image.offset_to_va(offset)
            {
                state.candidates[candidate]
                    .occurrence
                    .references
                    .push(StringReference {
                        kind: ReferenceKind::DataPointer,
                        address,
                        field_offset: offset,
                        width,
                        signed: false,
                        next_ip: address + width as u64,
                    });
            }
            offset += width;
        }
    }
}

/// String bytes, terminator, and zero padding up to the next 4-byte boundary
fn span_at(section_bytes: &[u8], pos: usize, length: usize) -> usize {
    let mut span = length + 1;
    while (pos + span) % STRING_ALIGNMENT != 0 && section_bytes.get(pos + span) == Some(&0) {
        span += 1;
    }
    span
}

fn finish(
    state: ScanState,
    encoded: Vec<Option<Vec<u8>>>,
    mut unmatched: Vec<UnmatchedEntry>,
) -> ScanReport {
    let mut grouped: BTreeMap<usize, Vec<StringOccurrence>> = BTreeMap::new();
    for Candidate { entry, occurrence } in state.candidates {
        if occurrence.standalone || occurrence.address_references().next().is_some() {
            grouped.entry(entry).or_default().push(occurrence);
        }
    }

    let mut entries = Vec::new();
    for (index, bytes) in encoded.into_iter().enumerate() {
        let Some(bytes) = bytes else {
            continue;
        };
        let original = state.originals[index].to_string();
        match grouped.remove(&index) {
            Some(mut occurrences) => {
                occurrences.sort_by_key(|o| o.offset);
                entries.push(ScannedEntry {
                    index,
                    original,
                    encoded: bytes,
                    occurrences,
                });
            }
            None => unmatched.push(UnmatchedEntry {
                index,
                original,
                reason: UnmatchedReason::NotFound,
            }),
        }
    }
    unmatched.sort_by_key(|u| u.index);

    ScanReport {
        entries,
        unmatched,
        unclassified: state.unclassified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::fixture::{ImageFixture, RDATA_RAW, layout_strings};

    fn cp437() -> Codepage {
        Codepage::lookup("cp437").unwrap()
    }

    fn push32(va: u64) -> Vec<u8> {
        let mut code = vec![0x68];
        code.extend_from_slice(&(va as u32).to_le_bytes());
        code
    }

    fn scan(data: &[u8], originals: &[&str]) -> ScanReport {
        let image = PeImage::parse(data).unwrap();
        Scanner::new(data, &image, cp437())
            .scan(originals, &CancelToken::new())
            .done()
            .unwrap()
    }

    #[test]
    fn test_finds_referenced_string() {
        let fx = ImageFixture::new(32);
        let mut rdata = Vec::new();
        let offsets = layout_strings(&mut rdata, 0x10, &[b"Hello", b"World"]);
        let hello_va = fx.rdata_va(offsets[0]);
        let fx = fx.code(&push32(hello_va)).rdata(&rdata);
        let data = fx.build();

        let report = scan(&data, &["Hello"]);
        assert_eq!(report.entries.len(), 1);
        let occ = &report.entries[0].occurrences[0];
        assert_eq!(occ.offset, RDATA_RAW + 0x10);
        assert_eq!(occ.length, 5);
        assert!(occ.standalone);

        assert_eq!(occ.references.len(), 1);
        let r = occ.references[0];
        assert_eq!(r.kind, ReferenceKind::Absolute);
        assert_eq!(r.field_offset, 0x401);
        assert_eq!(r.width, 4);
        assert_eq!(r.address, fx.text_va(0));
    }

    #[test]
    fn test_span_includes_alignment_padding() {
        let mut rdata = Vec::new();
        layout_strings(&mut rdata, 0x10, &[b"Hello", b"World"]);
        let data = ImageFixture::new(32).rdata(&rdata).build();
        let report = scan(&data, &["Hello"]);
        assert_eq!(report.entries[0].occurrences[0].span, 8);

        let packed = b"\0\0\0\0Hello\0World\0";
        let data = ImageFixture::new(32).rdata(packed).build();
        let report = scan(&data, &["Hello", "World"]);
        assert_eq!(report.entries[0].occurrences[0].span, 6);
        assert_eq!(report.entries[1].occurrences[0].span, 6);
    }

    #[test]
    fn test_unmatched_entries_reported() {
        let mut rdata = Vec::new();
        layout_strings(&mut rdata, 0, &[b"Hello"]);
        let data = ImageFixture::new(32).rdata(&rdata).build();

        let report = scan(&data, &["Missing", "Hello", "Привет"]);
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].index, 1);
        assert_eq!(report.unmatched.len(), 2);
        assert_eq!(report.unmatched[0].reason, UnmatchedReason::NotFound);
        assert!(matches!(
            report.unmatched[1].reason,
            UnmatchedReason::Unencodable { .. }
        ));
    }

    #[test]
    fn test_substring_matched_at_own_address() {
        let fx = ImageFixture::new(32);
        let mut rdata = Vec::new();
        let offsets = layout_strings(&mut rdata, 0x20, &[b"Hello"]);
        let lo_va = fx.rdata_va(offsets[0] + 3);
        let data = fx.code(&push32(lo_va)).rdata(&rdata).build();

        let report = scan(&data, &["Hello", "lo"]);
        assert_eq!(report.entries.len(), 2);
        let hello = &report.entries[0].occurrences[0];
        let lo = &report.entries[1].occurrences[0];
        assert_eq!(lo.offset, hello.offset + 3);
        assert!(!lo.standalone);
        assert_eq!(lo.references.len(), 1);
        assert!(hello.references.is_empty());
    }

    #[test]
    fn test_unreferenced_substring_dropped() {
        let mut rdata = Vec::new();
        layout_strings(&mut rdata, 0x20, &[b"Hello"]);
        let data = ImageFixture::new(32).rdata(&rdata).build();
        let report = scan(&data, &["lo"]);
        assert!(report.entries.is_empty());
        assert_eq!(report.unmatched[0].reason, UnmatchedReason::NotFound);
    }

    #[test]
    fn test_multiple_occurrences_independent() {
        let fx = ImageFixture::new(32);
        let mut rdata = Vec::new();
        let offsets = layout_strings(&mut rdata, 0, &[b"Quit", b"Other", b"Quit"]);
        let mut code = push32(fx.rdata_va(offsets[0]));
        code.extend(push32(fx.rdata_va(offsets[2])));
        code.extend(push32(fx.rdata_va(offsets[2])));
        let data = fx.code(&code).rdata(&rdata).build();

        let report = scan(&data, &["Quit"]);
        let occs = &report.entries[0].occurrences;
        assert_eq!(occs.len(), 2);
        assert_eq!(occs[0].references.len(), 1);
        assert_eq!(occs[1].references.len(), 2);
    }

    #[test]
    fn test_interior_reference_unclassified() {
        let fx = ImageFixture::new(32);
        let mut rdata = Vec::new();
        let offsets = layout_strings(&mut rdata, 0, &[b"Hello"]);
        let inside = fx.rdata_va(offsets[0] + 2);
        let data = fx.code(&push32(inside)).rdata(&rdata).build();

        let report = scan(&data, &["Hello"]);
        assert_eq!(report.unclassified.len(), 1);
        assert_eq!(
            report.unclassified[0].reason,
            UnclassifiedReason::Interior { delta: 2 }
        );
        assert_eq!(report.unclassified[0].original, "Hello");
        assert!(report.entries[0].occurrences[0].pinned);
    }

    #[test]
    fn test_terminator_reference_pins_span() {
        let fx = ImageFixture::new(32);
        let rdata = b"\0\0\0\0Hello\0\0\0World\0";
        let mut code = push32(fx.rdata_va(4));
        code.extend(push32(fx.rdata_va(9)));
        let data = fx.clone().code(&code).rdata(rdata).build();

        let report = scan(&data, &["Hello"]);
        let occurrence = &report.entries[0].occurrences[0];
        assert_eq!(occurrence.span, 8);
        assert_eq!(occurrence.references.len(), 1);
        assert!(occurrence.pinned);
        assert_eq!(report.unclassified.len(), 1);
        assert_eq!(
            report.unclassified[0].reason,
            UnclassifiedReason::Terminator { delta: 5 }
        );
        assert_eq!(report.unclassified[0].target, fx.rdata_va(9));
    }

    #[test]
    fn test_padding_reference_claimed_by_empty_original() {
        let fx = ImageFixture::new(32);
        let rdata = b"\0\0\0\0Hello\0\0\0World\0";
        let mut code = push32(fx.rdata_va(4));
        code.extend(push32(fx.rdata_va(10)));
        let data = fx.clone().code(&code).rdata(rdata).build();

        let report = scan(&data, &["Hello", ""]);
        assert!(report.unclassified.is_empty());
        assert_eq!(report.entries.len(), 2);
        assert!(!report.entries[0].occurrences[0].pinned);
        assert_eq!(report.entries[1].occurrences[0].offset, RDATA_RAW + 10);
    }

    #[test]
    fn test_rip_relative_reference() {
        let fx = ImageFixture::new(64);
        let mut rdata = Vec::new();
        let offsets = layout_strings(&mut rdata, 0x40, &[b"Hello"]);
        let target = fx.rdata_va(offsets[0]);
        let next_ip = fx.text_va(7);
        let disp = (target as i64 - next_ip as i64) as i32;
        let mut code = vec![0x48, 0x8D, 0x0D];
        code.extend_from_slice(&disp.to_le_bytes());
        let data = fx.code(&code).rdata(&rdata).build();

        let report = scan(&data, &["Hello"]);
        let r = report.entries[0].occurrences[0].references[0];
        assert_eq!(r.kind, ReferenceKind::RipRelative);
        assert_eq!(r.field_offset, 0x403);
        assert_eq!(r.next_ip, next_ip);
    }

    #[test]
    fn test_data_pointer_reference() {
        let fx = ImageFixture::new(32);
        let mut rdata = Vec::new();
        let offsets = layout_strings(&mut rdata, 0x20, &[b"Hello"]);
        rdata[0..4].copy_from_slice(&(fx.rdata_va(offsets[0]) as u32).to_le_bytes());
        let data = fx.rdata(&rdata).build();

        let report = scan(&data, &["Hello"]);
        let r = report.entries[0].occurrences[0].references[0];
        assert_eq!(r.kind, ReferenceKind::DataPointer);
        assert_eq!(r.field_offset, RDATA_RAW);
    }

    #[test]
    fn test_length_immediate_detected() {
        let fx = ImageFixture::new(32);
        let mut rdata = Vec::new();
        let offsets = layout_strings(&mut rdata, 0, &[b"Hello"]);
        // push 5 ; push str ; push 1
        let mut code = vec![0x6A, 0x05];
        code.extend(push32(fx.rdata_va(offsets[0])));
        code.extend([0x6A, 0x01]);
        let data = fx.code(&code).rdata(&rdata).build();

        let report = scan(&data, &["Hello"]);
        let occ = &report.entries[0].occurrences[0];
        let lengths: Vec<_> = occ.length_references().collect();
        assert_eq!(lengths.len(), 1);
        assert_eq!(lengths[0].field_offset, 0x401);
        assert_eq!(lengths[0].width, 1);

        let image = PeImage::parse(&data).unwrap();
        let options = ScanOptions {
            detect_lengths: false,
            ..Default::default()
        };
        let report = Scanner::new(&data, &image, cp437())
            .with_options(options)
            .scan(&["Hello"], &CancelToken::new())
            .done()
            .unwrap();
        assert_eq!(report.entries[0].occurrences[0].length_references().count(), 0);
    }

    #[test]
    fn test_empty_original_matches_referenced_nul() {
        let fx = ImageFixture::new(32);
        let slot = fx.rdata_va(0x80);
        let data = fx.code(&push32(slot)).build();

        let report = scan(&data, &[""]);
        assert_eq!(report.entries.len(), 1);
        let occ = &report.entries[0].occurrences[0];
        assert_eq!(occ.offset, RDATA_RAW + 0x80);
        assert_eq!(occ.length, 0);
        assert_eq!(occ.span, 4);
    }

    #[test]
    fn test_cancelled_scan() {
        let data = ImageFixture::new(32).build();
        let image = PeImage::parse(&data).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let step = Scanner::new(&data, &image, cp437()).scan(&["Hello"], &cancel);
        assert!(step.is_cancelled());
    }
}
