//! Patch planner: decides, per occurrence, between rewriting the string in
//! place and relocating it into a new section.
//!
//! Every entry is planned atomically: if any occurrence or reference of an
//! entry cannot be handled, none of that entry's operations make it into the
//! plan and the entry is reported as failed.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, warn};

use crate::cancel::{CancelToken, Step};
use crate::codepage::Codepage;
use crate::pe::{NewSectionSlot, PeImage, align_up};
use crate::scanner::{ReferenceKind, ScanReport, ScannedEntry, StringOccurrence, StringReference};

/// Alignment of each string appended to the relocation region
pub const RELOCATION_ALIGNMENT: usize = 4;

/// New bytes for one reference field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub kind: ReferenceKind,
    /// VA of the referencing instruction or pointer slot
    pub address: u64,
    pub field_offset: usize,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOperation {
    /// Overwrite the string where it is, zero-filling the rest of its span
    InPlace {
        address: u64,
        offset: usize,
        new_bytes: Vec<u8>,
        length_updates: Vec<FieldUpdate>,
    },
    /// Point every reference at a fresh copy in the relocation region
    Relocate {
        old_address: u64,
        new_address: u64,
        /// Offset of the new copy inside the relocation region
        region_offset: usize,
        new_bytes: Vec<u8>,
        updated_references: Vec<FieldUpdate>,
    },
}

impl PatchOperation {
    /// Field rewrites carried by this operation
    pub fn field_updates(&self) -> &[FieldUpdate] {
        match self {
            PatchOperation::InPlace { length_updates, .. } => length_updates,
            PatchOperation::Relocate {
                updated_references, ..
            } => updated_references,
        }
    }

    pub fn is_relocation(&self) -> bool {
        matches!(self, PatchOperation::Relocate { .. })
    }
}

/// Data for the section appended to hold relocated strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationRegion {
    pub slot: NewSectionSlot,
    pub data: Vec<u8>,
}

/// Ordered operations plus the region they append, computed before any write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub operations: Vec<PatchOperation>,
    pub region: Option<RelocationRegion>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn in_place_count(&self) -> usize {
        self.operations.iter().filter(|op| !op.is_relocation()).count()
    }

    pub fn relocation_count(&self) -> usize {
        self.operations.iter().filter(|op| op.is_relocation()).count()
    }

    /// Bytes of relocated string data
    pub fn appended_len(&self) -> usize {
        self.region.as_ref().map_or(0, |r| r.data.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Unencodable {
        codepage: String,
    },
    NoReferences {
        address: u64,
    },
    AddressOutOfRange {
        kind: ReferenceKind,
        reference: u64,
        target: u64,
    },
    LengthOverflow {
        reference: u64,
        length: usize,
    },
    NoRelocationSpace {
        reason: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unencodable { codepage } => {
                write!(f, "translation cannot be encoded in {}", codepage)
            }
            FailureReason::NoReferences { address } => write!(
                f,
                "string at 0x{:X} cannot be rewritten in place and has no relocatable references",
                address
            ),
            FailureReason::AddressOutOfRange {
                kind,
                reference,
                target,
            } => write!(
                f,
                "{} reference at 0x{:X} cannot reach 0x{:X}",
                kind, reference, target
            ),
            FailureReason::LengthOverflow { reference, length } => {
                write!(f, "length field at 0x{:X} cannot hold {}", reference, length)
            }
            FailureReason::NoRelocationSpace { reason } => {
                write!(f, "no room for relocated strings: {}", reason)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedEntry {
    pub index: usize,
    pub original: String,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub failed: Vec<FailedEntry>,
    /// Entries with at least one operation in the plan
    pub patched_entries: usize,
}

pub struct Planner<'a> {
    data: &'a [u8],
    image: &'a PeImage,
    codepage: Codepage,
}

/// Relocation region under construction
struct RegionBuilder {
    slot: Option<Result<NewSectionSlot, String>>,
    data: Vec<u8>,
}

impl<'a> Planner<'a> {
    pub fn new(data: &'a [u8], image: &'a PeImage, codepage: Codepage) -> Self {
        Self {
            data,
            image,
            codepage,
        }
    }

    /// Build a plan from a scan report.
    ///
    /// `translations` runs parallel to the originals that were scanned:
    /// `translations[entry.index]` is the text for `scan.entries[..].index`.
    pub fn plan<S: AsRef<str>>(
        &self,
        scan: &ScanReport,
        translations: &[S],
        cancel: &CancelToken,
    ) -> Step<PlanOutcome> {
        let shared = shared_spans(scan);
        let mut region = RegionBuilder {
            slot: None,
            data: Vec::new(),
        };
        let mut outcome = PlanOutcome::default();

        for entry in &scan.entries {
            if cancel.is_cancelled() {
                return Step::Cancelled;
            }

            let Some(translated) = translations.get(entry.index) else {
                continue;
            };
            let translated: &str = translated.as_ref();
            if translated.is_empty() {
                continue;
            }

            match self.plan_entry(entry, translated, &shared, &mut region) {
                Ok(ops) => {
                    if !ops.is_empty() {
                        outcome.patched_entries += 1;
                    }
                    outcome.plan.operations.extend(ops);
                }
                Err(reason) => {
                    warn!("Cannot patch {:?}: {}", entry.original, reason);
                    outcome.failed.push(FailedEntry {
                        index: entry.index,
                        original: entry.original.clone(),
                        reason,
                    });
                }
            }
        }

        if let Some(Ok(slot)) = region.slot
            && !region.data.is_empty()
        {
            outcome.plan.region = Some(RelocationRegion {
                slot,
                data: region.data,
            });
        }

        debug!(
            "Planned {} in-place and {} relocated strings, {} bytes appended",
            outcome.plan.in_place_count(),
            outcome.plan.relocation_count(),
            outcome.plan.appended_len()
        );
        Step::Done(outcome)
    }

    fn plan_entry(
        &self,
        entry: &ScannedEntry,
        translated: &str,
        shared: &HashSet<usize>,
        region: &mut RegionBuilder,
    ) -> Result<Vec<PatchOperation>, FailureReason> {
        let encoded = self
            .codepage
            .encode(translated)
            .map_err(|_| FailureReason::Unencodable {
                codepage: self.codepage.name().to_string(),
            })?;

        let mut ops = Vec::with_capacity(entry.occurrences.len());
        let mut appended = Vec::new();
        let mut cursor = region.data.len();

        for occurrence in &entry.occurrences {
            let length_updates = length_updates(occurrence, encoded.len())?;

            let fits = encoded.len() < occurrence.span
                && !occurrence.pinned
                && !shared.contains(&occurrence.offset);
            if fits {
                let mut new_bytes = encoded.clone();
                new_bytes.resize(occurrence.span, 0);
                ops.push(PatchOperation::InPlace {
                    address: occurrence.va,
                    offset: occurrence.offset,
                    new_bytes,
                    length_updates,
                });
                continue;
            }

            if occurrence.address_references().next().is_none() {
                return Err(FailureReason::NoReferences {
                    address: occurrence.va,
                });
            }

            let slot = self.slot(region)?;
            let region_offset = align_up(cursor as u64, RELOCATION_ALIGNMENT as u64) as usize;
            let new_address = slot.va + region_offset as u64;

            let mut updated_references = occurrence
                .address_references()
                .map(|r| address_update(r, new_address))
                .collect::<Result<Vec<_>, _>>()?;
            updated_references.extend(length_updates);

            let local = region_offset - region.data.len();
            appended.resize(local, 0);
            appended.extend_from_slice(&encoded);
            appended.push(0);
            cursor = region_offset + encoded.len() + 1;

            ops.push(PatchOperation::Relocate {
                old_address: occurrence.va,
                new_address,
                region_offset,
                new_bytes: encoded.clone(),
                updated_references,
            });
        }

        region.data.extend_from_slice(&appended);
        Ok(ops)
    }

    fn slot(&self, region: &mut RegionBuilder) -> Result<NewSectionSlot, FailureReason> {
        let slot = region.slot.get_or_insert_with(|| {
            self.image
                .new_section_slot(self.data)
                .map_err(|e| e.to_string())
        });
        slot.clone()
            .map_err(|reason| FailureReason::NoRelocationSpace { reason })
    }
}

/// Occurrences whose span overlaps another occurrence's span
fn shared_spans(scan: &ScanReport) -> HashSet<usize> {
    let mut spans: Vec<_> = scan
        .entries
        .iter()
        .flat_map(|e| &e.occurrences)
        .map(StringOccurrence::span_range)
        .collect();
    spans.sort_by_key(|s| s.start);

    let mut shared = HashSet::new();
    for (i, span) in spans.iter().enumerate() {
        for other in &spans[i + 1..] {
            if other.start >= span.end {
                break;
            }
            shared.insert(span.start);
            shared.insert(other.start);
        }
    }
    shared
}

fn address_update(reference: &StringReference, target: u64) -> Result<FieldUpdate, FailureReason> {
    let bytes = match (reference.kind, reference.width) {
        (ReferenceKind::RipRelative, 4) => {
            let disp = target as i64 - reference.next_ip as i64;
            i32::try_from(disp).ok().map(|d| d.to_le_bytes().to_vec())
        }
        (ReferenceKind::Absolute | ReferenceKind::DataPointer, 4) if reference.signed => {
            i32::try_from(target).ok().map(|v| v.to_le_bytes().to_vec())
        }
        (ReferenceKind::Absolute | ReferenceKind::DataPointer, 4) => {
            u32::try_from(target).ok().map(|v| v.to_le_bytes().to_vec())
        }
        (ReferenceKind::Absolute | ReferenceKind::DataPointer, 8) => {
            Some(target.to_le_bytes().to_vec())
        }
        _ => None,
    };

    bytes
        .map(|bytes| FieldUpdate {
            kind: reference.kind,
            address: reference.address,
            field_offset: reference.field_offset,
            bytes,
        })
        .ok_or(FailureReason::AddressOutOfRange {
            kind: reference.kind,
            reference: reference.address,
            target,
        })
}

fn length_updates(
    occurrence: &StringOccurrence,
    new_length: usize,
) -> Result<Vec<FieldUpdate>, FailureReason> {
    if new_length == occurrence.length {
        return Ok(Vec::new());
    }

    occurrence
        .length_references()
        .map(|r| {
            let max = match (r.width, r.signed) {
                (1, true) => i8::MAX as u64,
                (1, false) => u8::MAX as u64,
                (2, true) => i16::MAX as u64,
                (2, false) => u16::MAX as u64,
                (4, true) => i32::MAX as u64,
                (4, false) => u32::MAX as u64,
                (8, _) => i64::MAX as u64,
                _ => 0,
            };
            if new_length as u64 > max {
                return Err(FailureReason::LengthOverflow {
                    reference: r.address,
                    length: new_length,
                });
            }
            Ok(FieldUpdate {
                kind: ReferenceKind::Length,
                address: r.address,
                field_offset: r.field_offset,
                bytes: (new_length as u64).to_le_bytes()[..r.width].to_vec(),
            })
        })
        .collect()
}
