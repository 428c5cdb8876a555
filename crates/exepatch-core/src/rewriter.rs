//! Binary rewriter: applies a validated [`Plan`] to a copy of the image.
//!
//! The whole plan is checked before the first byte is copied. Any
//! inconsistency aborts the rewrite with [`Error::InvalidPlan`] and the
//! original buffer is never touched.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pe::{
    IMAGE_SCN_CNT_INITIALIZED_DATA, IMAGE_SCN_MEM_READ, PeImage, SECTION_HEADER_SIZE, align_up,
    field, pe_checksum,
};
use crate::planner::{PatchOperation, Plan, RelocationRegion};

/// Name of the section that receives relocated strings
pub const RELOCATION_SECTION_NAME: &[u8; 8] = b".xlat\0\0\0";

struct PendingWrite<'p> {
    offset: usize,
    bytes: &'p [u8],
}

impl PendingWrite<'_> {
    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.bytes.len()
    }
}

/// Produce the patched image. An empty plan yields a byte-identical copy.
pub fn apply(original: &[u8], image: &PeImage, plan: &Plan) -> Result<Vec<u8>> {
    let writes = collect_writes(plan);
    validate_writes(image, &writes)?;
    if let Some(region) = &plan.region {
        validate_region(original, image, plan, region)?;
    } else if plan.relocation_count() > 0 {
        return Err(Error::InvalidPlan(
            "relocations without a relocation region".to_string(),
        ));
    }

    let mut out = original.to_vec();
    for write in &writes {
        out[write.range()].copy_from_slice(write.bytes);
    }

    if let Some(region) = &plan.region {
        append_section(&mut out, image, region);
    }

    if plan.region.is_some() || !writes.is_empty() {
        update_checksum(&mut out, image);
    }

    verify(&out, image, plan)?;
    debug!(
        "Rewrote {} fields, image size {:#x} -> {:#x}",
        writes.len(),
        original.len(),
        out.len()
    );
    Ok(out)
}

fn collect_writes(plan: &Plan) -> Vec<PendingWrite<'_>> {
    let mut writes = Vec::new();
    for op in &plan.operations {
        if let PatchOperation::InPlace {
            offset, new_bytes, ..
        } = op
        {
            writes.push(PendingWrite {
                offset: *offset,
                bytes: new_bytes,
            });
        }
        for update in op.field_updates() {
            writes.push(PendingWrite {
                offset: update.field_offset,
                bytes: &update.bytes,
            });
        }
    }
    writes
}

/// Every write must land inside one section's file data and touch no byte
/// another write touches.
fn validate_writes(image: &PeImage, writes: &[PendingWrite]) -> Result<()> {
    for write in writes {
        let range = write.range();
        let inside = image
            .section_for_offset(range.start)
            .is_some_and(|s| range.end <= s.raw_range().end);
        if write.bytes.is_empty() || !inside {
            return Err(Error::InvalidPlan(format!(
                "write {:#x}..{:#x} is outside section data",
                range.start, range.end
            )));
        }
    }

    let mut ranges: Vec<Range<usize>> = writes.iter().map(PendingWrite::range).collect();
    ranges.sort_by_key(|r| r.start);
    for pair in ranges.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(Error::InvalidPlan(format!(
                "overlapping writes at {:#x} and {:#x}",
                pair[0].start, pair[1].start
            )));
        }
    }
    Ok(())
}

fn validate_region(
    original: &[u8],
    image: &PeImage,
    plan: &Plan,
    region: &RelocationRegion,
) -> Result<()> {
    if region.data.is_empty() {
        return Err(Error::InvalidPlan("empty relocation region".to_string()));
    }

    let expected = image.new_section_slot(original)?;
    if expected != region.slot {
        return Err(Error::InvalidPlan(format!(
            "relocation region at RVA {:#x} collides with the image layout (next free RVA {:#x})",
            region.slot.rva, expected.rva
        )));
    }

    let end_rva = region.slot.rva as u64 + region.data.len() as u64;
    if u32::try_from(align_up(end_rva, image.section_alignment() as u64)).is_err() {
        return Err(Error::InvalidPlan(
            "relocation region exceeds the 32-bit image size".to_string(),
        ));
    }

    for op in &plan.operations {
        let PatchOperation::Relocate {
            new_address,
            region_offset,
            new_bytes,
            ..
        } = op
        else {
            continue;
        };
        let start = *region_offset;
        let end = start + new_bytes.len();
        let stored = region.data.get(start..end);
        if *new_address != region.slot.va + start as u64
            || stored != Some(new_bytes.as_slice())
            || region.data.get(end) != Some(&0)
        {
            return Err(Error::InvalidPlan(format!(
                "relocated string at {:#x} does not match the region contents",
                new_address
            )));
        }
    }
    Ok(())
}

fn append_section(out: &mut Vec<u8>, image: &PeImage, region: &RelocationRegion) {
    let slot = region.slot;
    let file_alignment = image.file_alignment() as u64;
    let virtual_size = region.data.len() as u32;
    let raw_size = align_up(region.data.len() as u64, file_alignment) as u32;

    if slot.keep_len < out.len() {
        drop_certificates(out, image);
        out.truncate(slot.keep_len);
    }
    if slot.keep_len > image.sections_end() {
        warn!(
            "Keeping {:#x} bytes of overlay data ahead of the new section",
            slot.keep_len - image.sections_end()
        );
    }
    out.resize(slot.file_offset, 0);
    out.extend_from_slice(&region.data);
    out.resize(slot.file_offset + raw_size as usize, 0);

    let header = &mut out[slot.header_offset..slot.header_offset + SECTION_HEADER_SIZE];
    header.fill(0);
    header[0..8].copy_from_slice(RELOCATION_SECTION_NAME);
    LittleEndian::write_u32(&mut header[8..12], virtual_size);
    LittleEndian::write_u32(&mut header[12..16], slot.rva);
    LittleEndian::write_u32(&mut header[16..20], raw_size);
    LittleEndian::write_u32(&mut header[20..24], slot.file_offset as u32);
    LittleEndian::write_u32(
        &mut header[36..40],
        IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ,
    );

    let count_at = image.number_of_sections_offset();
    let count = LittleEndian::read_u16(&out[count_at..count_at + 2]);
    LittleEndian::write_u16(&mut out[count_at..count_at + 2], count + 1);

    let size_of_image = align_up(
        slot.rva as u64 + virtual_size as u64,
        image.section_alignment() as u64,
    ) as u32;
    let at = image.optional_field_offset(field::SIZE_OF_IMAGE);
    LittleEndian::write_u32(&mut out[at..at + 4], size_of_image);

    let at = image.optional_field_offset(field::SIZE_OF_INITIALIZED_DATA);
    let initialized = LittleEndian::read_u32(&out[at..at + 4]);
    LittleEndian::write_u32(&mut out[at..at + 4], initialized.wrapping_add(raw_size));
}

/// Clear the security directory; the certificate bytes are cut off by the caller
fn drop_certificates(out: &mut [u8], image: &PeImage) {
    let (Some(at), Some(range)) = (image.security_entry_offset(), image.certificates()) else {
        return;
    };
    warn!(
        "Removing the {}-byte certificate table; the patched file is no longer signed",
        range.len()
    );
    out[at..at + 8].fill(0);
}

/// Recompute the checksum only for images that carry one
fn update_checksum(out: &mut [u8], image: &PeImage) {
    if image.checksum() == 0 {
        return;
    }
    let at = image.optional_field_offset(field::CHECKSUM);
    let checksum = pe_checksum(out, at);
    LittleEndian::write_u32(&mut out[at..at + 4], checksum);
}

/// Re-parse the result and check the section table came out as planned
fn verify(out: &[u8], image: &PeImage, plan: &Plan) -> Result<()> {
    let patched = PeImage::parse(out)
        .map_err(|e| Error::InvalidPlan(format!("patched image does not parse: {}", e)))?;

    let expected_sections = image.sections().len() + usize::from(plan.region.is_some());
    if patched.sections().len() != expected_sections {
        return Err(Error::InvalidPlan(format!(
            "expected {} sections after patching, found {}",
            expected_sections,
            patched.sections().len()
        )));
    }

    if let Some(region) = &plan.region {
        let added = &patched.sections()[expected_sections - 1];
        let overlaps = image.sections().iter().any(|s| {
            (added.virtual_address as u64) < s.virtual_end()
                && (s.virtual_address as u64) < added.virtual_end()
        });
        if overlaps || added.virtual_address != region.slot.rva {
            return Err(Error::InvalidPlan(
                "new section overlaps existing sections".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::codepage::Codepage;
    use crate::pe::fixture::{ImageFixture, RDATA_RAW, TEXT_RAW};
    use crate::planner::{FieldUpdate, Planner};
    use crate::scanner::{ReferenceKind, Scanner};

    fn push32(va: u64) -> Vec<u8> {
        let mut code = vec![0x68];
        code.extend_from_slice(&(va as u32).to_le_bytes());
        code
    }

    fn hello_image(fx: &ImageFixture) -> Vec<u8> {
        let mut code = push32(fx.rdata_va(4));
        code.extend(push32(fx.rdata_va(4)));
        fx.clone()
            .code(&code)
            .rdata(b"\0\0\0\0Hello\0World\0")
            .build()
    }

    fn plan_for(data: &[u8], pairs: &[(&str, &str)]) -> Plan {
        let image = PeImage::parse(data).unwrap();
        let cp = Codepage::lookup("cp437").unwrap();
        let originals: Vec<&str> = pairs.iter().map(|(o, _)| *o).collect();
        let translations: Vec<&str> = pairs.iter().map(|(_, t)| *t).collect();
        let cancel = CancelToken::new();
        let scan = Scanner::new(data, &image, cp)
            .scan(&originals, &cancel)
            .done()
            .unwrap();
        Planner::new(data, &image, cp)
            .plan(&scan, &translations, &cancel)
            .done()
            .unwrap()
            .plan
    }

    #[test]
    fn test_empty_plan_is_identity() {
        let data = hello_image(&ImageFixture::new(32).checksum(0x1234));
        let image = PeImage::parse(&data).unwrap();
        let out = apply(&data, &image, &Plan::default()).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_in_place_touches_only_span() {
        let data = hello_image(&ImageFixture::new(32));
        let image = PeImage::parse(&data).unwrap();
        let plan = plan_for(&data, &[("Hello", "Hi")]);
        let out = apply(&data, &image, &plan).unwrap();

        assert_eq!(out.len(), data.len());
        let span = RDATA_RAW + 4..RDATA_RAW + 10;
        assert_eq!(&out[span.clone()], b"Hi\0\0\0\0");
        for (i, (a, b)) in data.iter().zip(&out).enumerate() {
            if !span.contains(&i) {
                assert_eq!(a, b, "byte {:#x} changed", i);
            }
        }
    }

    #[test]
    fn test_relocation_adds_section() {
        let fx = ImageFixture::new(32);
        let data = hello_image(&fx);
        let image = PeImage::parse(&data).unwrap();
        let plan = plan_for(&data, &[("Hello", "Bonjour")]);
        assert_eq!(plan.relocation_count(), 1);

        let out = apply(&data, &image, &plan).unwrap();
        assert!(out.len() > data.len());

        let patched = PeImage::parse(&out).unwrap();
        assert_eq!(patched.sections().len(), 3);
        let added = &patched.sections()[2];
        assert_eq!(added.name, ".xlat");
        assert_eq!(added.virtual_address, 0x3000);
        assert!(added.is_data());
        assert_eq!(patched.size_of_image(), 0x4000);

        let new_va = fx.image_base() + 0x3000;
        let new_offset = patched.va_to_offset(new_va).unwrap();
        assert_eq!(&out[new_offset..new_offset + 8], b"Bonjour\0");

        // both references retargeted, original string left in place
        assert_eq!(&out[TEXT_RAW + 1..TEXT_RAW + 5], &(new_va as u32).to_le_bytes());
        assert_eq!(&out[TEXT_RAW + 6..TEXT_RAW + 10], &(new_va as u32).to_le_bytes());
        assert_eq!(&out[RDATA_RAW + 4..RDATA_RAW + 10], b"Hello\0");
    }

    #[test]
    fn test_relocation_removes_certificate_table() {
        let fx = ImageFixture::new(32).certificate(&[0x5A; 0x40]);
        let data = hello_image(&fx);
        let image = PeImage::parse(&data).unwrap();
        let cert = image.certificates().unwrap();
        let plan = plan_for(&data, &[("Hello", "Bonjour")]);

        let out = apply(&data, &image, &plan).unwrap();
        let entry = fx.security_entry_offset();
        assert_eq!(&out[entry..entry + 8], &[0; 8]);
        assert!(!out.windows(0x40).any(|w| w == [0x5A; 0x40]));

        let patched = PeImage::parse(&out).unwrap();
        assert!(patched.certificates().is_none());
        let added = &patched.sections()[2];
        assert_eq!(added.raw_offset as usize, align_up(cert.start as u64, 0x200) as usize);
        assert_eq!(out.len(), added.raw_range().end);
    }

    #[test]
    fn test_relocation_keeps_overlay() {
        let fx = ImageFixture::new(32).overlay(b"OVERLAY!");
        let data = hello_image(&fx);
        let image = PeImage::parse(&data).unwrap();
        let overlay = image.sections_end()..data.len();
        let plan = plan_for(&data, &[("Hello", "Bonjour")]);

        let out = apply(&data, &image, &plan).unwrap();
        assert_eq!(&out[overlay.clone()], b"OVERLAY!");
        let reparsed = PeImage::parse(&out).unwrap();
        let added = &reparsed.sections()[2];
        assert!(added.raw_offset as usize >= overlay.end);
    }

    #[test]
    fn test_checksum_recomputed_when_present() {
        let data = hello_image(&ImageFixture::new(32).checksum(0xDEAD));
        let image = PeImage::parse(&data).unwrap();
        let plan = plan_for(&data, &[("Hello", "Bonjour")]);
        let out = apply(&data, &image, &plan).unwrap();

        let patched = PeImage::parse(&out).unwrap();
        let at = image.optional_field_offset(field::CHECKSUM);
        assert_eq!(patched.checksum(), pe_checksum(&out, at));
        assert_ne!(patched.checksum(), 0xDEAD);
    }

    #[test]
    fn test_checksum_left_zero() {
        let data = hello_image(&ImageFixture::new(32));
        let image = PeImage::parse(&data).unwrap();
        let plan = plan_for(&data, &[("Hello", "Bonjour")]);
        let out = apply(&data, &image, &plan).unwrap();
        assert_eq!(PeImage::parse(&out).unwrap().checksum(), 0);
    }

    #[test]
    fn test_overlapping_writes_rejected() {
        let data = hello_image(&ImageFixture::new(32));
        let image = PeImage::parse(&data).unwrap();
        let update = FieldUpdate {
            kind: ReferenceKind::Length,
            address: 0,
            field_offset: RDATA_RAW + 5,
            bytes: vec![1],
        };
        let plan = Plan {
            operations: vec![PatchOperation::InPlace {
                address: 0,
                offset: RDATA_RAW + 4,
                new_bytes: b"Hi\0\0\0\0".to_vec(),
                length_updates: vec![update],
            }],
            region: None,
        };
        assert!(matches!(
            apply(&data, &image, &plan),
            Err(Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_write_outside_sections_rejected() {
        let data = hello_image(&ImageFixture::new(32));
        let image = PeImage::parse(&data).unwrap();
        let plan = Plan {
            operations: vec![PatchOperation::InPlace {
                address: 0,
                offset: 0x10,
                new_bytes: vec![0xFF],
                length_updates: Vec::new(),
            }],
            region: None,
        };
        assert!(matches!(
            apply(&data, &image, &plan),
            Err(Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_colliding_region_rejected() {
        let data = hello_image(&ImageFixture::new(32));
        let image = PeImage::parse(&data).unwrap();
        let mut plan = plan_for(&data, &[("Hello", "Bonjour")]);
        if let Some(region) = plan.region.as_mut() {
            region.slot.rva = 0x2000;
        }
        assert!(matches!(
            apply(&data, &image, &plan),
            Err(Error::InvalidPlan(_))
        ));
    }
}
