//! PE32 / PE32+ header model.
//!
//! Headers and the section table are decoded with `goblin`; the offsets of
//! the few fields the rewriter patches are kept so they can be written back
//! into the caller's buffer.

use std::ops::Range;

use byteorder::{ByteOrder, LittleEndian};
use goblin::pe::header::{Header, SIZEOF_COFF_HEADER, SIZEOF_PE_MAGIC};
use goblin::pe::section_table::SectionTable;
use tracing::debug;

use crate::error::{Error, Result};

pub const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;
pub const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
pub const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;

pub const MACHINE_I386: u16 = 0x014c;
pub const MACHINE_AMD64: u16 = 0x8664;

pub const SECTION_HEADER_SIZE: usize = 40;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const MAX_SECTIONS: usize = 96;

/// Attribute certificates are padded to this boundary
const CERTIFICATE_ALIGNMENT: u64 = 8;

/// Header field offsets, relative to the optional header
pub mod field {
    pub const SIZE_OF_INITIALIZED_DATA: usize = 8;
    pub const SIZE_OF_IMAGE: usize = 56;
    pub const CHECKSUM: usize = 64;
    pub const DATA_DIRECTORIES_PE32: usize = 96;
    pub const DATA_DIRECTORIES_PE32_PLUS: usize = 112;
    /// IMAGE_DIRECTORY_ENTRY_SECURITY, relative to the first data directory
    pub const SECURITY_DIRECTORY: usize = 4 * 8;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub name: String,
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub raw_size: u32,
    pub raw_offset: u32,
    pub characteristics: u32,
    /// File offset of this section's header
    pub header_offset: usize,
}

impl Section {
    fn from_table(table: &SectionTable, header_offset: usize) -> Self {
        let name_len = table.name.iter().position(|&b| b == 0).unwrap_or(8);
        Self {
            name: String::from_utf8_lossy(&table.name[..name_len]).into_owned(),
            virtual_size: table.virtual_size,
            virtual_address: table.virtual_address,
            raw_size: table.size_of_raw_data,
            raw_offset: table.pointer_to_raw_data,
            characteristics: table.characteristics,
            header_offset,
        }
    }

    pub fn is_code(&self) -> bool {
        self.characteristics & (IMAGE_SCN_MEM_EXECUTE | IMAGE_SCN_CNT_CODE) != 0
    }

    /// Initialized, non-executable data backed by file bytes
    pub fn is_data(&self) -> bool {
        !self.is_code()
            && self.characteristics & IMAGE_SCN_CNT_INITIALIZED_DATA != 0
            && self.raw_size > 0
    }

    pub fn raw_range(&self) -> Range<usize> {
        let start = self.raw_offset as usize;
        start..start + self.raw_size as usize
    }

    /// One past the last RVA covered by the section in memory
    pub fn virtual_end(&self) -> u64 {
        self.virtual_address as u64 + self.virtual_size.max(self.raw_size) as u64
    }

    /// RVA backed by file bytes of this section
    pub fn contains_raw_rva(&self, rva: u64) -> bool {
        let start = self.virtual_address as u64;
        rva >= start && rva < start + self.raw_size as u64
    }
}

/// Where a new section header and its data will go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewSectionSlot {
    pub header_offset: usize,
    pub rva: u32,
    pub va: u64,
    /// Input bytes kept ahead of the new section; a trailing certificate
    /// table is cut off here
    pub keep_len: usize,
    pub file_offset: usize,
}

#[derive(Debug, Clone)]
pub struct PeImage {
    bitness: u32,
    image_base: u64,
    section_alignment: u32,
    file_alignment: u32,
    size_of_image: u32,
    size_of_headers: u32,
    checksum: u32,
    coff_offset: usize,
    optional_offset: usize,
    section_table_offset: usize,
    /// File offset of the security data directory entry, when present
    security_entry_offset: Option<usize>,
    /// File range of the attribute certificate table
    certificates: Option<Range<usize>>,
    sections: Vec<Section>,
    file_len: usize,
}

impl PeImage {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = Header::parse(data).map_err(|e| Error::InvalidImage(e.to_string()))?;

        let coff = header.coff_header;
        let bitness = match coff.machine {
            MACHINE_I386 => 32,
            MACHINE_AMD64 => 64,
            other => return Err(Error::UnsupportedMachine(other)),
        };
        let Some(optional) = header.optional_header else {
            return Err(Error::InvalidImage("missing optional header".to_string()));
        };

        let magic = optional.standard_fields.magic;
        let directories_at = match (magic, bitness) {
            (PE32_MAGIC, 32) => field::DATA_DIRECTORIES_PE32,
            (PE32_PLUS_MAGIC, 64) => field::DATA_DIRECTORIES_PE32_PLUS,
            _ => {
                return Err(Error::InvalidImage(format!(
                    "optional header magic {:#x} does not match machine {:#x}",
                    magic, coff.machine
                )));
            }
        };

        let windows = optional.windows_fields;
        let section_alignment = windows.section_alignment;
        let file_alignment = windows.file_alignment;
        if !section_alignment.is_power_of_two() || !file_alignment.is_power_of_two() {
            return Err(Error::InvalidImage(format!(
                "bad alignment: section {:#x}, file {:#x}",
                section_alignment, file_alignment
            )));
        }

        let number_of_sections = coff.number_of_sections as usize;
        if number_of_sections == 0 || number_of_sections > MAX_SECTIONS {
            return Err(Error::InvalidImage(format!(
                "unreasonable section count {}",
                number_of_sections
            )));
        }

        let coff_offset = header.dos_header.pe_pointer as usize + SIZEOF_PE_MAGIC;
        let optional_offset = coff_offset + SIZEOF_COFF_HEADER;
        let section_table_offset = optional_offset + coff.size_of_optional_header as usize;

        let mut cursor = section_table_offset;
        let tables = coff
            .sections(data, &mut cursor)
            .map_err(|e| Error::InvalidImage(e.to_string()))?;
        let mut sections = Vec::with_capacity(tables.len());
        for (i, table) in tables.iter().enumerate() {
            let section = Section::from_table(table, section_table_offset + i * SECTION_HEADER_SIZE);
            if section.raw_range().end > data.len() {
                return Err(Error::InvalidImage(format!(
                    "section {} raw data {:#x}..{:#x} exceeds file size {:#x}",
                    section.name,
                    section.raw_range().start,
                    section.raw_range().end,
                    data.len()
                )));
            }
            sections.push(section);
        }

        let security_entry_offset = (windows.number_of_rva_and_sizes > 4)
            .then_some(optional_offset + directories_at + field::SECURITY_DIRECTORY);
        // the certificate directory holds a file offset, not an RVA
        let certificates = optional
            .data_directories
            .get_certificate_table()
            .as_ref()
            .filter(|dir| dir.size > 0)
            .map(|dir| {
                let start = dir.virtual_address as usize;
                start..start + dir.size as usize
            });
        if let Some(range) = &certificates {
            debug!("Certificate table at {:#x}..{:#x}", range.start, range.end);
        }

        Ok(Self {
            bitness,
            image_base: windows.image_base,
            section_alignment,
            file_alignment,
            size_of_image: windows.size_of_image,
            size_of_headers: windows.size_of_headers,
            checksum: windows.check_sum,
            coff_offset,
            optional_offset,
            section_table_offset,
            security_entry_offset,
            certificates,
            sections,
            file_len: data.len(),
        })
    }

    /// 32 for PE32 (i386), 64 for PE32+ (AMD64)
    pub fn bitness(&self) -> u32 {
        self.bitness
    }

    pub fn pointer_width(&self) -> usize {
        (self.bitness / 8) as usize
    }

    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    pub fn section_alignment(&self) -> u32 {
        self.section_alignment
    }

    pub fn file_alignment(&self) -> u32 {
        self.file_alignment
    }

    pub fn size_of_image(&self) -> u32 {
        self.size_of_image
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn file_len(&self) -> usize {
        self.file_len
    }

    pub fn certificates(&self) -> Option<Range<usize>> {
        self.certificates.clone()
    }

    pub fn security_entry_offset(&self) -> Option<usize> {
        self.security_entry_offset
    }

    /// End of the last section's file data; anything after it is overlay
    pub fn sections_end(&self) -> usize {
        self.sections
            .iter()
            .map(|s| s.raw_range().end)
            .max()
            .unwrap_or(0)
            .max(self.size_of_headers as usize)
    }

    /// Where the input is cut before a new section is appended. A
    /// certificate table at the very end of the file is dropped; any other
    /// overlay is kept.
    fn appendable_len(&self) -> usize {
        let sections_end = self.sections_end();
        match &self.certificates {
            Some(cert)
                if cert.start >= sections_end
                    && align_up(cert.end as u64, CERTIFICATE_ALIGNMENT) >= self.file_len as u64 =>
            {
                cert.start
            }
            _ => self.file_len,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn code_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_code())
    }

    pub fn data_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_data())
    }

    pub fn number_of_sections_offset(&self) -> usize {
        self.coff_offset + 2
    }

    pub fn optional_field_offset(&self, field: usize) -> usize {
        self.optional_offset + field
    }

    pub fn section_table_offset(&self) -> usize {
        self.section_table_offset
    }

    pub fn section_for_offset(&self, offset: usize) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.raw_range().contains(&offset))
    }

    pub fn va_to_offset(&self, va: u64) -> Option<usize> {
        let rva = va.checked_sub(self.image_base)?;
        self.sections
            .iter()
            .find(|s| s.contains_raw_rva(rva))
            .map(|s| s.raw_offset as usize + (rva - s.virtual_address as u64) as usize)
    }

    pub fn offset_to_va(&self, offset: usize) -> Option<u64> {
        self.section_for_offset(offset).map(|s| {
            self.image_base + s.virtual_address as u64 + (offset - s.raw_offset as usize) as u64
        })
    }

    /// Data section holding the byte at `va`, if any
    pub fn data_section_for_va(&self, va: u64) -> Option<&Section> {
        let rva = va.checked_sub(self.image_base)?;
        self.data_sections().find(|s| s.contains_raw_rva(rva))
    }

    /// Reserve room for one more section after every existing one.
    ///
    /// Fails when the header area has no zeroed space left for another
    /// section header.
    pub fn new_section_slot(&self, data: &[u8]) -> Result<NewSectionSlot> {
        let header_offset = self.section_table_offset + self.sections.len() * SECTION_HEADER_SIZE;
        let header_end = header_offset + SECTION_HEADER_SIZE;

        let first_raw = self
            .sections
            .iter()
            .filter(|s| s.raw_size > 0)
            .map(|s| s.raw_offset as usize)
            .min()
            .unwrap_or(usize::MAX);
        let limit = (self.size_of_headers as usize).min(first_raw);

        if header_end > limit {
            return Err(Error::InvalidPlan(format!(
                "no room for another section header ({:#x} > {:#x})",
                header_end, limit
            )));
        }
        if data
            .get(header_offset..header_end)
            .is_none_or(|slack| slack.iter().any(|&b| b != 0))
        {
            return Err(Error::InvalidPlan(
                "header slack after the section table is in use".to_string(),
            ));
        }

        let last_end = self
            .sections
            .iter()
            .map(Section::virtual_end)
            .max()
            .unwrap_or(0)
            .max(self.size_of_image as u64);
        let rva = align_up(last_end, self.section_alignment as u64);
        let rva = u32::try_from(rva)
            .map_err(|_| Error::InvalidPlan(format!("new section RVA {:#x} overflows", rva)))?;

        let keep_len = self.appendable_len();

        Ok(NewSectionSlot {
            header_offset,
            rva,
            va: self.image_base + rva as u64,
            keep_len,
            file_offset: align_up(keep_len as u64, self.file_alignment as u64) as usize,
        })
    }
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

fn truncated(offset: usize) -> Error {
    Error::InvalidImage(format!("truncated header at {:#x}", offset))
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .map(LittleEndian::read_u32)
        .ok_or_else(|| truncated(offset))
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .map(LittleEndian::read_u64)
        .ok_or_else(|| truncated(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pe::fixture::{self, ImageFixture};

    #[test]
    fn test_parse_pe32() {
        let data = ImageFixture::new(32).checksum(0xBEEF).build();
        let image = PeImage::parse(&data).unwrap();

        assert_eq!(image.bitness(), 32);
        assert_eq!(image.section_alignment(), 0x1000);
        assert_eq!(image.file_alignment(), 0x200);
        assert_eq!(image.size_of_image(), 0x3000);
        assert_eq!(image.checksum(), 0xBEEF);
        assert_eq!(image.sections()[1].header_offset, image.section_table_offset() + 40);
        assert_eq!(image.pointer_width(), 4);
        assert_eq!(image.image_base(), fixture::IMAGE_BASE_32);
        assert_eq!(image.sections().len(), 2);
        assert_eq!(image.sections()[0].name, ".text");
        assert!(image.sections()[0].is_code());
        assert_eq!(image.sections()[1].name, ".rdata");
        assert!(image.sections()[1].is_data());
        assert_eq!(image.code_sections().count(), 1);
        assert_eq!(image.data_sections().count(), 1);
    }

    #[test]
    fn test_parse_pe32_plus() {
        let data = ImageFixture::new(64).build();
        let image = PeImage::parse(&data).unwrap();
        assert_eq!(image.bitness(), 64);
        assert_eq!(image.image_base(), fixture::IMAGE_BASE_64);
        assert_eq!(image.pointer_width(), 8);
    }

    #[test]
    fn test_address_mapping() {
        let fx = ImageFixture::new(32);
        let data = fx.build();
        let image = PeImage::parse(&data).unwrap();

        let va = fx.rdata_va(0x10);
        let offset = image.va_to_offset(va).unwrap();
        assert_eq!(offset, fixture::RDATA_RAW + 0x10);
        assert_eq!(image.offset_to_va(offset), Some(va));
        assert!(image.data_section_for_va(va).is_some());
        assert!(image.data_section_for_va(fx.text_va(0)).is_none());
        assert_eq!(image.va_to_offset(0x10), None);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            PeImage::parse(b"not an executable at all, just some text padding....................."),
            Err(Error::InvalidImage(_))
        ));

        let mut data = ImageFixture::new(32).build();
        data[0x84] = 0xC4;
        data[0x85] = 0x01;
        assert!(matches!(
            PeImage::parse(&data),
            Err(Error::UnsupportedMachine(0x01C4))
        ));
    }

    #[test]
    fn test_rejects_section_past_eof() {
        let data = ImageFixture::new(32).build();
        let truncated = &data[..fixture::RDATA_RAW + 0x10];
        assert!(matches!(
            PeImage::parse(truncated),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_new_section_slot() {
        let data = ImageFixture::new(32).build();
        let image = PeImage::parse(&data).unwrap();
        let slot = image.new_section_slot(&data).unwrap();

        assert_eq!(
            slot.header_offset,
            image.section_table_offset() + 2 * SECTION_HEADER_SIZE
        );
        assert_eq!(slot.rva, 0x3000);
        assert_eq!(slot.va, fixture::IMAGE_BASE_32 + 0x3000);
        assert_eq!(slot.file_offset, data.len());
        assert_eq!(slot.keep_len, data.len());
        assert!(image.certificates().is_none());
    }

    #[test]
    fn test_new_section_slot_keeps_overlay() {
        let data = ImageFixture::new(32).overlay(&[0xAB; 0x30]).build();
        let image = PeImage::parse(&data).unwrap();
        assert_eq!(image.sections_end(), fixture::RDATA_RAW + fixture::SECTION_RAW_SIZE);

        let slot = image.new_section_slot(&data).unwrap();
        assert_eq!(slot.keep_len, data.len());
        assert_eq!(slot.file_offset, align_up(data.len() as u64, 0x200) as usize);
    }

    #[test]
    fn test_new_section_slot_drops_trailing_certificates() {
        let fx = ImageFixture::new(64).overlay(&[0xAB; 0x13]).certificate(&[0x5A; 0x40]);
        let data = fx.build();
        let image = PeImage::parse(&data).unwrap();

        let sections_end = fixture::RDATA_RAW + fixture::SECTION_RAW_SIZE;
        let cert_start = (sections_end + 0x13).div_ceil(8) * 8;
        assert_eq!(image.certificates(), Some(cert_start..cert_start + 0x40));
        assert_eq!(image.security_entry_offset(), Some(fx.security_entry_offset()));

        let slot = image.new_section_slot(&data).unwrap();
        assert_eq!(slot.keep_len, cert_start);
        assert_eq!(slot.file_offset, align_up(cert_start as u64, 0x200) as usize);
    }

    #[test]
    fn test_new_section_slot_without_room() {
        let data = ImageFixture::new(32).full_headers().build();
        let image = PeImage::parse(&data).unwrap();
        assert!(matches!(
            image.new_section_slot(&data),
            Err(Error::InvalidPlan(_))
        ));
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 0x200), 0);
        assert_eq!(align_up(1, 0x200), 0x200);
        assert_eq!(align_up(0x200, 0x200), 0x200);
        assert_eq!(align_up(0x2001, 0x1000), 0x3000);
        assert_eq!(align_up(7, 1), 7);
    }
}
