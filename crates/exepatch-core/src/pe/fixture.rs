//! Synthetic PE images for tests.
//!
//! Layout: headers up to 0x400, `.text` at RVA 0x1000 (file 0x400) and
//! `.rdata` at RVA 0x2000 (file 0x600), each 0x200 bytes.

use byteorder::{ByteOrder, LittleEndian};

pub const IMAGE_BASE_32: u64 = 0x0040_0000;
pub const IMAGE_BASE_64: u64 = 0x1_4000_0000;
pub const TEXT_RVA: u32 = 0x1000;
pub const RDATA_RVA: u32 = 0x2000;
pub const TEXT_RAW: usize = 0x400;
pub const RDATA_RAW: usize = 0x600;
pub const SECTION_RAW_SIZE: usize = 0x200;

const PE_OFFSET: usize = 0x80;
const OPTIONAL_OFFSET: usize = PE_OFFSET + 24;
const HEADERS_SIZE: usize = 0x400;

#[derive(Debug, Clone)]
pub struct ImageFixture {
    bitness: u32,
    code: Vec<u8>,
    rdata: Vec<u8>,
    full_headers: bool,
    checksum: u32,
    overlay: Vec<u8>,
    certificate: Vec<u8>,
}

impl ImageFixture {
    pub fn new(bitness: u32) -> Self {
        assert!(bitness == 32 || bitness == 64);
        Self {
            bitness,
            code: Vec::new(),
            rdata: Vec::new(),
            full_headers: false,
            checksum: 0,
            overlay: Vec::new(),
            certificate: Vec::new(),
        }
    }

    pub fn code(mut self, bytes: &[u8]) -> Self {
        assert!(bytes.len() <= SECTION_RAW_SIZE);
        self.code = bytes.to_vec();
        self
    }

    pub fn rdata(mut self, bytes: &[u8]) -> Self {
        assert!(bytes.len() <= SECTION_RAW_SIZE);
        self.rdata = bytes.to_vec();
        self
    }

    /// Leave no zeroed space for an extra section header
    pub fn full_headers(mut self) -> Self {
        self.full_headers = true;
        self
    }

    /// Bytes appended after the last section
    pub fn overlay(mut self, bytes: &[u8]) -> Self {
        self.overlay = bytes.to_vec();
        self
    }

    /// Attribute certificate table placed at the end of the file, after any overlay
    pub fn certificate(mut self, bytes: &[u8]) -> Self {
        self.certificate = bytes.to_vec();
        self
    }

    pub fn checksum(mut self, value: u32) -> Self {
        self.checksum = value;
        self
    }

    pub fn image_base(&self) -> u64 {
        if self.bitness == 64 {
            IMAGE_BASE_64
        } else {
            IMAGE_BASE_32
        }
    }

    pub fn text_va(&self, offset: usize) -> u64 {
        self.image_base() + TEXT_RVA as u64 + offset as u64
    }

    pub fn rdata_va(&self, offset: usize) -> u64 {
        self.image_base() + RDATA_RVA as u64 + offset as u64
    }

    pub fn section_table_offset(&self) -> usize {
        OPTIONAL_OFFSET + self.optional_size()
    }

    fn optional_size(&self) -> usize {
        if self.bitness == 64 { 0xF0 } else { 0xE0 }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut buf = vec![0u8; RDATA_RAW + SECTION_RAW_SIZE];

        buf[0..2].copy_from_slice(b"MZ");
        LittleEndian::write_u32(&mut buf[0x3C..], PE_OFFSET as u32);
        buf[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");

        let coff = PE_OFFSET + 4;
        let (machine, characteristics) = if self.bitness == 64 {
            (0x8664u16, 0x0022u16)
        } else {
            (0x014cu16, 0x0102u16)
        };
        LittleEndian::write_u16(&mut buf[coff..], machine);
        LittleEndian::write_u16(&mut buf[coff + 2..], 2);
        LittleEndian::write_u16(&mut buf[coff + 16..], self.optional_size() as u16);
        LittleEndian::write_u16(&mut buf[coff + 18..], characteristics);

        let opt = OPTIONAL_OFFSET;
        if self.bitness == 64 {
            LittleEndian::write_u16(&mut buf[opt..], 0x20b);
            LittleEndian::write_u64(&mut buf[opt + 24..], IMAGE_BASE_64);
            LittleEndian::write_u32(&mut buf[opt + 108..], 16);
        } else {
            LittleEndian::write_u16(&mut buf[opt..], 0x10b);
            LittleEndian::write_u32(&mut buf[opt + 28..], IMAGE_BASE_32 as u32);
            LittleEndian::write_u32(&mut buf[opt + 92..], 16);
        }
        LittleEndian::write_u32(&mut buf[opt + 4..], SECTION_RAW_SIZE as u32);
        LittleEndian::write_u32(&mut buf[opt + 8..], SECTION_RAW_SIZE as u32);
        LittleEndian::write_u32(&mut buf[opt + 16..], TEXT_RVA);
        LittleEndian::write_u32(&mut buf[opt + 32..], 0x1000);
        LittleEndian::write_u32(&mut buf[opt + 36..], 0x200);
        LittleEndian::write_u32(&mut buf[opt + 56..], 0x3000);
        LittleEndian::write_u32(&mut buf[opt + 60..], HEADERS_SIZE as u32);
        LittleEndian::write_u32(&mut buf[opt + 64..], self.checksum);
        LittleEndian::write_u16(&mut buf[opt + 68..], 3);

        let table = self.section_table_offset();
        write_section(&mut buf, table, b".text", TEXT_RVA, TEXT_RAW, 0x6000_0020);
        write_section(&mut buf, table + 40, b".rdata", RDATA_RVA, RDATA_RAW, 0x4000_0040);

        if self.full_headers {
            buf[table + 80..HEADERS_SIZE].fill(0xEE);
        }

        buf[TEXT_RAW..TEXT_RAW + SECTION_RAW_SIZE].fill(0xCC);
        buf[TEXT_RAW..TEXT_RAW + self.code.len()].copy_from_slice(&self.code);
        buf[RDATA_RAW..RDATA_RAW + self.rdata.len()].copy_from_slice(&self.rdata);

        buf.extend_from_slice(&self.overlay);
        if !self.certificate.is_empty() {
            buf.resize(buf.len().div_ceil(8) * 8, 0);
            let directories = if self.bitness == 64 { opt + 112 } else { opt + 96 };
            let cert_offset = buf.len() as u32;
            LittleEndian::write_u32(&mut buf[directories + 32..], cert_offset);
            LittleEndian::write_u32(&mut buf[directories + 36..], self.certificate.len() as u32);
            buf.extend_from_slice(&self.certificate);
        }

        buf
    }

    /// File offset of the security data directory entry
    pub fn security_entry_offset(&self) -> usize {
        let directories = if self.bitness == 64 { 112 } else { 96 };
        OPTIONAL_OFFSET + directories + 32
    }
}

fn write_section(buf: &mut [u8], at: usize, name: &[u8], rva: u32, raw: usize, flags: u32) {
    buf[at..at + name.len()].copy_from_slice(name);
    LittleEndian::write_u32(&mut buf[at + 8..], SECTION_RAW_SIZE as u32);
    LittleEndian::write_u32(&mut buf[at + 12..], rva);
    LittleEndian::write_u32(&mut buf[at + 16..], SECTION_RAW_SIZE as u32);
    LittleEndian::write_u32(&mut buf[at + 20..], raw as u32);
    LittleEndian::write_u32(&mut buf[at + 36..], flags);
}

/// Place NUL-terminated strings back to back starting at `start`, each
/// aligned to 4 bytes. Returns the offset of every string.
pub fn layout_strings(rdata: &mut Vec<u8>, start: usize, strings: &[&[u8]]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(strings.len());
    let mut cursor = start;
    for s in strings {
        cursor = cursor.div_ceil(4) * 4;
        if rdata.len() < cursor + s.len() + 1 {
            rdata.resize(cursor + s.len() + 1, 0);
        }
        rdata[cursor..cursor + s.len()].copy_from_slice(s);
        offsets.push(cursor);
        cursor += s.len() + 1;
    }
    offsets
}
