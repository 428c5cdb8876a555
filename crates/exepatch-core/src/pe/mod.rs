mod checksum;
mod image;

#[cfg(test)]
pub mod fixture;

pub use checksum::pe_checksum;
pub use image::{
    IMAGE_SCN_CNT_CODE, IMAGE_SCN_CNT_INITIALIZED_DATA, IMAGE_SCN_MEM_EXECUTE, IMAGE_SCN_MEM_READ,
    MACHINE_AMD64, MACHINE_I386, NewSectionSlot, PeImage, SECTION_HEADER_SIZE, Section, align_up,
    field,
};
pub(crate) use image::{read_u32, read_u64};
