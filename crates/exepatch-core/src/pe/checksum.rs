/// PE optional-header checksum: 16-bit one's-complement style sum of the
/// file with the checksum field itself treated as zero, plus the file length.
pub fn pe_checksum(data: &[u8], checksum_offset: usize) -> u32 {
    let field = checksum_offset..checksum_offset + 4;
    let mut sum: u64 = 0;

    for (i, chunk) in data.chunks(2).enumerate() {
        let offset = i * 2;
        let lo = if field.contains(&offset) { 0 } else { chunk[0] };
        let hi = match chunk.get(1) {
            Some(_) if field.contains(&(offset + 1)) => 0,
            Some(&b) => b,
            None => 0,
        };
        sum += u16::from_le_bytes([lo, hi]) as u64;
        sum = (sum & 0xffff) + (sum >> 16);
    }

    sum = (sum & 0xffff) + (sum >> 16);
    (sum as u32).wrapping_add(data.len() as u32)
}
