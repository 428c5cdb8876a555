//! Upper halves (0x80..=0xFF) of the DOS codepages `encoding_rs` does not ship.
//!
//! The lower half of both tables is plain ASCII.

pub const CP437_HIGH: &str = concat!(
    "ÇüéâäàåçêëèïîìÄÅ",
    "ÉæÆôöòûùÿÖÜ¢£¥₧ƒ",
    "áíóúñÑªº¿⌐¬½¼¡«»",
    "░▒▓│┤╡╢╖╕╣║╗╝╜╛┐",
    "└┴┬├─┼╞╟╚╔╩╦╠═╬╧",
    "╨╤╥╙╘╒╓╫╪┘┌█▄▌▐▀",
    "αßΓπΣσµτΦΘΩδ∞φε∩",
    "≡±≥≤⌠⌡÷≈°∙·√ⁿ²■\u{a0}",
);

pub const CP850_HIGH: &str = concat!(
    "ÇüéâäàåçêëèïîìÄÅ",
    "ÉæÆôöòûùÿÖÜø£Ø×ƒ",
    "áíóúñÑªº¿®¬½¼¡«»",
    "░▒▓│┤ÁÂÀ©╣║╗╝¢¥┐",
    "└┴┬├─┼ãÃ╚╔╩╦╠═╬¤",
    "ðÐÊËÈıÍÎÏ┘┌█▄¦Ì▀",
    "ÓßÔÒõÕµþÞÚÛÙýÝ¯´",
    "\u{ad}±‗¾¶§÷¸°¨·¹³²■\u{a0}",
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_cover_upper_half() {
        assert_eq!(CP437_HIGH.chars().count(), 128);
        assert_eq!(CP850_HIGH.chars().count(), 128);
    }

    #[test]
    fn test_table_positions() {
        // 0x80 and 0xE1 are shared landmarks of both pages
        assert_eq!(CP437_HIGH.chars().next(), Some('Ç'));
        assert_eq!(CP437_HIGH.chars().nth(0xE1 - 0x80), Some('ß'));
        assert_eq!(CP850_HIGH.chars().nth(0xE1 - 0x80), Some('ß'));
        assert_eq!(CP850_HIGH.chars().nth(0x9B - 0x80), Some('ø'));
    }
}
