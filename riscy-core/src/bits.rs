//! Bit-field helpers shared by the instruction decoder and the register models.

/// Returns bits `start..=end` of `word`, shifted down so that bit `start` becomes bit 0.
///
/// `end` may be 31. Panics in debug builds if `start > end` or `end > 31`.
pub fn extract_bits(word: u32, start: u32, end: u32) -> u32 {
    debug_assert!(start <= end && end < 32, "invalid bit range {start}..={end}");
    let width = end - start + 1;
    // Widen so a 32-bit wide field does not overflow the shift.
    let mask = ((1u64 << width) - 1) as u32;
    (word >> start) & mask
}

/// Composes four bytes into a word, `bytes[0]` being the least significant.
pub fn word_from_le_bytes(bytes: [u8; 4]) -> u32 {
    u32::from_le_bytes(bytes)
}

/// Sign-extends `value`, treating bit `sign_bit` as its most significant bit.
///
/// Bits above `sign_bit` are ignored.
pub fn sign_extend(value: u32, sign_bit: u32) -> i32 {
    debug_assert!(sign_bit < 32);
    let shift = 31 - sign_bit;
    ((value << shift) as i32) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_bits() {
        assert_eq!(0b0110011, extract_bits(0x007403B3, 0, 6));
        assert_eq!(7, extract_bits(0x007403B3, 7, 11));
        assert_eq!(8, extract_bits(0x007403B3, 15, 19));
        assert_eq!(1, extract_bits(0x8000_0000, 31, 31));
        assert_eq!(0xFFFF_FFFF, extract_bits(0xFFFF_FFFF, 0, 31));
        assert_eq!(0xFFF, extract_bits(0xFFF0_0000, 20, 31));
        assert_eq!(0, extract_bits(0x7FFF_FFFF, 31, 31));
    }

    #[test]
    fn test_word_from_le_bytes() {
        assert_eq!(0x06800513, word_from_le_bytes([0x13, 0x05, 0x80, 0x06]));
        assert_eq!(0x0000_00FF, word_from_le_bytes([0xFF, 0, 0, 0]));
        assert_eq!(0xFF00_0000, word_from_le_bytes([0, 0, 0, 0xFF]));
    }

    #[test]
    fn test_opcode_of_each_supported_group() {
        // (little-endian bytes, expected opcode)
        let cases: [([u8; 4], u32); 12] = [
            ([0xB3, 0x03, 0x74, 0x00], 0b0110011), // add x7, x8, x7
            ([0x2F, 0xA5, 0x05, 0x10], 0b0101111), // lr.w a0, (a1)
            ([0x13, 0x05, 0x80, 0x06], 0b0010011), // addi a0, zero, 104
            ([0x03, 0xA5, 0x05, 0x00], 0b0000011), // lw a0, 0(a1)
            ([0x67, 0x80, 0x00, 0x00], 0b1100111), // jalr zero, 0(ra)
            ([0x73, 0x00, 0x00, 0x00], 0b1110011), // ecall
            ([0x23, 0x80, 0xA5, 0x00], 0b0100011), // sb a0, 0(a1)
            ([0x63, 0x50, 0x70, 0x06], 0b1100011), // bge zero, t2, 96
            ([0x6F, 0xF0, 0x9F, 0xF9], 0b1101111), // jal zero, -104
            ([0x37, 0x30, 0x64, 0x01], 0b0110111), // lui zero, 0x1643
            ([0x97, 0x02, 0x00, 0x00], 0b0010111), // auipc t0, 0
            ([0x0F, 0x00, 0xF0, 0x0F], 0b0001111), // fence
        ];
        for (bytes, opcode) in cases {
            assert_eq!(opcode, extract_bits(word_from_le_bytes(bytes), 0, 6));
        }
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(-1, sign_extend(0xFFF, 11));
        assert_eq!(2047, sign_extend(0x7FF, 11));
        assert_eq!(-4096, sign_extend(0x1000, 12));
        assert_eq!(-104, sign_extend(0x1F_FF98, 20));
        // Bits above the sign bit do not matter
        assert_eq!(5, sign_extend(0xABC0_0005, 11));
    }
}
