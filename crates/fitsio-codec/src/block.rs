/// FITS block size in bytes (each logical record is one block).
pub const BLOCK_SIZE: usize = 2880;

/// FITS card (keyword record) size in bytes.
pub const CARD_SIZE: usize = 80;

/// Number of cards that fit in a single block.
pub const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

/// Padding byte used for header blocks (ASCII space).
pub const HEADER_PAD_BYTE: u8 = 0x20;

/// Padding byte used for data blocks (zero).
pub const DATA_PAD_BYTE: u8 = 0x00;

/// Returns the number of FITS blocks required to hold `num_bytes` bytes.
pub const fn blocks_needed(num_bytes: usize) -> usize {
    if num_bytes == 0 {
        return 0;
    }
    num_bytes.div_ceil(BLOCK_SIZE)
}

/// Returns the total byte length (in whole blocks) required to hold `num_bytes`.
pub const fn padded_byte_len(num_bytes: usize) -> usize {
    blocks_needed(num_bytes) * BLOCK_SIZE
}

/// Extend `buf` with zero bytes up to the next block boundary.
pub fn pad_data_blocks(buf: &mut alloc::vec::Vec<u8>) {
    let padded = padded_byte_len(buf.len());
    buf.resize(padded, DATA_PAD_BYTE);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn blocks_needed_boundaries() {
        assert_eq!(blocks_needed(0), 0);
        assert_eq!(blocks_needed(1), 1);
        assert_eq!(blocks_needed(BLOCK_SIZE), 1);
        assert_eq!(blocks_needed(BLOCK_SIZE + 1), 2);
    }

    #[test]
    fn padded_len_is_block_multiple() {
        assert_eq!(padded_byte_len(0), 0);
        assert_eq!(padded_byte_len(100), BLOCK_SIZE);
        assert_eq!(padded_byte_len(2 * BLOCK_SIZE), 2 * BLOCK_SIZE);
    }

    #[test]
    fn pad_data_fills_with_zeros() {
        let mut buf = vec![7u8; 10];
        pad_data_blocks(&mut buf);
        assert_eq!(buf.len(), BLOCK_SIZE);
        assert!(buf[10..].iter().all(|&b| b == DATA_PAD_BYTE));
        assert!(buf[..10].iter().all(|&b| b == 7));
    }

    #[test]
    fn cards_per_block() {
        assert_eq!(CARDS_PER_BLOCK, 36);
    }
}
