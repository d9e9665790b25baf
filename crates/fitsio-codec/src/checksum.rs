//! FITS CHECKSUM and DATASUM keyword support.
//!
//! Implements the Seaman-Pence ones-complement checksum convention: a 32-bit
//! sum over big-endian 16-bit words that is independent of the order of the
//! 80-byte header records, plus the 16-character ASCII encoding stored in
//! the `CHECKSUM` keyword.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::block::pad_data_blocks;
use crate::error::{Error, Result};
use crate::header::{find_string, serialize_header, Card, Value};

/// Keyword carrying the encoded whole-HDU checksum.
pub const CHECKSUM_KEYWORD: &str = "CHECKSUM";
/// Keyword carrying the decimal data-unit checksum.
pub const DATASUM_KEYWORD: &str = "DATASUM";

const CHECKSUM_PLACEHOLDER: &str = "0000000000000000";

// ---------------------------------------------------------------------------
// Ones-complement 32-bit checksum
// ---------------------------------------------------------------------------

/// Compute the ones-complement 32-bit checksum of `data`.
///
/// `data.len()` must be a multiple of 4. The stream is read as big-endian
/// 16-bit words; the first word of every 4-byte group accumulates into the
/// high half and the second into the low half. Carries are only folded once
/// at the end: a 64-bit accumulator cannot overflow before about 2^47 words.
pub fn checksum(data: &[u8]) -> Result<u32> {
    if data.len() % 4 != 0 {
        return Err(Error::InvalidInput(
            "checksum input length must be a multiple of 4",
        ));
    }

    let mut hi: u64 = 0;
    let mut lo: u64 = 0;
    for group in data.chunks_exact(4) {
        hi += u16::from_be_bytes([group[0], group[1]]) as u64;
        lo += u16::from_be_bytes([group[2], group[3]]) as u64;
    }

    let mut hicarry = hi >> 16;
    let mut locarry = lo >> 16;
    while (hicarry | locarry) != 0 {
        hi = (hi & 0xFFFF) + locarry;
        lo = (lo & 0xFFFF) + hicarry;
        hicarry = hi >> 16;
        locarry = lo >> 16;
    }

    Ok(((hi << 16) | lo) as u32)
}

/// Ones-complement addition of two checksums.
///
/// Any carry out of bit 31 is wrapped back into bit 0.
pub fn combine(a: u32, b: u32) -> u32 {
    let mut sum = a as u64 + b as u64;
    while sum >> 32 != 0 {
        sum = (sum & 0xFFFF_FFFF) + (sum >> 32);
    }
    sum as u32
}

// ---------------------------------------------------------------------------
// ASCII encoding/decoding
// ---------------------------------------------------------------------------

/// ASCII punctuation between digits, upper-case and lower-case letters.
const EXCLUDE: [i32; 13] = [
    0x3a, 0x3b, 0x3c, 0x3d, 0x3e, 0x3f, 0x40, // : ; < = > ? @
    0x5b, 0x5c, 0x5d, 0x5e, 0x5f, 0x60, // [ \ ] ^ _ `
];
const ASCII_OFFSET: i32 = 0x30; // ASCII '0'

/// Returns `true` if `ch` is one of the 13 characters the encoding avoids.
pub fn is_excluded(ch: u8) -> bool {
    EXCLUDE.contains(&(ch as i32))
}

/// Spread one byte over four characters, nudging pairs off punctuation.
///
/// The exclusion scan restarts after any nudge, since moving one pair can
/// land the other character on a different excluded code.
fn encode_byte(byte: u8) -> [i32; 4] {
    let quotient = byte as i32 / 4 + ASCII_OFFSET;
    let remainder = byte as i32 % 4;

    let mut ch = [quotient; 4];
    ch[0] += remainder;

    loop {
        let mut adjusted = false;
        for &ex in &EXCLUDE {
            for jj in (0..4).step_by(2) {
                if ch[jj] == ex || ch[jj + 1] == ex {
                    ch[jj] += 1;
                    ch[jj + 1] -= 1;
                    adjusted = true;
                }
            }
        }
        if !adjusted {
            break;
        }
    }
    ch
}

/// Encode a 32-bit checksum into a 16-character ASCII string.
///
/// If `complement` is true, the bitwise complement of `sum` is encoded.
pub fn encode_checksum(sum: u32, complement: bool) -> [u8; 16] {
    let value = if complement { !sum } else { sum };

    let mut asc = [0u8; 16];
    for (ii, byte) in value.to_be_bytes().into_iter().enumerate() {
        let ch = encode_byte(byte);
        for (jj, &c) in ch.iter().enumerate() {
            asc[4 * jj + ii] = c as u8;
        }
    }

    // Circular right-shift by one position.
    asc.rotate_right(1);
    asc
}

/// Encode a checksum as an owned string.
pub fn encode_checksum_string(sum: u32, complement: bool) -> String {
    encode_checksum(sum, complement)
        .iter()
        .map(|&b| b as char)
        .collect()
}

/// Decode a 16-character ASCII encoded checksum into a 32-bit value.
///
/// If `complement` is true, the complement of the decoded value is returned.
pub fn decode_checksum(ascii: &[u8; 16], complement: bool) -> u32 {
    let mut cbuf = [0i32; 16];
    for (ii, c) in cbuf.iter_mut().enumerate() {
        *c = ascii[(ii + 1) % 16] as i32 - ASCII_OFFSET;
    }

    let mut hi: u32 = 0;
    let mut lo: u32 = 0;
    for quad in cbuf.chunks_exact(4) {
        hi = hi.wrapping_add(((quad[0] << 8) + quad[1]) as u32);
        lo = lo.wrapping_add(((quad[2] << 8) + quad[3]) as u32);
    }

    let mut hicarry = hi >> 16;
    let mut locarry = lo >> 16;
    while hicarry != 0 || locarry != 0 {
        hi = (hi & 0xFFFF) + locarry;
        lo = (lo & 0xFFFF) + hicarry;
        hicarry = hi >> 16;
        locarry = lo >> 16;
    }

    let sum = (hi << 16) + lo;
    if complement {
        !sum
    } else {
        sum
    }
}

// ---------------------------------------------------------------------------
// Computation (write path)
// ---------------------------------------------------------------------------

/// Checksum of a data unit after zero-padding it to whole blocks.
pub fn compute_datasum(data: &[u8]) -> Result<u32> {
    if data.is_empty() {
        return Ok(0);
    }
    let mut padded = Vec::with_capacity(data.len());
    padded.extend_from_slice(data);
    pad_data_blocks(&mut padded);
    checksum(&padded)
}

/// Stamp `CHECKSUM` and `DATASUM` onto a set of header cards.
///
/// Existing checksum keywords are dropped. `DATASUM` and a zero
/// `CHECKSUM` placeholder are appended, the header is serialized and summed,
/// the header and data sums are combined, and the complement of the total
/// is encoded into the placeholder so the finished HDU sums to negative zero.
/// Since the sum does not depend on card order, replacing the placeholder in
/// place leaves the header sum consistent.
pub fn stamp_checksum(cards: &[Card], data: &[u8]) -> Result<Vec<Card>> {
    let mut new_cards: Vec<Card> = cards
        .iter()
        .filter(|c| {
            let kw = c.keyword_str();
            kw != CHECKSUM_KEYWORD && kw != DATASUM_KEYWORD
        })
        .cloned()
        .collect();

    let datasum = compute_datasum(data)?;
    new_cards.push(
        Card::new(DATASUM_KEYWORD, Value::String(datasum.to_string()))
            .with_comment("data unit checksum"),
    );
    new_cards.push(
        Card::new(
            CHECKSUM_KEYWORD,
            Value::String(String::from(CHECKSUM_PLACEHOLDER)),
        )
        .with_comment("HDU checksum"),
    );

    let header_bytes = serialize_header(&new_cards)?;
    let header_sum = checksum(&header_bytes)?;
    let hdu_sum = combine(header_sum, datasum);

    let encoded = encode_checksum_string(hdu_sum, true);
    tracing::debug!(datasum, header_sum, checksum = %encoded, "stamped HDU checksum");

    if let Some(card) = new_cards
        .iter_mut()
        .find(|c| c.keyword_str() == CHECKSUM_KEYWORD)
    {
        card.value = Some(Value::String(encoded));
    }
    Ok(new_cards)
}

// ---------------------------------------------------------------------------
// Verification (read path)
// ---------------------------------------------------------------------------

/// Verify the `DATASUM` keyword against the data unit.
///
/// Returns `true` when no `DATASUM` keyword is present.
pub fn verify_datasum(cards: &[Card], data: &[u8]) -> bool {
    let stored = match find_string(cards, DATASUM_KEYWORD) {
        Some(s) => s,
        None => return true,
    };
    let expected = match stored.trim().parse::<u64>() {
        Ok(v) if v <= u32::MAX as u64 => v as u32,
        _ => return false,
    };
    match compute_datasum(data) {
        Ok(computed) => computed == expected,
        Err(_) => false,
    }
}

/// Verify a whole HDU, given its serialized header and raw data unit.
///
/// A correctly stamped HDU sums to negative zero (`0` or `0xFFFFFFFF`).
pub fn verify_checksum(header_bytes: &[u8], data: &[u8]) -> Result<bool> {
    let header_sum = checksum(header_bytes)?;
    let data_sum = compute_datasum(data)?;
    let total = combine(header_sum, data_sum);
    Ok(total == 0 || total == 0xFFFF_FFFF)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BLOCK_SIZE;
    use alloc::vec;

    fn sample_cards() -> Vec<Card> {
        vec![
            Card::new("SIMPLE", Value::Logical(true)),
            Card::new("BITPIX", Value::Integer(16)),
            Card::new("NAXIS", Value::Integer(2)),
            Card::new("NAXIS1", Value::Integer(20)),
            Card::new("NAXIS2", Value::Integer(10)),
        ]
    }

    // ---- Checksum computation ----

    #[test]
    fn checksum_empty_is_zero() {
        assert_eq!(checksum(&[]).unwrap(), 0);
    }

    #[test]
    fn checksum_four_zero_bytes() {
        assert_eq!(checksum(&[0, 0, 0, 0]).unwrap(), 0);
    }

    #[test]
    fn checksum_four_ff_bytes() {
        assert_eq!(checksum(&[0xFF; 4]).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn checksum_rejects_ragged_length() {
        for len in [1usize, 2, 3, 5, 2879] {
            let data = vec![0u8; len];
            assert!(
                matches!(checksum(&data), Err(Error::InvalidInput(_))),
                "length {len} should be rejected"
            );
        }
    }

    #[test]
    fn checksum_words_are_big_endian() {
        assert_eq!(checksum(&[0x12, 0x34, 0x56, 0x78]).unwrap(), 0x1234_5678);
    }

    #[test]
    fn checksum_carry_wraps_between_halves() {
        // hi = 0xFFFF + 0x0001 carries into lo.
        let data = [0xFF, 0xFF, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00];
        assert_eq!(checksum(&data).unwrap(), 0x0000_0001);
    }

    #[test]
    fn checksum_all_ff_block() {
        let data = vec![0xFFu8; BLOCK_SIZE];
        assert_eq!(checksum(&data).unwrap(), 0xFFFF_FFFF);
    }

    #[test]
    fn checksum_independent_of_card_order() {
        let mut a = vec![b'A'; 80];
        a.extend(vec![b'B'; 80]);
        let mut b = vec![b'B'; 80];
        b.extend(vec![b'A'; 80]);
        assert_eq!(checksum(&a).unwrap(), checksum(&b).unwrap());
    }

    #[test]
    fn checksum_complement_sums_to_negative_zero() {
        let block: Vec<u8> = (0..BLOCK_SIZE).map(|i| (i % 256) as u8).collect();
        let sum = checksum(&block).unwrap();
        let total = combine(sum, !sum);
        assert!(total == 0xFFFF_FFFF || total == 0);
    }

    // ---- Combination ----

    #[test]
    fn combine_identity() {
        assert_eq!(combine(0x1234_5678, 0), 0x1234_5678);
    }

    #[test]
    fn combine_wraps_carry() {
        assert_eq!(combine(0xFFFF_FFFF, 1), 1);
        assert_eq!(combine(0x8000_0000, 0x8000_0000), 1);
    }

    #[test]
    fn combine_is_commutative() {
        let values = [0u32, 1, 0x7FFF_FFFF, 0x8000_0000, 0xDEAD_BEEF, u32::MAX];
        for &a in &values {
            for &b in &values {
                assert_eq!(combine(a, b), combine(b, a));
            }
        }
    }

    // ---- Encoding/Decoding ----

    #[test]
    fn encode_zero() {
        assert_eq!(&encode_checksum(0, false), b"0000000000000000");
    }

    #[test]
    fn encode_complement_of_max() {
        assert_eq!(&encode_checksum(0xFFFF_FFFF, true), b"0000000000000000");
    }

    #[test]
    fn encode_known_value() {
        // cfitsio reference vector.
        let encoded = encode_checksum(1_234_567_890, false);
        assert_eq!(core::str::from_utf8(&encoded).unwrap(), "dCW2fBU0dBU0dBU0");
    }

    #[test]
    fn decode_known_value() {
        assert_eq!(decode_checksum(b"dCW2fBU0dBU0dBU0", false), 1_234_567_890);
    }

    #[test]
    fn encode_decode_roundtrip() {
        let values: &[u32] = &[0, 1, 42, 1_234_567_890, 0xDEAD_BEEF, 0xFFFF_FFFF];
        for &v in values {
            assert_eq!(decode_checksum(&encode_checksum(v, false), false), v);
            assert_eq!(decode_checksum(&encode_checksum(v, true), true), v);
        }
    }

    #[test]
    fn encode_interleaves_then_rotates() {
        // The low byte lands in column 3 and the rotation moves it to 4.
        let encoded = encode_checksum(1, false);
        assert_eq!(&encoded, b"0000100000000000");
    }

    #[test]
    fn every_byte_value_encodes_without_punctuation() {
        // Exhaustive over all byte values: the nudge loop must terminate and
        // leave no excluded character in any position.
        for byte in 0..=255u8 {
            let ch = encode_byte(byte);
            let total: i32 = ch.iter().sum();
            assert_eq!(total - 4 * ASCII_OFFSET, byte as i32, "byte {byte}");
            for &c in &ch {
                assert!(
                    (c as u8).is_ascii_alphanumeric(),
                    "byte {byte} produced {c:#04x}"
                );
            }

            let value = u32::from_be_bytes([byte; 4]);
            for complement in [false, true] {
                let encoded = encode_checksum(value, complement);
                assert!(encoded.iter().all(|&c| !is_excluded(c)));
            }
        }
    }

    // ---- stamp_checksum ----

    #[test]
    fn stamp_produces_valid_checksum() {
        let data = vec![42u8; 400];
        let stamped = stamp_checksum(&sample_cards(), &data).unwrap();

        let datasum = find_string(&stamped, DATASUM_KEYWORD).unwrap();
        let datasum: u64 = datasum.parse().unwrap();
        assert!(datasum <= u32::MAX as u64);

        let encoded = find_string(&stamped, CHECKSUM_KEYWORD).unwrap();
        assert_eq!(encoded.len(), 16);
        assert!(encoded.bytes().all(|c| !is_excluded(c)));

        let header_bytes = serialize_header(&stamped).unwrap();
        assert!(verify_checksum(&header_bytes, &data).unwrap());
        assert!(verify_datasum(&stamped, &data));
    }

    #[test]
    fn stamp_empty_data() {
        let stamped = stamp_checksum(&sample_cards(), &[]).unwrap();
        assert_eq!(find_string(&stamped, DATASUM_KEYWORD), Some("0"));

        let header_bytes = serialize_header(&stamped).unwrap();
        let total = checksum(&header_bytes).unwrap();
        assert!(total == 0 || total == 0xFFFF_FFFF, "got {total:#010X}");
    }

    #[test]
    fn stamp_replaces_existing_keywords() {
        let mut cards = sample_cards();
        cards.push(Card::new(DATASUM_KEYWORD, Value::String(String::from("999"))));
        cards.push(Card::new(
            CHECKSUM_KEYWORD,
            Value::String(String::from("AAAAAAAAAAAAAAAA")),
        ));

        let stamped = stamp_checksum(&cards, &[0u8; 4]).unwrap();
        let count = |kw: &str| stamped.iter().filter(|c| c.keyword_str() == kw).count();
        assert_eq!(count(CHECKSUM_KEYWORD), 1);
        assert_eq!(count(DATASUM_KEYWORD), 1);
    }

    #[test]
    fn stamp_pads_unaligned_data() {
        let data = [1u8, 2, 3];
        let stamped = stamp_checksum(&sample_cards(), &data).unwrap();
        let header_bytes = serialize_header(&stamped).unwrap();
        assert!(verify_checksum(&header_bytes, &data).unwrap());
    }

    #[test]
    fn verify_fails_on_corrupted_data() {
        let mut data = vec![0u8; 100];
        let stamped = stamp_checksum(&sample_cards(), &data).unwrap();
        let header_bytes = serialize_header(&stamped).unwrap();

        data[0] = 0xFF;
        assert!(!verify_datasum(&stamped, &data));
        assert!(!verify_checksum(&header_bytes, &data).unwrap());
    }

    #[test]
    fn verify_datasum_without_keyword() {
        assert!(verify_datasum(&sample_cards(), &[1, 2, 3, 4]));
    }

    #[test]
    fn verify_datasum_rejects_garbage() {
        let mut cards = sample_cards();
        cards.push(Card::new(DATASUM_KEYWORD, Value::String(String::from("abc"))));
        assert!(!verify_datasum(&cards, &[]));
    }
}
