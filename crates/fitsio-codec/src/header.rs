//! Header records consumed and produced by the codec core.
//!
//! Only the subset of the card model needed to stamp checksums and to
//! describe a tile-compressed image is implemented here; full header parsing
//! lives with the enclosing library.

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::str;

use crate::block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE, HEADER_PAD_BYTE};
use crate::error::{Error, Result};

// ── Types ──

/// A header value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// FITS logical value (`T` or `F`).
    Logical(bool),
    /// FITS integer value.
    Integer(i64),
    /// FITS character string (content between single quotes).
    String(String),
}

/// One 80-byte keyword record.
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// The 8-byte keyword name, ASCII, left-justified, space-padded.
    pub keyword: [u8; 8],
    /// The value, if this card has a value indicator.
    pub value: Option<Value>,
    /// An optional comment string.
    pub comment: Option<String>,
}

impl Card {
    /// Build a valued card. Keywords longer than 8 bytes are truncated.
    pub fn new(keyword: &str, value: Value) -> Self {
        Card {
            keyword: make_keyword(keyword),
            value: Some(value),
            comment: None,
        }
    }

    /// Attach a comment.
    pub fn with_comment(mut self, comment: &str) -> Self {
        self.comment = Some(String::from(comment));
        self
    }

    /// Return the keyword as a trimmed UTF-8 string.
    pub fn keyword_str(&self) -> &str {
        let end = self
            .keyword
            .iter()
            .rposition(|&b| b != b' ')
            .map(|i| i + 1)
            .unwrap_or(0);
        str::from_utf8(&self.keyword[..end]).unwrap_or("")
    }
}

/// Space-pad a keyword name to 8 bytes.
pub fn make_keyword(name: &str) -> [u8; 8] {
    let mut buf = [b' '; 8];
    let bytes = name.as_bytes();
    let len = bytes.len().min(8);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

// ── Lookup ──

/// Find the value of the first card named `keyword`.
pub fn find_value<'a>(cards: &'a [Card], keyword: &str) -> Option<&'a Value> {
    cards
        .iter()
        .find(|c| c.keyword_str() == keyword)
        .and_then(|c| c.value.as_ref())
}

/// Find a string-valued keyword, trimmed of trailing blanks.
pub fn find_string<'a>(cards: &'a [Card], keyword: &str) -> Option<&'a str> {
    match find_value(cards, keyword) {
        Some(Value::String(s)) => Some(s.trim_end()),
        _ => None,
    }
}

/// Find an integer-valued keyword.
pub fn find_integer(cards: &[Card], keyword: &str) -> Option<i64> {
    match find_value(cards, keyword) {
        Some(Value::Integer(n)) => Some(*n),
        _ => None,
    }
}

/// Find an integer keyword that must be present and non-negative.
pub fn require_usize(cards: &[Card], keyword: &'static str) -> Result<usize> {
    let n = find_integer(cards, keyword).ok_or(Error::MissingKeyword(keyword))?;
    usize::try_from(n).map_err(|_| Error::InvalidHeader)
}

/// Find an indexed integer keyword such as `ZNAXIS2`.
pub fn find_indexed_usize(cards: &[Card], prefix: &str, index: usize) -> Option<usize> {
    let keyword = format!("{prefix}{index}");
    find_integer(cards, &keyword).and_then(|n| usize::try_from(n).ok())
}

// ── Writing ──

/// Format a value into the 70-byte value field (columns 11-80).
fn format_value(value: &Value) -> [u8; 70] {
    let mut buf = [b' '; 70];
    match value {
        Value::Logical(b) => {
            // Fixed format: logical in column 30.
            buf[19] = if *b { b'T' } else { b'F' };
        }
        Value::Integer(n) => {
            let s = format!("{n}");
            let len = s.len().min(20);
            buf[20 - len..20].copy_from_slice(&s.as_bytes()[..len]);
        }
        Value::String(s) => write_string(s, &mut buf),
    }
    buf
}

fn write_string(s: &str, buf: &mut [u8; 70]) {
    let mut pos = 1;
    buf[0] = b'\'';
    for ch in s.bytes() {
        if pos >= 69 {
            break;
        }
        if ch == b'\'' {
            if pos + 1 >= 69 {
                break;
            }
            buf[pos] = b'\'';
            buf[pos + 1] = b'\'';
            pos += 2;
        } else {
            buf[pos] = ch;
            pos += 1;
        }
    }
    // Strings are padded to at least 8 characters.
    while pos < 9 {
        buf[pos] = b' ';
        pos += 1;
    }
    buf[pos] = b'\'';
}

/// End of the value content inside a formatted value field.
fn value_content_end(field: &[u8; 70]) -> usize {
    if field[0] != b'\'' {
        return 20;
    }
    let mut i = 1;
    while i < 70 {
        if field[i] == b'\'' {
            if i + 1 < 70 && field[i + 1] == b'\'' {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    70
}

fn valid_keyword(keyword: &[u8; 8]) -> bool {
    keyword.iter().all(|&b| {
        b.is_ascii_uppercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b' ')
    })
}

/// Serialize a [`Card`] into an 80-byte card image.
pub fn format_card(card: &Card) -> Result<[u8; CARD_SIZE]> {
    if !valid_keyword(&card.keyword) {
        return Err(Error::InvalidKeyword);
    }
    let mut buf = [b' '; CARD_SIZE];
    buf[..8].copy_from_slice(&card.keyword);

    match &card.value {
        Some(value) => {
            buf[8] = b'=';
            let mut field = format_value(value);
            if let Some(comment) = &card.comment {
                let sep = value_content_end(&field) + 1;
                if sep + 3 < 70 {
                    field[sep] = b'/';
                    let start = sep + 2;
                    let bytes = comment.as_bytes();
                    let len = bytes.len().min(70 - start);
                    field[start..start + len].copy_from_slice(&bytes[..len]);
                }
            }
            buf[10..].copy_from_slice(&field);
        }
        None => {
            if let Some(comment) = &card.comment {
                let bytes = comment.as_bytes();
                let len = bytes.len().min(72);
                buf[8..8 + len].copy_from_slice(&bytes[..len]);
            }
        }
    }
    Ok(buf)
}

/// Serialize header cards into complete header blocks.
///
/// Appends the END card and pads the final block with blanks, so the result
/// is always a multiple of [`BLOCK_SIZE`].
pub fn serialize_header(cards: &[Card]) -> Result<Vec<u8>> {
    let total_cards = cards.len() + 1;
    let total_blocks = total_cards.div_ceil(CARDS_PER_BLOCK);
    let mut buf = vec![HEADER_PAD_BYTE; total_blocks * BLOCK_SIZE];

    for (i, card) in cards.iter().enumerate() {
        let offset = i * CARD_SIZE;
        buf[offset..offset + CARD_SIZE].copy_from_slice(&format_card(card)?);
    }
    let end = cards.len() * CARD_SIZE;
    buf[end..end + 3].copy_from_slice(b"END");
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_str_trims() {
        let card = Card::new("ZIMAGE", Value::Logical(true));
        assert_eq!(card.keyword_str(), "ZIMAGE");
    }

    #[test]
    fn logical_in_column_30() {
        let card = Card::new("ZIMAGE", Value::Logical(true));
        let image = format_card(&card).unwrap();
        assert_eq!(&image[..10], b"ZIMAGE  = ");
        assert_eq!(image[29], b'T');
    }

    #[test]
    fn integer_right_justified() {
        let card = Card::new("ZNAXIS1", Value::Integer(-42));
        let image = format_card(&card).unwrap();
        assert_eq!(&image[27..30], b"-42");
        assert_eq!(image[26], b' ');
    }

    #[test]
    fn string_padded_to_eight() {
        let card = Card::new("ZCMPTYPE", Value::String(String::from("RICE_1")));
        let image = format_card(&card).unwrap();
        assert_eq!(&image[10..20], b"'RICE_1  '");
    }

    #[test]
    fn string_quotes_escaped() {
        let card = Card::new("OBJECT", Value::String(String::from("O'Neil")));
        let image = format_card(&card).unwrap();
        assert_eq!(&image[10..20], b"'O''Neil '");
    }

    #[test]
    fn comment_follows_value() {
        let card = Card::new("DATASUM", Value::String(String::from("0"))).with_comment("data");
        let image = format_card(&card).unwrap();
        let text = str::from_utf8(&image).unwrap();
        assert!(text.contains("'0       ' / data"), "{text}");
    }

    #[test]
    fn lowercase_keyword_rejected() {
        let card = Card::new("bad", Value::Integer(1));
        assert!(matches!(format_card(&card), Err(Error::InvalidKeyword)));
    }

    #[test]
    fn serialize_appends_end_and_pads() {
        let cards = vec![Card::new("SIMPLE", Value::Logical(true))];
        let bytes = serialize_header(&cards).unwrap();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        assert_eq!(&bytes[80..83], b"END");
        assert!(bytes[83..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn serialize_full_block_spills() {
        let cards: Vec<Card> = (0..CARDS_PER_BLOCK)
            .map(|i| Card::new(&format!("KEY{i}"), Value::Integer(i as i64)))
            .collect();
        let bytes = serialize_header(&cards).unwrap();
        assert_eq!(bytes.len(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn lookup_helpers() {
        let cards = vec![
            Card::new("ZCMPTYPE", Value::String(String::from("GZIP_1  "))),
            Card::new("ZNAXIS1", Value::Integer(100)),
            Card::new("ZNAXIS2", Value::Integer(-1)),
        ];
        assert_eq!(find_string(&cards, "ZCMPTYPE"), Some("GZIP_1"));
        assert_eq!(find_integer(&cards, "ZNAXIS1"), Some(100));
        assert_eq!(find_indexed_usize(&cards, "ZNAXIS", 1), Some(100));
        assert_eq!(find_indexed_usize(&cards, "ZNAXIS", 2), None);
        assert!(matches!(
            require_usize(&cards, "ZBITPIX"),
            Err(Error::MissingKeyword("ZBITPIX"))
        ));
        assert!(matches!(
            require_usize(&cards, "ZNAXIS2"),
            Err(Error::InvalidHeader)
        ));
    }
}
