//! Tile-compressed image data units.
//!
//! A compressed image is stored as a binary table with one row per tile.
//! Each row holds three variable-length array descriptors, one per
//! representation (`COMPRESSED_DATA`, `GZIP_COMPRESSED_DATA`,
//! `UNCOMPRESSED_DATA`); exactly one is non-empty and points into the heap
//! that follows the rows. The image shape, tiling and algorithm parameters
//! travel in `Z*` keywords.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::OnceCell;

use crate::block::pad_data_blocks;
use crate::checksum::stamp_checksum;
use crate::compress::{CompressOptions, CompressionAlgorithm, QuantizeAlgorithm, BYTEPIX};
use crate::error::{Error, Result};
use crate::header::{
    find_indexed_usize, find_integer, find_string, find_value, require_usize, serialize_header,
    Card, Value,
};
use crate::image::{ElementType, ImageBuffer, ImageData};
use crate::tile::{TileCompressionType, TileRecord};
use crate::tiled::{resolve_tile_axes, CompressedImage, TiledImageEngine};

/// Bytes in a 32-bit (`P`) array descriptor.
const P_DESCRIPTOR: usize = 8;
/// Bytes in a 64-bit (`Q`) array descriptor.
const Q_DESCRIPTOR: usize = 16;

/// A tile-compressed image data unit.
///
/// Built either by compressing an image or from an existing header and table.
/// The decompressed image is produced on first access and cached.
#[derive(Debug)]
pub struct CompressedImageData {
    options: CompressOptions,
    image: CompressedImage,
    threads: Option<usize>,
    uncompressed: OnceCell<ImageBuffer>,
}

impl CompressedImageData {
    /// Compress `image` with `options`, tiled by `tile_axes` (full rows when
    /// `None`).
    pub fn compress(
        image: &ImageBuffer,
        options: CompressOptions,
        tile_axes: Option<&[usize]>,
    ) -> Result<Self> {
        let element = image.element_type();
        let mut options = options;
        // RICE_1 readers expect BYTEPIX; record the pixel width it was run with.
        if options.algorithm() == CompressionAlgorithm::Rice1
            && options.param(BYTEPIX).is_none()
            && options.algorithm().codec().supports(element)
        {
            options = options.with_param(BYTEPIX, element.size() as i64);
        }

        let mut engine = TiledImageEngine::new(options.clone());
        if let Some(axes) = tile_axes {
            engine = engine.with_tile_axes(axes);
        }
        let compressed = engine.compress(image)?;
        tracing::debug!(
            algorithm = options.algorithm().name(),
            tiles = compressed.tile_count(),
            heap = compressed.buffer.len(),
            "compressed image data unit"
        );
        Ok(CompressedImageData {
            options,
            image: compressed,
            threads: None,
            uncompressed: OnceCell::new(),
        })
    }

    /// Ingest typed pixels and compress them with full-row tiles.
    pub fn from_image_data(
        data: &ImageData,
        axes: &[usize],
        options: CompressOptions,
    ) -> Result<Self> {
        let image = ImageBuffer::from_image_data(data, axes)?;
        Self::compress(&image, options, None)
    }

    /// Cap the worker pool used for decompression.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    pub fn element_type(&self) -> ElementType {
        self.image.element
    }

    pub fn axes(&self) -> &[usize] {
        &self.image.axes
    }

    pub fn tile_axes(&self) -> &[usize] {
        &self.image.tile_axes
    }

    pub fn tiles(&self) -> &[TileRecord] {
        &self.image.tiles
    }

    /// The heap holding every tile's bytes.
    pub fn heap(&self) -> &[u8] {
        &self.image.buffer
    }

    /// The decompressed image, decoded on first call.
    pub fn uncompressed(&self) -> Result<&ImageBuffer> {
        if let Some(image) = self.uncompressed.get() {
            return Ok(image);
        }
        let mut engine = TiledImageEngine::new(self.options.clone());
        if let Some(threads) = self.threads {
            engine = engine.with_threads(threads);
        }
        let image = engine.decompress(&self.image)?;
        Ok(self.uncompressed.get_or_init(|| image))
    }

    /// Typed pixels of the decompressed image.
    pub fn to_image_data(&self) -> Result<ImageData> {
        Ok(self.uncompressed()?.to_image_data())
    }

    // ── Header ──

    /// Header cards describing the table and the compressed image.
    pub fn header_cards(&self) -> Vec<Card> {
        let image = &self.image;
        let descriptor = descriptor_for_heap(image.buffer.len());
        let tform = if descriptor == Q_DESCRIPTOR { "1QB" } else { "1PB" };
        let mut cards = Vec::new();
        cards.push(
            Card::new("XTENSION", Value::String(String::from("BINTABLE")))
                .with_comment("binary table extension"),
        );
        cards.push(Card::new("BITPIX", Value::Integer(8)));
        cards.push(Card::new("NAXIS", Value::Integer(2)));
        cards.push(
            Card::new("NAXIS1", Value::Integer(row_width(descriptor) as i64))
                .with_comment("width of table in bytes"),
        );
        cards.push(
            Card::new("NAXIS2", Value::Integer(image.tiles.len() as i64))
                .with_comment("number of tiles"),
        );
        cards.push(Card::new("PCOUNT", Value::Integer(image.buffer.len() as i64)));
        cards.push(Card::new("GCOUNT", Value::Integer(1)));
        cards.push(Card::new(
            "TFIELDS",
            Value::Integer(TileCompressionType::ALL.len() as i64),
        ));
        for (i, kind) in TileCompressionType::ALL.iter().enumerate() {
            cards.push(Card::new(
                &format!("TTYPE{}", i + 1),
                Value::String(String::from(kind.column_name())),
            ));
            cards.push(Card::new(
                &format!("TFORM{}", i + 1),
                Value::String(String::from(tform)),
            ));
        }

        cards.push(
            Card::new("ZIMAGE", Value::Logical(true)).with_comment("tile-compressed image"),
        );
        cards.push(Card::new("ZBITPIX", Value::Integer(image.element.bitpix())));
        cards.push(Card::new("ZNAXIS", Value::Integer(image.axes.len() as i64)));
        for (i, &len) in image.axes.iter().enumerate() {
            cards.push(Card::new(&format!("ZNAXIS{}", i + 1), Value::Integer(len as i64)));
        }
        for (i, &len) in image.tile_axes.iter().enumerate() {
            cards.push(Card::new(&format!("ZTILE{}", i + 1), Value::Integer(len as i64)));
        }
        cards.push(
            Card::new(
                "ZCMPTYPE",
                Value::String(String::from(self.options.algorithm().name())),
            )
            .with_comment("compression algorithm"),
        );
        if let Some(quantize) = self.options.quantize() {
            cards.push(Card::new(
                "ZQUANTIZ",
                Value::String(String::from(quantize.name())),
            ));
        }
        for (i, (name, value)) in self.options.params().enumerate() {
            cards.push(Card::new(
                &format!("ZNAME{}", i + 1),
                Value::String(String::from(name)),
            ));
            cards.push(Card::new(&format!("ZVAL{}", i + 1), Value::Integer(value)));
        }
        cards
    }

    /// Table rows followed by the heap.
    ///
    /// Descriptors are 32-bit (`1PB`) unless the heap outgrows them, in which
    /// case every column switches to 64-bit (`1QB`).
    pub fn table_bytes(&self) -> Result<Vec<u8>> {
        let image = &self.image;
        let descriptor = descriptor_for_heap(image.buffer.len());
        let mut out =
            Vec::with_capacity(image.tiles.len() * row_width(descriptor) + image.buffer.len());
        for record in &image.tiles {
            for kind in TileCompressionType::ALL {
                let (len, offset) = if record.compression_type == kind {
                    (record.len, record.offset)
                } else {
                    (0, 0)
                };
                write_descriptor(&mut out, descriptor, len, offset)?;
            }
        }
        out.extend_from_slice(&image.buffer);
        Ok(out)
    }

    /// Serialize the whole data unit: checksummed header blocks followed by
    /// the zero-padded table and heap.
    pub fn write_hdu(&self) -> Result<Vec<u8>> {
        let mut data = self.table_bytes()?;
        pad_data_blocks(&mut data);
        let cards = stamp_checksum(&self.header_cards(), &data)?;
        let mut out = serialize_header(&cards)?;
        out.extend_from_slice(&data);
        Ok(out)
    }

    /// Rebuild from header cards and the data unit (rows then heap).
    ///
    /// Nothing is decompressed until [`uncompressed`](Self::uncompressed)
    /// is called.
    pub fn from_header(cards: &[Card], table: &[u8]) -> Result<Self> {
        if find_value(cards, "ZIMAGE") != Some(&Value::Logical(true)) {
            return Err(Error::InvalidHeader);
        }
        let bitpix = find_integer(cards, "ZBITPIX").ok_or(Error::MissingKeyword("ZBITPIX"))?;
        let element = ElementType::from_bitpix(bitpix)?;

        let naxis = require_usize(cards, "ZNAXIS")?;
        let axes = (1..=naxis)
            .map(|i| find_indexed_usize(cards, "ZNAXIS", i).ok_or(Error::MissingKeyword("ZNAXISn")))
            .collect::<Result<Vec<_>>>()?;
        // The decoded image must be addressable as one byte buffer.
        axes.iter()
            .try_fold(element.size(), |acc, &len| acc.checked_mul(len))
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or(Error::InvalidHeader)?;
        let requested: Vec<usize> = (1..=naxis)
            .map_while(|i| find_indexed_usize(cards, "ZTILE", i))
            .collect();
        let tile_axes = resolve_tile_axes(&axes, Some(&requested))?;

        let name = find_string(cards, "ZCMPTYPE").ok_or(Error::MissingKeyword("ZCMPTYPE"))?;
        let mut options = CompressOptions::new(CompressionAlgorithm::from_name(name)?);
        let mut i = 1;
        while let Some(param) = find_string(cards, &format!("ZNAME{i}")) {
            let value = find_integer(cards, &format!("ZVAL{i}")).ok_or(Error::InvalidHeader)?;
            options = options.with_param(param.trim(), value);
            i += 1;
        }
        if let Some(quantize) = find_string(cards, "ZQUANTIZ") {
            options = options.with_quantize(QuantizeAlgorithm::from_name(quantize)?);
        }
        options.require_lossless()?;

        let tiles = read_descriptors(cards, table)?;
        let heap_start = match find_integer(cards, "THEAP") {
            Some(n) => usize::try_from(n).map_err(|_| Error::InvalidHeader)?,
            None => require_usize(cards, "NAXIS1")?
                .checked_mul(tiles.len())
                .ok_or(Error::InvalidHeader)?,
        };
        let heap = table.get(heap_start..).ok_or(Error::UnexpectedEof)?;
        let heap_len = match find_integer(cards, "PCOUNT") {
            Some(n) => usize::try_from(n).map_err(|_| Error::InvalidHeader)?.min(heap.len()),
            None => heap.len(),
        };

        tracing::debug!(
            algorithm = options.algorithm().name(),
            tiles = tiles.len(),
            "read compressed image header"
        );
        Ok(CompressedImageData {
            options,
            image: CompressedImage {
                element,
                axes,
                tile_axes,
                tiles,
                buffer: heap[..heap_len].to_vec(),
            },
            threads: None,
            uncompressed: OnceCell::new(),
        })
    }
}

/// Descriptor width able to address every byte of a heap of `heap_len`.
fn descriptor_for_heap(heap_len: usize) -> usize {
    if heap_len > i32::MAX as usize {
        Q_DESCRIPTOR
    } else {
        P_DESCRIPTOR
    }
}

fn row_width(descriptor: usize) -> usize {
    TileCompressionType::ALL.len() * descriptor
}

fn write_descriptor(out: &mut Vec<u8>, width: usize, len: usize, offset: usize) -> Result<()> {
    if width == Q_DESCRIPTOR {
        let len = i64::try_from(len).map_err(|_| Error::InvalidInput("tile too large"))?;
        let offset = i64::try_from(offset).map_err(|_| Error::InvalidInput("heap too large"))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
    } else {
        let len = i32::try_from(len).map_err(|_| Error::InvalidInput("tile too large"))?;
        let offset = i32::try_from(offset).map_err(|_| Error::InvalidInput("heap too large"))?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&offset.to_be_bytes());
    }
    Ok(())
}

fn descriptor_width(tform: &str) -> Result<usize> {
    let kind = tform.trim().trim_start_matches(|c: char| c.is_ascii_digit());
    match kind.as_bytes().first() {
        Some(b'P') => Ok(P_DESCRIPTOR),
        Some(b'Q') => Ok(Q_DESCRIPTOR),
        _ => Err(Error::InvalidHeader),
    }
}

/// Locate the representation columns and read one record per row.
fn read_descriptors(cards: &[Card], table: &[u8]) -> Result<Vec<TileRecord>> {
    let tfields = require_usize(cards, "TFIELDS")?;
    let row_len = require_usize(cards, "NAXIS1")?;
    let rows = require_usize(cards, "NAXIS2")?;

    // (type, byte offset in row, descriptor width)
    let mut columns = Vec::new();
    let mut offset = 0usize;
    for i in 1..=tfields {
        let tform = find_string(cards, &format!("TFORM{i}")).ok_or(Error::MissingKeyword("TFORMn"))?;
        let width = descriptor_width(tform)?;
        let ttype = find_string(cards, &format!("TTYPE{i}")).unwrap_or("");
        if let Some(kind) = TileCompressionType::ALL
            .into_iter()
            .find(|k| k.column_name() == ttype.trim())
        {
            columns.push((kind, offset, width));
        }
        offset += width;
    }
    if offset > row_len || columns.is_empty() {
        return Err(Error::InvalidHeader);
    }
    let rows_len = row_len.checked_mul(rows).ok_or(Error::InvalidHeader)?;
    if table.len() < rows_len {
        return Err(Error::UnexpectedEof);
    }

    let mut tiles = Vec::with_capacity(rows);
    for row in table[..rows_len].chunks_exact(row_len) {
        let record = columns
            .iter()
            .map(|&(kind, at, width)| {
                let (len, offset) = read_descriptor(&row[at..at + width]);
                (kind, len, offset)
            })
            .find(|&(_, len, _)| len > 0)
            .ok_or(Error::InvalidHeader)?;
        tiles.push(TileRecord {
            compression_type: record.0,
            len: usize::try_from(record.1).map_err(|_| Error::InvalidHeader)?,
            offset: usize::try_from(record.2).map_err(|_| Error::InvalidHeader)?,
        });
    }
    Ok(tiles)
}

fn read_descriptor(bytes: &[u8]) -> (i64, i64) {
    if bytes.len() == Q_DESCRIPTOR {
        let mut len = [0u8; 8];
        let mut offset = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        offset.copy_from_slice(&bytes[8..]);
        (i64::from_be_bytes(len), i64::from_be_bytes(offset))
    } else {
        let len = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let offset = i32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        (len as i64, offset as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BLOCK_SIZE, CARD_SIZE};
    use crate::checksum::verify_checksum;
    use crate::compress::BLOCKSIZE;
    use alloc::vec;

    fn smooth_i32(width: usize, height: usize) -> ImageData {
        ImageData::I32(
            (0..width * height)
                .map(|i| 1000 + (i % width) as i32 * 2 - (i / width) as i32)
                .collect(),
        )
    }

    fn rice_data() -> CompressedImageData {
        CompressedImageData::from_image_data(
            &smooth_i32(30, 5),
            &[30, 5],
            CompressOptions::new(CompressionAlgorithm::Rice1),
        )
        .unwrap()
    }

    #[test]
    fn rice_records_bytepix() {
        let data = rice_data();
        assert_eq!(data.options().param(BYTEPIX), Some(4));
        assert_eq!(data.options().param(BLOCKSIZE), Some(32));
        assert_eq!(data.tile_axes(), &[30, 1]);
        assert_eq!(data.tiles().len(), 5);
    }

    #[test]
    fn header_describes_table_and_image() {
        let data = rice_data();
        let cards = data.header_cards();
        assert_eq!(find_string(&cards, "XTENSION"), Some("BINTABLE"));
        assert_eq!(find_integer(&cards, "NAXIS1"), Some(24));
        assert_eq!(find_integer(&cards, "NAXIS2"), Some(5));
        assert_eq!(find_integer(&cards, "PCOUNT"), Some(data.heap().len() as i64));
        assert_eq!(find_string(&cards, "TTYPE2"), Some("GZIP_COMPRESSED_DATA"));
        assert_eq!(find_integer(&cards, "ZBITPIX"), Some(32));
        assert_eq!(find_integer(&cards, "ZNAXIS2"), Some(5));
        assert_eq!(find_integer(&cards, "ZTILE1"), Some(30));
        assert_eq!(find_string(&cards, "ZCMPTYPE"), Some("RICE_1"));
        assert_eq!(find_string(&cards, "ZNAME1"), Some("BLOCKSIZE"));
        assert_eq!(find_integer(&cards, "ZVAL2"), Some(4));
    }

    #[test]
    fn descriptors_point_into_heap() {
        let data = rice_data();
        let table = data.table_bytes().unwrap();
        assert_eq!(table.len(), 5 * 24 + data.heap().len());
        let first = &table[..24];
        let len = i32::from_be_bytes(first[..4].try_into().unwrap());
        let offset = i32::from_be_bytes(first[4..8].try_into().unwrap());
        assert_eq!(len as usize, data.tiles()[0].len);
        assert_eq!(offset, 0);
        assert!(first[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn header_roundtrip_then_lazy_decompress() {
        let original = rice_data();
        let table = original.table_bytes().unwrap();
        let restored = CompressedImageData::from_header(&original.header_cards(), &table).unwrap();
        assert_eq!(restored.tiles(), original.tiles());
        assert_eq!(restored.options(), original.options());
        assert!(restored.uncompressed.get().is_none());

        let first = restored.uncompressed().unwrap();
        let second = restored.uncompressed().unwrap();
        assert!(core::ptr::eq(first, second));
        assert_eq!(restored.to_image_data().unwrap(), smooth_i32(30, 5));
    }

    #[test]
    fn mixed_representations_survive_header() {
        let data: Vec<f64> = (0..40).map(|i| if i < 20 { 0.0 } else { i as f64 * 1.37e9 }).collect();
        let image = ImageBuffer::from_image_data(&ImageData::F64(data.clone()), &[4, 10]).unwrap();
        let written = CompressedImageData::compress(
            &image,
            CompressOptions::new(CompressionAlgorithm::Rice1),
            Some(&[4, 5]),
        )
        .unwrap();
        assert_eq!(written.options().param(BYTEPIX), None);
        let table = written.table_bytes().unwrap();
        let read = CompressedImageData::from_header(&written.header_cards(), &table).unwrap();
        assert_eq!(read.tiles(), written.tiles());
        assert_eq!(read.to_image_data().unwrap(), ImageData::F64(data));
    }

    #[test]
    fn missing_blocksize_defaults_on_read() {
        let data = rice_data();
        let cards: Vec<Card> = data
            .header_cards()
            .into_iter()
            .filter(|c| !matches!(c.keyword_str(), "ZNAME1" | "ZVAL1"))
            .map(|mut c| {
                if c.keyword_str() == "ZNAME2" {
                    c.keyword = crate::header::make_keyword("ZNAME1");
                } else if c.keyword_str() == "ZVAL2" {
                    c.keyword = crate::header::make_keyword("ZVAL1");
                }
                c
            })
            .collect();
        let table = data.table_bytes().unwrap();
        let read = CompressedImageData::from_header(&cards, &table).unwrap();
        assert_eq!(read.options().param(BLOCKSIZE), Some(32));
        assert_eq!(read.to_image_data().unwrap(), smooth_i32(30, 5));
    }

    #[test]
    fn non_image_table_rejected() {
        let cards = vec![Card::new("XTENSION", Value::String(String::from("BINTABLE")))];
        assert!(matches!(
            CompressedImageData::from_header(&cards, &[]),
            Err(Error::InvalidHeader)
        ));
    }

    #[test]
    fn truncated_table_rejected() {
        let data = rice_data();
        let table = data.table_bytes().unwrap();
        assert!(matches!(
            CompressedImageData::from_header(&data.header_cards(), &table[..50]),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn oversized_image_axes_rejected() {
        let data = CompressedImageData::from_image_data(
            &ImageData::U8(vec![7; 4]),
            &[2, 2],
            CompressOptions::new(CompressionAlgorithm::Gzip1),
        )
        .unwrap();
        let table = data.table_bytes().unwrap();
        let cards: Vec<Card> = data
            .header_cards()
            .into_iter()
            .map(|c| match c.keyword_str() {
                "ZNAXIS1" | "ZNAXIS2" => Card::new(c.keyword_str(), Value::Integer(1 << 40)),
                _ => c,
            })
            .collect();
        assert!(matches!(
            CompressedImageData::from_header(&cards, &table),
            Err(Error::InvalidHeader)
        ));
    }

    #[test]
    fn quantized_table_rejected_on_read() {
        let data = rice_data();
        let mut cards = data.header_cards();
        cards.push(Card::new(
            "ZQUANTIZ",
            Value::String(String::from("SUBTRACTIVE_DITHER_1")),
        ));
        let err = CompressedImageData::from_header(&cards, &data.table_bytes().unwrap())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedConfiguration(ref m) if m.contains("SUBTRACTIVE_DITHER_1")
        ));
    }

    #[test]
    fn lossless_header_has_no_zquantiz() {
        assert!(find_value(&rice_data().header_cards(), "ZQUANTIZ").is_none());
    }

    #[test]
    fn descriptor_width_follows_heap_size() {
        assert_eq!(descriptor_for_heap(0), P_DESCRIPTOR);
        assert_eq!(descriptor_for_heap(i32::MAX as usize), P_DESCRIPTOR);
        assert_eq!(descriptor_for_heap(i32::MAX as usize + 1), Q_DESCRIPTOR);
        assert_eq!(row_width(Q_DESCRIPTOR), 48);
    }

    #[test]
    fn wide_offsets_need_64_bit_descriptors() {
        let far = i32::MAX as usize + 1;
        let mut narrow = Vec::new();
        assert!(matches!(
            write_descriptor(&mut narrow, P_DESCRIPTOR, 10, far),
            Err(Error::InvalidInput(_))
        ));

        let mut wide = Vec::new();
        write_descriptor(&mut wide, Q_DESCRIPTOR, 10, far).unwrap();
        assert_eq!(wide.len(), Q_DESCRIPTOR);
        assert_eq!(read_descriptor(&wide), (10, far as i64));
    }

    #[test]
    fn written_hdu_verifies() {
        let data = rice_data();
        let hdu = data.write_hdu().unwrap();
        assert_eq!(hdu.len() % BLOCK_SIZE, 0);
        let end = hdu
            .chunks(CARD_SIZE)
            .position(|card| &card[..8] == b"END     ")
            .unwrap();
        let header_len = ((end + 1) * CARD_SIZE).div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        assert!(verify_checksum(&hdu[..header_len], &hdu[header_len..]).unwrap());
    }
}
