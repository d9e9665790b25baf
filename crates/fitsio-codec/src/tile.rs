//! Tiles: views into the image, per-tile representation tags, and the
//! schedulable compress/decompress operations bound to a single tile.

use alloc::borrow::Cow;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::compress::gzip::{gzip_compress, gzip_decompress};
use crate::compress::{CompressOptions, TileCodec};
use crate::error::{Error, Result};
use crate::image::ElementType;

// ---------------------------------------------------------------------------
// Tile buffer
// ---------------------------------------------------------------------------

/// A rectangular region of a larger image, described by offsets only.
///
/// `data_offset` is the element index of the tile's first pixel and
/// `image_width` the full row length, so rows of a tile narrower than the
/// image are found by striding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileBuffer {
    pub data_offset: usize,
    pub image_width: usize,
    pub width: usize,
    pub height: usize,
    pub element_size: usize,
}

impl TileBuffer {
    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    pub fn byte_len(&self) -> usize {
        self.pixel_count() * self.element_size
    }

    /// True when the tile's rows are adjacent in the image.
    pub fn is_contiguous(&self) -> bool {
        self.width == self.image_width || self.height <= 1
    }

    /// Byte range of row `row` within the image.
    fn row_range(&self, row: usize) -> core::ops::Range<usize> {
        let start = (self.data_offset + row * self.image_width) * self.element_size;
        start..start + self.width * self.element_size
    }

    /// Borrow each tile row from the image without copying.
    pub fn rows<'a>(&self, image: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        let tile = *self;
        (0..tile.height).map(move |row| &image[tile.row_range(row)])
    }

    /// The tile's pixels as one contiguous run; borrowed when the rows are
    /// already adjacent.
    pub fn gather<'a>(&self, image: &'a [u8]) -> Cow<'a, [u8]> {
        if self.is_contiguous() {
            let start = self.data_offset * self.element_size;
            return Cow::Borrowed(&image[start..start + self.byte_len()]);
        }
        let mut out = Vec::with_capacity(self.byte_len());
        for row in self.rows(image) {
            out.extend_from_slice(row);
        }
        Cow::Owned(out)
    }

    /// Write contiguous tile pixels back into their rows of the image.
    pub fn scatter(&self, pixels: &[u8], image: &mut [u8]) {
        let row_bytes = self.width * self.element_size;
        for (row, src) in pixels.chunks_exact(row_bytes).enumerate() {
            image[self.row_range(row)].copy_from_slice(src);
        }
    }
}

// ---------------------------------------------------------------------------
// Per-tile representation
// ---------------------------------------------------------------------------

/// Which representation a tile's bytes are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileCompressionType {
    /// Produced by the configured algorithm.
    Compressed,
    /// Produced by the GZIP_1 fallback.
    GzipCompressed,
    /// Raw big-endian pixels.
    Uncompressed,
}

impl TileCompressionType {
    /// Table column holding tiles of this type.
    pub fn column_name(self) -> &'static str {
        match self {
            TileCompressionType::Compressed => "COMPRESSED_DATA",
            TileCompressionType::GzipCompressed => "GZIP_COMPRESSED_DATA",
            TileCompressionType::Uncompressed => "UNCOMPRESSED_DATA",
        }
    }

    pub const ALL: [TileCompressionType; 3] = [
        TileCompressionType::Compressed,
        TileCompressionType::GzipCompressed,
        TileCompressionType::Uncompressed,
    ];
}

/// Location and representation of one tile's bytes in the compressed heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRecord {
    pub compression_type: TileCompressionType,
    pub offset: usize,
    pub len: usize,
}

// ---------------------------------------------------------------------------
// Tile operations
// ---------------------------------------------------------------------------

/// Lifecycle of a tile operation.
#[derive(Debug)]
pub enum TileState {
    Pending,
    Configured,
    Running,
    Done,
    Failed(Error),
}

impl TileState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TileState::Done | TileState::Failed(_))
    }
}

impl fmt::Display for TileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TileState::Pending => write!(f, "pending"),
            TileState::Configured => write!(f, "configured"),
            TileState::Running => write!(f, "running"),
            TileState::Done => write!(f, "done"),
            TileState::Failed(e) => write!(f, "failed: {e}"),
        }
    }
}

/// One schedulable unit of tile work.
pub trait TileTask: Send {
    fn tile_index(&self) -> usize;

    fn state(&self) -> &TileState;

    /// Run to completion, recording the outcome in the state.
    fn run(&mut self);

    /// Take the captured failure, wrapped with this tile's index.
    fn take_failure(&mut self) -> Option<Error>;
}

fn unbound() -> Error {
    Error::unsupported("tile options not bound")
}

fn take_failed(state: &mut TileState, tile: usize) -> Option<Error> {
    if !matches!(state, TileState::Failed(_)) {
        return None;
    }
    match core::mem::replace(state, TileState::Done) {
        TileState::Failed(source) => Some(Error::TileCompressionFailure {
            tile,
            source: Box::new(source),
        }),
        _ => None,
    }
}

/// Compress one tile into its own region of the shared output buffer.
pub struct CompressTileOperation<'a> {
    tile_index: usize,
    tile: TileBuffer,
    element: ElementType,
    codec: Arc<dyn TileCodec>,
    tile_options: Option<CompressOptions>,
    image: &'a [u8],
    region: &'a mut [u8],
    compressed_offset: usize,
    compressed_len: usize,
    compression_type: TileCompressionType,
    state: TileState,
}

impl<'a> CompressTileOperation<'a> {
    /// A pending operation. `region` is the tile's exclusive slice of the
    /// output buffer, at `compressed_offset`, sized to the raw tile bytes.
    pub fn new(
        tile_index: usize,
        tile: TileBuffer,
        element: ElementType,
        codec: Arc<dyn TileCodec>,
        image: &'a [u8],
        region: &'a mut [u8],
        compressed_offset: usize,
    ) -> Self {
        CompressTileOperation {
            tile_index,
            tile,
            element,
            codec,
            tile_options: None,
            image,
            region,
            compressed_offset,
            compressed_len: 0,
            compression_type: TileCompressionType::Compressed,
            state: TileState::Pending,
        }
    }

    /// Bind a private clone of the option set sized to this tile.
    pub fn configure(&mut self, template: &CompressOptions) {
        self.tile_options = Some(template.configure(self.tile.width, self.tile.height));
        self.state = TileState::Configured;
    }

    pub fn tile_options(&self) -> Option<&CompressOptions> {
        self.tile_options.as_ref()
    }

    pub fn compression_type(&self) -> TileCompressionType {
        self.compression_type
    }

    pub fn compressed_offset(&self) -> usize {
        self.compressed_offset
    }

    pub fn compressed_len(&self) -> usize {
        self.compressed_len
    }

    /// The bytes written to this tile's region.
    pub fn compressed_bytes(&self) -> &[u8] {
        &self.region[..self.compressed_len]
    }

    fn compress(&mut self) -> Result<()> {
        let options = self.tile_options.as_ref().ok_or_else(unbound)?;
        let pixels = self.tile.gather(self.image);

        let (packed, kind) = if self.codec.supports(self.element) {
            let packed = self.codec.compress(options, self.element, &pixels)?;
            (packed, TileCompressionType::Compressed)
        } else {
            tracing::warn!(
                tile = self.tile_index,
                codec = self.codec.name(),
                element = ?self.element,
                "element type unsupported, using GZIP_1"
            );
            (gzip_compress(&pixels), TileCompressionType::GzipCompressed)
        };

        let (bytes, kind) = if packed.len() >= pixels.len() {
            (&pixels[..], TileCompressionType::Uncompressed)
        } else {
            (&packed[..], kind)
        };
        if bytes.len() > self.region.len() {
            tracing::error!(
                tile = self.tile_index,
                len = bytes.len(),
                region = self.region.len(),
                "tile output exceeds its region"
            );
            return Err(Error::InvalidInput("tile output exceeds its region"));
        }

        self.region[..bytes.len()].copy_from_slice(bytes);
        self.compressed_len = bytes.len();
        self.compression_type = kind;
        Ok(())
    }
}

impl TileTask for CompressTileOperation<'_> {
    fn tile_index(&self) -> usize {
        self.tile_index
    }

    fn state(&self) -> &TileState {
        &self.state
    }

    fn run(&mut self) {
        self.state = TileState::Running;
        self.state = match self.compress() {
            Ok(()) => {
                tracing::trace!(
                    tile = self.tile_index,
                    kind = ?self.compression_type,
                    len = self.compressed_len,
                    "tile compressed"
                );
                TileState::Done
            }
            Err(e) => TileState::Failed(e),
        };
    }

    fn take_failure(&mut self) -> Option<Error> {
        take_failed(&mut self.state, self.tile_index)
    }
}

impl fmt::Debug for CompressTileOperation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CompressTileOperation({},{:?},{})",
            self.tile_index, self.compression_type, self.compressed_offset
        )
    }
}

/// Decompress one tile from a positioned slice of the compressed heap.
pub struct DecompressTileOperation<'a> {
    tile_index: usize,
    tile: TileBuffer,
    element: ElementType,
    codec: Arc<dyn TileCodec>,
    tile_options: Option<CompressOptions>,
    compressed: &'a [u8],
    compression_type: TileCompressionType,
    pixels: Vec<u8>,
    state: TileState,
}

impl<'a> DecompressTileOperation<'a> {
    pub fn new(
        tile_index: usize,
        tile: TileBuffer,
        element: ElementType,
        codec: Arc<dyn TileCodec>,
        record: TileRecord,
        heap: &'a [u8],
    ) -> Result<Self> {
        let end = record
            .offset
            .checked_add(record.len)
            .ok_or(Error::UnexpectedEof)?;
        let compressed = heap.get(record.offset..end).ok_or(Error::UnexpectedEof)?;
        Ok(DecompressTileOperation {
            tile_index,
            tile,
            element,
            codec,
            tile_options: None,
            compressed,
            compression_type: record.compression_type,
            pixels: Vec::new(),
            state: TileState::Pending,
        })
    }

    pub fn configure(&mut self, template: &CompressOptions) {
        self.tile_options = Some(template.configure(self.tile.width, self.tile.height));
        self.state = TileState::Configured;
    }

    pub fn tile(&self) -> &TileBuffer {
        &self.tile
    }

    /// Decoded tile pixels, contiguous and big-endian.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn decompress(&mut self) -> Result<()> {
        let options = self.tile_options.as_ref().ok_or_else(unbound)?;
        let mut pixels = vec![0u8; self.tile.byte_len()];
        match self.compression_type {
            TileCompressionType::Compressed => {
                self.codec
                    .decompress(options, self.element, self.compressed, &mut pixels)?
            }
            TileCompressionType::GzipCompressed => {
                let raw = gzip_decompress(self.compressed)?;
                if raw.len() != pixels.len() {
                    return Err(Error::DecompressionError);
                }
                pixels.copy_from_slice(&raw);
            }
            TileCompressionType::Uncompressed => {
                if self.compressed.len() != pixels.len() {
                    return Err(Error::DecompressionError);
                }
                pixels.copy_from_slice(self.compressed);
            }
        }
        self.pixels = pixels;
        Ok(())
    }
}

impl TileTask for DecompressTileOperation<'_> {
    fn tile_index(&self) -> usize {
        self.tile_index
    }

    fn state(&self) -> &TileState {
        &self.state
    }

    fn run(&mut self) {
        self.state = TileState::Running;
        self.state = match self.decompress() {
            Ok(()) => TileState::Done,
            Err(e) => TileState::Failed(e),
        };
    }

    fn take_failure(&mut self) -> Option<Error> {
        take_failed(&mut self.state, self.tile_index)
    }
}

impl fmt::Debug for DecompressTileOperation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DecompressTileOperation({},{:?})",
            self.tile_index, self.compression_type
        )
    }
}
