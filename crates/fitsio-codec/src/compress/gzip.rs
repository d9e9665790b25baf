//! GZIP_1 and GZIP_2 tile compression.
//!
//! Tiles are written as RFC 1952 gzip members (deflate payload from
//! `miniz_oxide`), the framing cfitsio produces. GZIP_2 first regroups the
//! big-endian pixel bytes by significance, which usually deflates better for
//! smooth images.

use alloc::vec::Vec;

use crate::compress::{CompressOptions, TileCodec};
use crate::error::{Error, Result};
use crate::image::ElementType;

/// Deflate level used for written tiles.
const DEFLATE_LEVEL: u8 = 6;

/// Fixed gzip member header: magic, deflate, no flags, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0x00, 0, 0, 0, 0, 0x00, 0xff];

/// Wrap `data` in a single gzip member.
pub fn gzip_compress(data: &[u8]) -> Vec<u8> {
    let deflated = miniz_oxide::deflate::compress_to_vec(data, DEFLATE_LEVEL);
    let mut out = Vec::with_capacity(GZIP_HEADER.len() + deflated.len() + 8);
    out.extend_from_slice(&GZIP_HEADER);
    out.extend_from_slice(&deflated);
    out.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    out.extend_from_slice(&(data.len() as u32).to_le_bytes());
    out
}

/// Strip the gzip header and trailer, returning the raw deflate payload.
fn strip_gzip_header(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 18 || data[0] != 0x1f || data[1] != 0x8b || data[2] != 0x08 {
        return Err(Error::DecompressionError);
    }
    let flg = data[3];
    let mut pos = 10usize;
    if flg & 0x04 != 0 {
        // FEXTRA
        if pos + 2 > data.len() {
            return Err(Error::DecompressionError);
        }
        let xlen = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        pos += 2 + xlen;
    }
    for mask in [0x08u8, 0x10] {
        // FNAME, FCOMMENT: null-terminated
        if flg & mask != 0 {
            while pos < data.len() && data[pos] != 0 {
                pos += 1;
            }
            pos += 1;
        }
    }
    if flg & 0x02 != 0 {
        // FHCRC
        pos += 2;
    }
    if data.len() < pos + 8 {
        return Err(Error::DecompressionError);
    }
    Ok(&data[pos..data.len() - 8])
}

/// Inflate a gzip member, falling back to zlib and raw deflate streams.
pub fn gzip_decompress(compressed: &[u8]) -> Result<Vec<u8>> {
    if compressed.len() >= 2 && compressed[0] == 0x1f && compressed[1] == 0x8b {
        let payload = strip_gzip_header(compressed)?;
        return miniz_oxide::inflate::decompress_to_vec(payload)
            .map_err(|_| Error::DecompressionError);
    }
    miniz_oxide::inflate::decompress_to_vec_zlib(compressed)
        .or_else(|_| miniz_oxide::inflate::decompress_to_vec(compressed))
        .map_err(|_| Error::DecompressionError)
}

/// Group byte `k` of every element together: all most-significant bytes
/// first, then the next, and so on.
fn shuffle(data: &[u8], width: usize) -> Vec<u8> {
    if width == 1 {
        return data.to_vec();
    }
    let count = data.len() / width;
    let mut out = alloc::vec![0u8; data.len()];
    for (i, element) in data.chunks_exact(width).enumerate() {
        for (k, &b) in element.iter().enumerate() {
            out[k * count + i] = b;
        }
    }
    out
}

fn unshuffle(data: &[u8], width: usize, out: &mut [u8]) {
    if width == 1 {
        out.copy_from_slice(data);
        return;
    }
    let count = data.len() / width;
    for (i, element) in out.chunks_exact_mut(width).enumerate() {
        for (k, b) in element.iter_mut().enumerate() {
            *b = data[k * count + i];
        }
    }
}

/// GZIP_1 (`shuffle == false`) or GZIP_2 (`shuffle == true`).
#[derive(Debug, Clone, Copy)]
pub struct Gzip {
    shuffle: bool,
}

impl Gzip {
    pub fn new(shuffle: bool) -> Self {
        Gzip { shuffle }
    }
}

impl TileCodec for Gzip {
    fn name(&self) -> &str {
        if self.shuffle {
            "GZIP_2"
        } else {
            "GZIP_1"
        }
    }

    fn compress(
        &self,
        _options: &CompressOptions,
        element: ElementType,
        pixels: &[u8],
    ) -> Result<Vec<u8>> {
        if self.shuffle {
            Ok(gzip_compress(&shuffle(pixels, element.size())))
        } else {
            Ok(gzip_compress(pixels))
        }
    }

    fn decompress(
        &self,
        _options: &CompressOptions,
        element: ElementType,
        compressed: &[u8],
        pixels: &mut [u8],
    ) -> Result<()> {
        let raw = gzip_decompress(compressed)?;
        if raw.len() != pixels.len() {
            return Err(Error::DecompressionError);
        }
        if self.shuffle {
            unshuffle(&raw, element.size(), pixels);
        } else {
            pixels.copy_from_slice(&raw);
        }
        Ok(())
    }
}
