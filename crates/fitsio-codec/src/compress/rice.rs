//! RICE_1 tile compression.
//!
//! Bit-compatible with cfitsio's `fits_rcomp`/`fits_rdecomp`: the first pixel
//! is stored verbatim, then each block of `BLOCKSIZE` zig-zagged differences
//! is coded with a per-block split level `fs`, or stored raw when the block is
//! too noisy, or elided when every difference is zero.

use alloc::format;
use alloc::vec::Vec;

use crate::compress::{CompressOptions, TileCodec, BLOCKSIZE, BYTEPIX};
use crate::error::{Error, Result};
use crate::image::ElementType;

/// Position of the most significant 1-bit for each byte value 0..255.
const NONZERO_COUNT: [i32; 256] = [
    0, 1, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 4, 4, 4, 4, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5,
    6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6, 6,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7,
    8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
    8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
    8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
    8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8, 8,
];

/// Largest accepted `BLOCKSIZE`. cfitsio writes 16 or 32.
pub const MAX_BLOCKSIZE: usize = 1 << 16;

struct RiceParams {
    fsbits: i32,
    fsmax: i32,
    bbits: i32,
    bytes_per_val: usize,
}

impl RiceParams {
    fn for_bytepix(rice_bytepix: usize) -> Result<Self> {
        match rice_bytepix {
            1 => Ok(RiceParams {
                fsbits: 3,
                fsmax: 6,
                bbits: 8,
                bytes_per_val: 1,
            }),
            2 => Ok(RiceParams {
                fsbits: 4,
                fsmax: 14,
                bbits: 16,
                bytes_per_val: 2,
            }),
            4 => Ok(RiceParams {
                fsbits: 5,
                fsmax: 25,
                bbits: 32,
                bytes_per_val: 4,
            }),
            other => Err(Error::unsupported(format!(
                "RICE_1 cannot code {other}-byte values"
            ))),
        }
    }

    /// Wrap a pixel difference to the coded value width.
    fn wrap_diff(&self, diff: i32) -> i32 {
        match self.bytes_per_val {
            1 => diff as i8 as i32,
            2 => diff as i16 as i32,
            _ => diff,
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// MSB-first bit packer that gives up once `limit` bytes are produced.
struct BitWriter {
    out: Vec<u8>,
    acc: u64,
    nbits: u32,
    limit: usize,
}

impl BitWriter {
    fn new(limit: usize) -> Self {
        BitWriter {
            out: Vec::new(),
            acc: 0,
            nbits: 0,
            limit,
        }
    }

    fn is_full(&self) -> bool {
        self.out.len() >= self.limit
    }

    /// Append the low `n` bits of `value` (`n <= 32`).
    fn write(&mut self, value: u32, n: u32) {
        if n == 0 {
            return;
        }
        let mask = (1u64 << n) - 1;
        self.acc = (self.acc << n) | (value as u64 & mask);
        self.nbits += n;
        while self.nbits >= 8 {
            self.nbits -= 8;
            self.out.push((self.acc >> self.nbits) as u8);
        }
        self.acc &= (1u64 << self.nbits) - 1;
    }

    /// Append `zeros` zero bits followed by a single 1.
    fn write_unary(&mut self, mut zeros: u32) {
        while zeros >= 32 {
            if self.is_full() {
                return;
            }
            self.write(0, 32);
            zeros -= 32;
        }
        self.write(1, zeros + 1);
    }

    fn finish(mut self) -> Vec<u8> {
        if self.nbits > 0 {
            let pad = 8 - self.nbits;
            self.write(0, pad);
        }
        self.out
    }
}

/// Rice-code `pixels`, or `None` once the output would reach `limit` bytes.
fn rice_compress(
    pixels: &[i32],
    blocksize: usize,
    params: &RiceParams,
    limit: usize,
) -> Option<Vec<u8>> {
    let mut writer = BitWriter::new(limit);
    let Some(&first) = pixels.first() else {
        return Some(writer.finish());
    };
    writer.write(first as u32, params.bbits as u32);

    let mut lastpix = first;
    let mut diff = Vec::with_capacity(blocksize.min(pixels.len()));
    for block in pixels.chunks(blocksize) {
        diff.clear();
        let mut pixelsum: u64 = 0;
        for &nextpix in block {
            let pdiff = params.wrap_diff(nextpix.wrapping_sub(lastpix));
            let shifted = (pdiff as u32) << 1;
            let d = if pdiff < 0 { !shifted } else { shifted };
            pixelsum += d as u64;
            diff.push(d);
            lastpix = nextpix;
        }

        let n = block.len() as u64;
        let dpsum = pixelsum.saturating_sub(n / 2 + 1) / n;
        let mut psum = dpsum >> 1;
        let mut fs = 0i32;
        while psum > 0 {
            psum >>= 1;
            fs += 1;
        }

        if fs >= params.fsmax {
            // High entropy: raw differences.
            writer.write((params.fsmax + 1) as u32, params.fsbits as u32);
            for &d in &diff {
                writer.write(d, params.bbits as u32);
            }
        } else if fs == 0 && pixelsum == 0 {
            // Low entropy: every difference is zero.
            writer.write(0, params.fsbits as u32);
        } else {
            writer.write((fs + 1) as u32, params.fsbits as u32);
            let fsmask = (1u32 << fs) - 1;
            for &d in &diff {
                writer.write_unary(d >> fs);
                writer.write(d & fsmask, fs as u32);
            }
        }
        if writer.is_full() {
            return None;
        }
    }
    Some(writer.finish())
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decompress Rice-encoded tile data into `num_pixels` values.
///
/// Reading past the end of `compressed` yields zero bits, so a stream that
/// was trimmed of trailing padding still decodes.
fn rice_decompress(
    compressed: &[u8],
    num_pixels: usize,
    blocksize: usize,
    params: &RiceParams,
) -> Result<Vec<i32>> {
    if num_pixels == 0 {
        return Ok(Vec::new());
    }
    if compressed.len() < params.bytes_per_val {
        return Err(Error::DecompressionError);
    }

    let mut output = Vec::with_capacity(num_pixels);
    let mut pos = 0usize;

    let mut lastpix: i32 = match params.bytes_per_val {
        1 => compressed[0] as i8 as i32,
        2 => i16::from_be_bytes([compressed[0], compressed[1]]) as i32,
        _ => i32::from_be_bytes([compressed[0], compressed[1], compressed[2], compressed[3]]),
    };
    pos += params.bytes_per_val;

    if pos >= compressed.len() {
        output.resize(num_pixels, lastpix);
        return Ok(output);
    }

    let next = |pos: &mut usize| -> u32 {
        let b = compressed.get(*pos).copied().unwrap_or(0) as u32;
        *pos += 1;
        b
    };

    let mut b: u32 = next(&mut pos);
    let mut nbits: i32 = 8;

    while output.len() < num_pixels {
        let imax = output.len().saturating_add(blocksize).min(num_pixels);

        nbits -= params.fsbits;
        while nbits < 0 {
            b = (b << 8) | next(&mut pos);
            nbits += 8;
        }
        let fs = ((b >> nbits) as i32) - 1;
        b &= (1u32 << nbits) - 1;

        if fs < 0 {
            output.resize(imax, lastpix);
        } else if fs == params.fsmax {
            while output.len() < imax {
                let mut k = params.bbits - nbits;
                let mut diff = (b as u64) << k;
                k -= 8;
                while k >= 0 {
                    b = next(&mut pos);
                    diff |= (b as u64) << k;
                    k -= 8;
                }
                if nbits > 0 {
                    b = next(&mut pos);
                    diff |= (b >> (-k)) as u64;
                    b &= (1u32 << nbits) - 1;
                } else {
                    b = 0;
                }
                lastpix = unzigzag(diff as u32).wrapping_add(lastpix);
                output.push(lastpix);
            }
        } else {
            while output.len() < imax {
                while b == 0 {
                    if pos >= compressed.len() + 8 {
                        return Err(Error::DecompressionError);
                    }
                    nbits += 8;
                    b = next(&mut pos);
                }
                let nzero = nbits - NONZERO_COUNT[b as usize & 0xFF];
                nbits -= nzero + 1;
                if !(0..=31).contains(&nbits) {
                    return Err(Error::DecompressionError);
                }
                b ^= 1u32 << nbits;

                nbits -= fs;
                while nbits < 0 {
                    b = (b << 8) | next(&mut pos);
                    nbits += 8;
                }
                let diff = ((nzero as u32) << fs) | (b >> nbits);
                b &= (1u32 << nbits) - 1;

                lastpix = unzigzag(diff).wrapping_add(lastpix);
                output.push(lastpix);
            }
        }
    }

    Ok(output)
}

fn unzigzag(diff: u32) -> i32 {
    if diff & 1 == 0 {
        (diff >> 1) as i32
    } else {
        !(diff >> 1) as i32
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// RICE_1 over 8, 16 and 32-bit integer pixels.
#[derive(Debug, Default)]
pub struct Rice;

impl Rice {
    fn blocksize(options: &CompressOptions) -> Result<usize> {
        let blocksize = options.require(BLOCKSIZE)?;
        match usize::try_from(blocksize) {
            Ok(n) if (1..=MAX_BLOCKSIZE).contains(&n) => Ok(n),
            _ => Err(Error::unsupported(format!(
                "RICE_1 BLOCKSIZE must be in 1..={MAX_BLOCKSIZE}, got {blocksize}"
            ))),
        }
    }

    fn settings(options: &CompressOptions, element: ElementType) -> Result<(usize, RiceParams)> {
        let blocksize = Rice::blocksize(options)?;
        let bytepix = options.param(BYTEPIX).unwrap_or(element.size() as i64);
        if bytepix != element.size() as i64 {
            return Err(Error::unsupported(format!(
                "RICE_1 BYTEPIX {bytepix} does not match {}-byte pixels",
                element.size()
            )));
        }
        Ok((blocksize, RiceParams::for_bytepix(element.size())?))
    }
}

impl TileCodec for Rice {
    fn name(&self) -> &str {
        "RICE_1"
    }

    fn supports(&self, element: ElementType) -> bool {
        matches!(
            element,
            ElementType::U8 | ElementType::I16 | ElementType::I32
        )
    }

    fn validate(&self, options: &CompressOptions, element: ElementType) -> Result<()> {
        Rice::blocksize(options)?;
        if self.supports(element) {
            Rice::settings(options, element)?;
        }
        Ok(())
    }

    fn compress(
        &self,
        options: &CompressOptions,
        element: ElementType,
        pixels: &[u8],
    ) -> Result<Vec<u8>> {
        let (blocksize, params) = Rice::settings(options, element)?;
        let values: Vec<i32> = match element {
            ElementType::U8 => pixels.iter().map(|&p| p as i32).collect(),
            ElementType::I16 => pixels
                .chunks_exact(2)
                .map(|c| i16::from_be_bytes([c[0], c[1]]) as i32)
                .collect(),
            ElementType::I32 => pixels
                .chunks_exact(4)
                .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
            _ => return Err(Error::unsupported("RICE_1 requires 8, 16 or 32-bit integers")),
        };
        // Output that cannot beat the raw bytes is handed back raw; the
        // engine then stores the tile uncompressed.
        match rice_compress(&values, blocksize, &params, pixels.len()) {
            Some(packed) => Ok(packed),
            None => Ok(pixels.to_vec()),
        }
    }

    fn decompress(
        &self,
        options: &CompressOptions,
        element: ElementType,
        compressed: &[u8],
        pixels: &mut [u8],
    ) -> Result<()> {
        let (blocksize, params) = Rice::settings(options, element)?;
        let count = pixels.len() / element.size();
        let values = rice_decompress(compressed, count, blocksize, &params)?;
        match element {
            ElementType::U8 => {
                for (dst, &v) in pixels.iter_mut().zip(&values) {
                    *dst = v as u8;
                }
            }
            ElementType::I16 => {
                for (dst, &v) in pixels.chunks_exact_mut(2).zip(&values) {
                    dst.copy_from_slice(&(v as i16).to_be_bytes());
                }
            }
            ElementType::I32 => {
                for (dst, &v) in pixels.chunks_exact_mut(4).zip(&values) {
                    dst.copy_from_slice(&v.to_be_bytes());
                }
            }
            _ => return Err(Error::unsupported("RICE_1 requires 8, 16 or 32-bit integers")),
        }
        Ok(())
    }
}
