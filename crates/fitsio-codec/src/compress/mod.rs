//! Pluggable tile compression algorithms and their option sets.
//!
//! An algorithm is a [`TileCodec`] selected by the `ZCMPTYPE` name carried in
//! [`CompressOptions`]. The engine clones the option set once per tile and
//! sizes the clone to the tile before handing it to the codec, so no codec
//! ever sees configuration shared with another running tile.

pub mod gzip;
pub mod rice;

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::image::ElementType;

/// Rice coding block size parameter name.
pub const BLOCKSIZE: &str = "BLOCKSIZE";
/// Rice coding bytes-per-value parameter name.
pub const BYTEPIX: &str = "BYTEPIX";

/// Default Rice block size used by cfitsio.
pub const DEFAULT_BLOCKSIZE: i64 = 32;

/// Compression algorithms understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    NoCompress,
    Gzip1,
    Gzip2,
    Rice1,
}

impl CompressionAlgorithm {
    /// Parse a `ZCMPTYPE` value.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim() {
            "NOCOMPRESS" => Ok(CompressionAlgorithm::NoCompress),
            "GZIP_1" => Ok(CompressionAlgorithm::Gzip1),
            "GZIP_2" => Ok(CompressionAlgorithm::Gzip2),
            "RICE_1" | "RICE_ONE" => Ok(CompressionAlgorithm::Rice1),
            other => Err(Error::unsupported(format!(
                "unknown compression algorithm {other}"
            ))),
        }
    }

    /// The `ZCMPTYPE` value for this algorithm.
    pub fn name(self) -> &'static str {
        match self {
            CompressionAlgorithm::NoCompress => "NOCOMPRESS",
            CompressionAlgorithm::Gzip1 => "GZIP_1",
            CompressionAlgorithm::Gzip2 => "GZIP_2",
            CompressionAlgorithm::Rice1 => "RICE_1",
        }
    }

    /// The codec implementing this algorithm.
    pub fn codec(self) -> Arc<dyn TileCodec> {
        match self {
            CompressionAlgorithm::NoCompress => Arc::new(NoCompress),
            CompressionAlgorithm::Gzip1 => Arc::new(gzip::Gzip::new(false)),
            CompressionAlgorithm::Gzip2 => Arc::new(gzip::Gzip::new(true)),
            CompressionAlgorithm::Rice1 => Arc::new(rice::Rice),
        }
    }
}

/// Float quantization named by `ZQUANTIZ`.
///
/// Tables written with any of these hold integer tiles standing in for float
/// pixels. Decoding them needs per-tile scale and zero columns, so the engine
/// refuses quantized option sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantizeAlgorithm {
    NoDither,
    SubtractiveDither1,
    SubtractiveDither2,
}

impl QuantizeAlgorithm {
    /// Parse a `ZQUANTIZ` value.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim() {
            "NO_DITHER" => Ok(QuantizeAlgorithm::NoDither),
            "SUBTRACTIVE_DITHER_1" => Ok(QuantizeAlgorithm::SubtractiveDither1),
            "SUBTRACTIVE_DITHER_2" => Ok(QuantizeAlgorithm::SubtractiveDither2),
            other => Err(Error::unsupported(format!(
                "unknown quantization algorithm {other}"
            ))),
        }
    }

    /// The `ZQUANTIZ` value for this algorithm.
    pub fn name(self) -> &'static str {
        match self {
            QuantizeAlgorithm::NoDither => "NO_DITHER",
            QuantizeAlgorithm::SubtractiveDither1 => "SUBTRACTIVE_DITHER_1",
            QuantizeAlgorithm::SubtractiveDither2 => "SUBTRACTIVE_DITHER_2",
        }
    }
}

/// The option set governing one compression pass.
///
/// Parameters mirror the `ZNAMEn`/`ZVALn` header pairs. The template held by
/// the engine is never mutated while tiles run; each tile gets its own clone
/// from [`CompressOptions::configure`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompressOptions {
    algorithm: CompressionAlgorithm,
    quantize: Option<QuantizeAlgorithm>,
    params: BTreeMap<String, i64>,
    tile_width: usize,
    tile_height: usize,
}

impl CompressOptions {
    /// Options for `algorithm` with its default parameters.
    pub fn new(algorithm: CompressionAlgorithm) -> Self {
        let mut params = BTreeMap::new();
        if algorithm == CompressionAlgorithm::Rice1 {
            params.insert(String::from(BLOCKSIZE), DEFAULT_BLOCKSIZE);
        }
        CompressOptions {
            algorithm,
            quantize: None,
            params,
            tile_width: 0,
            tile_height: 0,
        }
    }

    pub fn algorithm(&self) -> CompressionAlgorithm {
        self.algorithm
    }

    /// Lossless when `None`.
    pub fn quantize(&self) -> Option<QuantizeAlgorithm> {
        self.quantize
    }

    pub fn with_quantize(mut self, quantize: QuantizeAlgorithm) -> Self {
        self.quantize = Some(quantize);
        self
    }

    /// Fail on option sets asking for float quantization.
    pub fn require_lossless(&self) -> Result<()> {
        match self.quantize {
            None => Ok(()),
            Some(q) => Err(Error::unsupported(format!(
                "quantized tiles ({}) are not supported",
                q.name()
            ))),
        }
    }

    /// Set a named parameter.
    pub fn with_param(mut self, name: &str, value: i64) -> Self {
        self.params.insert(String::from(name), value);
        self
    }

    /// Remove a named parameter.
    pub fn without_param(mut self, name: &str) -> Self {
        self.params.remove(name);
        self
    }

    pub fn param(&self, name: &str) -> Option<i64> {
        self.params.get(name).copied()
    }

    /// Parameters in name order.
    pub fn params(&self) -> impl Iterator<Item = (&str, i64)> {
        self.params.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Fetch a parameter the algorithm cannot run without.
    pub fn require(&self, name: &str) -> Result<i64> {
        self.param(name).ok_or_else(|| {
            Error::unsupported(format!("{} requires {name}", self.algorithm.name()))
        })
    }

    /// Clone this option set and size the clone to one tile.
    pub fn configure(&self, width: usize, height: usize) -> Self {
        let mut tile = self.clone();
        tile.tile_width = width;
        tile.tile_height = height;
        tile
    }

    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    pub fn tile_height(&self) -> usize {
        self.tile_height
    }

    pub fn tile_pixels(&self) -> usize {
        self.tile_width * self.tile_height
    }
}

/// A compression algorithm applied to one tile at a time.
///
/// Pixels are passed as contiguous big-endian bytes, `tile_pixels()` elements
/// long. Implementations must be stateless between calls: the same codec is
/// shared by every tile of a pass.
pub trait TileCodec: Send + Sync {
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Whether this codec can represent `element` pixels. Tiles of an
    /// unsupported type are stored with the GZIP fallback instead.
    fn supports(&self, _element: ElementType) -> bool {
        true
    }

    /// Reject option sets the codec cannot run with. Called once on the
    /// template before any tile is submitted.
    fn validate(&self, _options: &CompressOptions, _element: ElementType) -> Result<()> {
        Ok(())
    }

    /// Encode one tile. Output at least as long as `pixels` means the tile
    /// did not compress and is stored raw instead.
    fn compress(
        &self,
        options: &CompressOptions,
        element: ElementType,
        pixels: &[u8],
    ) -> Result<Vec<u8>>;

    /// Decode `compressed` into `pixels`, which is exactly one tile long.
    fn decompress(
        &self,
        options: &CompressOptions,
        element: ElementType,
        compressed: &[u8],
        pixels: &mut [u8],
    ) -> Result<()>;
}

/// `NOCOMPRESS`: tiles are stored verbatim.
#[derive(Debug, Default)]
pub struct NoCompress;

impl TileCodec for NoCompress {
    fn name(&self) -> &str {
        "NOCOMPRESS"
    }

    fn compress(&self, _: &CompressOptions, _: ElementType, pixels: &[u8]) -> Result<Vec<u8>> {
        Ok(pixels.to_vec())
    }

    fn decompress(
        &self,
        _: &CompressOptions,
        _: ElementType,
        compressed: &[u8],
        pixels: &mut [u8],
    ) -> Result<()> {
        if compressed.len() != pixels.len() {
            return Err(Error::DecompressionError);
        }
        pixels.copy_from_slice(compressed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn algorithm_names_roundtrip() {
        for alg in [
            CompressionAlgorithm::NoCompress,
            CompressionAlgorithm::Gzip1,
            CompressionAlgorithm::Gzip2,
            CompressionAlgorithm::Rice1,
        ] {
            assert_eq!(CompressionAlgorithm::from_name(alg.name()).unwrap(), alg);
        }
        assert_eq!(
            CompressionAlgorithm::from_name("RICE_ONE").unwrap(),
            CompressionAlgorithm::Rice1
        );
    }

    #[test]
    fn unknown_algorithm_is_unsupported() {
        assert!(matches!(
            CompressionAlgorithm::from_name("HCOMPRESS_1"),
            Err(Error::UnsupportedConfiguration(_))
        ));
    }

    #[test]
    fn quantize_names_roundtrip() {
        for q in [
            QuantizeAlgorithm::NoDither,
            QuantizeAlgorithm::SubtractiveDither1,
            QuantizeAlgorithm::SubtractiveDither2,
        ] {
            assert_eq!(QuantizeAlgorithm::from_name(q.name()).unwrap(), q);
        }
        assert!(QuantizeAlgorithm::from_name("DITHER_3").is_err());
    }

    #[test]
    fn quantized_options_are_not_lossless() {
        let opts = CompressOptions::new(CompressionAlgorithm::Rice1);
        assert!(opts.require_lossless().is_ok());
        let quantized = opts.with_quantize(QuantizeAlgorithm::SubtractiveDither1);
        assert_eq!(
            quantized.configure(4, 4).quantize(),
            Some(QuantizeAlgorithm::SubtractiveDither1)
        );
        assert!(matches!(
            quantized.require_lossless(),
            Err(Error::UnsupportedConfiguration(ref m)) if m.contains("SUBTRACTIVE_DITHER_1")
        ));
    }

    #[test]
    fn rice_defaults_blocksize() {
        let opts = CompressOptions::new(CompressionAlgorithm::Rice1);
        assert_eq!(opts.param(BLOCKSIZE), Some(32));
        assert_eq!(opts.param(BYTEPIX), None);
    }

    #[test]
    fn require_missing_param() {
        let opts = CompressOptions::new(CompressionAlgorithm::Rice1).without_param(BLOCKSIZE);
        let err = opts.require(BLOCKSIZE).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConfiguration(ref m) if m.contains("BLOCKSIZE")));
    }

    #[test]
    fn configure_clones_without_touching_template() {
        let template = CompressOptions::new(CompressionAlgorithm::Rice1);
        let mut a = template.configure(10, 4);
        let b = template.configure(3, 4);
        a = a.with_param(BLOCKSIZE, 16);

        assert_eq!(template.tile_width(), 0);
        assert_eq!(template.param(BLOCKSIZE), Some(32));
        assert_eq!(a.tile_pixels(), 40);
        assert_eq!(a.param(BLOCKSIZE), Some(16));
        assert_eq!(b.tile_pixels(), 12);
        assert_eq!(b.param(BLOCKSIZE), Some(32));
    }

    #[test]
    fn params_iterate_in_name_order() {
        let opts = CompressOptions::new(CompressionAlgorithm::Rice1).with_param(BYTEPIX, 2);
        let names: Vec<&str> = opts.params().map(|(n, _)| n).collect();
        assert_eq!(names, vec![BLOCKSIZE, BYTEPIX]);
    }

    #[test]
    fn nocompress_is_identity() {
        let opts = CompressOptions::new(CompressionAlgorithm::NoCompress).configure(2, 1);
        let codec = NoCompress;
        let packed = codec.compress(&opts, ElementType::I16, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        codec
            .decompress(&opts, ElementType::I16, &packed, &mut out)
            .unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }
}
