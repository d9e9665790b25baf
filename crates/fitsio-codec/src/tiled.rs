//! Tiled image compression engine.
//!
//! An image is cut into rectangular tiles over its first two axes (higher
//! axes are tiled one plane at a time). Every tile is compressed or
//! decompressed independently on a worker pool; results are placed at
//! offsets fixed during decomposition, so the assembled output never depends
//! on the order in which tiles finish.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::compress::{CompressOptions, TileCodec};
use crate::error::{Error, Result};
use crate::image::{pixel_count, ElementType, ImageBuffer};
use crate::tile::{
    CompressTileOperation, DecompressTileOperation, TileBuffer, TileRecord, TileTask,
};

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

/// Resolve requested tile lengths (`ZTILEn` order) against the image axes.
///
/// Missing entries default to full rows: the whole first axis by one row.
/// Lengths beyond the image are clamped. Axes past the second always have
/// tile length 1.
pub fn resolve_tile_axes(axes: &[usize], requested: Option<&[usize]>) -> Result<Vec<usize>> {
    let mut tile_axes = Vec::with_capacity(axes.len());
    for (i, &len) in axes.iter().enumerate() {
        let default = if i == 0 { len.max(1) } else { 1 };
        let want = requested.and_then(|r| r.get(i).copied()).unwrap_or(default);
        if want == 0 {
            return Err(Error::InvalidInput("tile axis lengths must be positive"));
        }
        if i >= 2 && want != 1 {
            return Err(Error::unsupported(alloc::format!(
                "tile length {want} on axis {} (only the first two axes are tiled)",
                i + 1
            )));
        }
        tile_axes.push(want.min(len.max(1)));
    }
    Ok(tile_axes)
}

/// Cut an image into row-major tiles, plane by plane.
///
/// `tile_axes` must already be resolved against `axes`. The result covers
/// every pixel exactly once.
pub fn decompose(axes: &[usize], tile_axes: &[usize], element_size: usize) -> Vec<TileBuffer> {
    if pixel_count(axes) == 0 {
        return Vec::new();
    }
    let naxis1 = axes[0];
    let naxis2 = axes.get(1).copied().unwrap_or(1);
    let planes: usize = axes.iter().skip(2).product();
    let tile_w = tile_axes.first().copied().unwrap_or(naxis1).max(1);
    let tile_h = tile_axes.get(1).copied().unwrap_or(1).max(1);

    let mut tiles = Vec::with_capacity(
        planes * naxis1.div_ceil(tile_w) * naxis2.div_ceil(tile_h),
    );
    for plane in 0..planes {
        let plane_offset = plane * naxis1 * naxis2;
        for y in (0..naxis2).step_by(tile_h) {
            for x in (0..naxis1).step_by(tile_w) {
                tiles.push(TileBuffer {
                    data_offset: plane_offset + y * naxis1 + x,
                    image_width: naxis1,
                    width: tile_w.min(naxis1 - x),
                    height: tile_h.min(naxis2 - y),
                    element_size,
                });
            }
        }
    }
    tiles
}

// ---------------------------------------------------------------------------
// Compressed result
// ---------------------------------------------------------------------------

/// The output of one compression pass: the assembled buffer plus where each
/// tile lives in it and how it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedImage {
    pub element: ElementType,
    pub axes: Vec<usize>,
    pub tile_axes: Vec<usize>,
    pub tiles: Vec<TileRecord>,
    pub buffer: Vec<u8>,
}

impl CompressedImage {
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Orchestrates one compress or decompress call over a bounded worker pool.
///
/// The engine holds the option template; each tile receives its own sized
/// clone, so the template is never shared with running work.
#[derive(Clone)]
pub struct TiledImageEngine {
    options: CompressOptions,
    tile_axes: Option<Vec<usize>>,
    threads: Option<usize>,
    codec: Option<Arc<dyn TileCodec>>,
}

impl TiledImageEngine {
    pub fn new(options: CompressOptions) -> Self {
        TiledImageEngine {
            options,
            tile_axes: None,
            threads: None,
            codec: None,
        }
    }

    /// Request tile lengths per axis (`ZTILEn` order).
    pub fn with_tile_axes(mut self, tile_axes: &[usize]) -> Self {
        self.tile_axes = Some(tile_axes.to_vec());
        self
    }

    /// Cap the worker pool size. Defaults to the available parallelism.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads.max(1));
        self
    }

    /// Run tiles through `codec` instead of the one named by the options.
    pub fn with_codec(mut self, codec: Arc<dyn TileCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn options(&self) -> &CompressOptions {
        &self.options
    }

    fn codec(&self) -> Arc<dyn TileCodec> {
        match &self.codec {
            Some(codec) => Arc::clone(codec),
            None => self.options.algorithm().codec(),
        }
    }

    /// Compress `image` tile by tile into one buffer.
    ///
    /// Every tile runs to completion even when a sibling fails; the error
    /// returned then refers to the lowest failing tile index.
    #[tracing::instrument(skip_all, fields(algorithm = self.options.algorithm().name()))]
    pub fn compress(&self, image: &ImageBuffer) -> Result<CompressedImage> {
        let element = image.element_type();
        let codec = self.codec();
        self.options.require_lossless()?;
        codec.validate(&self.options, element)?;

        let tile_axes = resolve_tile_axes(image.axes(), self.tile_axes.as_deref())?;
        let tiles = decompose(image.axes(), &tile_axes, element.size());
        let raw = image.as_bytes();

        // Each tile owns the slice of the master buffer matching its raw
        // size, so no two tiles can write the same bytes.
        let mut master = vec![0u8; raw.len()];
        let mut ops = Vec::with_capacity(tiles.len());
        let mut rest: &mut [u8] = &mut master;
        let mut offset = 0usize;
        for (index, tile) in tiles.iter().enumerate() {
            let (region, tail) = core::mem::take(&mut rest).split_at_mut(tile.byte_len());
            rest = tail;
            let mut op = CompressTileOperation::new(
                index,
                *tile,
                element,
                Arc::clone(&codec),
                raw,
                region,
                offset,
            );
            op.configure(&self.options);
            ops.push(op);
            offset += tile.byte_len();
        }

        self.run_all(&mut ops)?;

        let total: usize = ops.iter().map(|op| op.compressed_len()).sum();
        let mut buffer = Vec::with_capacity(total);
        let mut records = Vec::with_capacity(ops.len());
        for op in &ops {
            records.push(TileRecord {
                compression_type: op.compression_type(),
                offset: buffer.len(),
                len: op.compressed_len(),
            });
            buffer.extend_from_slice(op.compressed_bytes());
        }

        tracing::debug!(
            tiles = records.len(),
            raw_bytes = raw.len(),
            compressed_bytes = buffer.len(),
            "image compressed"
        );
        Ok(CompressedImage {
            element,
            axes: image.axes().to_vec(),
            tile_axes,
            tiles: records,
            buffer,
        })
    }

    /// Rebuild the full image from a compressed buffer.
    ///
    /// Tile geometry comes from `compressed.tile_axes`, not from the engine's
    /// own tile request.
    #[tracing::instrument(skip_all, fields(algorithm = self.options.algorithm().name()))]
    pub fn decompress(&self, compressed: &CompressedImage) -> Result<ImageBuffer> {
        let element = compressed.element;
        let codec = self.codec();
        self.options.require_lossless()?;
        codec.validate(&self.options, element)?;

        let tile_axes = resolve_tile_axes(&compressed.axes, Some(&compressed.tile_axes))?;
        let tiles = decompose(&compressed.axes, &tile_axes, element.size());
        if tiles.len() != compressed.tiles.len() {
            tracing::warn!(
                expected = tiles.len(),
                found = compressed.tiles.len(),
                "tile count does not match image geometry"
            );
            return Err(Error::InvalidHeader);
        }

        let mut ops = Vec::with_capacity(tiles.len());
        for (index, (tile, record)) in tiles.iter().zip(&compressed.tiles).enumerate() {
            let mut op = DecompressTileOperation::new(
                index,
                *tile,
                element,
                Arc::clone(&codec),
                *record,
                &compressed.buffer,
            )?;
            op.configure(&self.options);
            ops.push(op);
        }

        self.run_all(&mut ops)?;

        let mut image = ImageBuffer::zeroed(element, &compressed.axes);
        let out = image.as_bytes_mut();
        for op in &ops {
            op.tile().scatter(op.pixels(), out);
        }
        tracing::debug!(tiles = ops.len(), "image decompressed");
        Ok(image)
    }

    #[cfg(feature = "std")]
    fn worker_count(&self, tasks: usize) -> usize {
        let available = self.threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        available.min(tasks).max(1)
    }

    /// Run every task to a terminal state, then report the first failure.
    fn run_all<T: TileTask>(&self, ops: &mut [T]) -> Result<()> {
        #[cfg(feature = "std")]
        {
            use rayon::prelude::*;

            let workers = self.worker_count(ops.len());
            tracing::debug!(tasks = ops.len(), workers, "running tiles");
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()?;
            pool.install(|| ops.par_iter_mut().for_each(|op| op.run()));
        }
        #[cfg(not(feature = "std"))]
        for op in ops.iter_mut() {
            op.run();
        }

        let mut first = None;
        for op in ops.iter_mut() {
            debug_assert!(op.state().is_terminal());
            if let Some(err) = op.take_failure() {
                tracing::warn!(tile = op.tile_index(), error = %err, "tile failed");
                if first.is_none() {
                    first = Some(err);
                }
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for TiledImageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiledImageEngine")
            .field("options", &self.options)
            .field("tile_axes", &self.tile_axes)
            .field("threads", &self.threads)
            .field("codec", &self.codec.as_ref().map(|c| c.name()))
            .finish()
    }
}
