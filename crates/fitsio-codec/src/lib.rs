#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod block;
pub mod checksum;
pub mod compress;
pub mod compressed;
pub mod error;
pub mod header;
pub mod image;
pub mod tile;
pub mod tiled;

pub use block::{BLOCK_SIZE, CARDS_PER_BLOCK, CARD_SIZE};
pub use checksum::{checksum, combine, encode_checksum, stamp_checksum};
pub use compress::{CompressOptions, CompressionAlgorithm, QuantizeAlgorithm, TileCodec};
pub use compressed::CompressedImageData;
pub use error::{Error, Result};
pub use image::{ElementType, ImageBuffer, ImageData};
pub use tile::{TileBuffer, TileCompressionType, TileRecord};
pub use tiled::{CompressedImage, TiledImageEngine};
