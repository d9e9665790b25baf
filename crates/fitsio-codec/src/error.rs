use alloc::boxed::Box;
use alloc::string::String;

/// All errors that can occur in the checksum engine and the tile pipeline.
#[derive(Debug)]
pub enum Error {
    /// Caller-supplied input violates a precondition (e.g. a checksum
    /// stream whose length is not a multiple of 4).
    InvalidInput(&'static str),
    /// The option set cannot drive the chosen algorithm.
    UnsupportedConfiguration(String),
    /// A tile failed to compress or decompress. Reported once every sibling
    /// tile has finished, referencing the lowest failing tile index.
    TileCompressionFailure { tile: usize, source: Box<Error> },
    /// Compressed tile bytes could not be decoded.
    DecompressionError,
    /// Malformed compressed-image header or table.
    InvalidHeader,
    /// A required keyword was not found in the header.
    MissingKeyword(&'static str),
    /// Keyword name is not valid FITS ASCII.
    InvalidKeyword,
    /// Unrecognized BITPIX value.
    InvalidBitpix(i64),
    /// Premature end of data while reading a table or heap.
    UnexpectedEof,
    /// The worker pool could not be started.
    #[cfg(feature = "std")]
    WorkerPool(rayon::ThreadPoolBuildError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedConfiguration(msg.into())
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Error::UnsupportedConfiguration(msg) => {
                write!(f, "unsupported compression configuration: {msg}")
            }
            Error::TileCompressionFailure { tile, source } => {
                write!(f, "could not (de)compress tile {tile}: {source}")
            }
            Error::DecompressionError => write!(f, "corrupt compressed tile data"),
            Error::InvalidHeader => write!(f, "invalid compressed image header"),
            Error::MissingKeyword(kw) => write!(f, "missing required keyword: {kw}"),
            Error::InvalidKeyword => write!(f, "invalid keyword name"),
            Error::InvalidBitpix(v) => write!(f, "invalid BITPIX value: {v}"),
            Error::UnexpectedEof => write!(f, "unexpected end of data"),
            #[cfg(feature = "std")]
            Error::WorkerPool(e) => write!(f, "worker pool error: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::TileCompressionFailure { source, .. } => Some(source.as_ref()),
            Error::WorkerPool(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Error::WorkerPool(e)
    }
}
