//! The Snappy framed stream format.
//!
//! A stream is a fixed identifier chunk followed by any number of data
//! chunks, each at most 64 KiB of payload plus a masked CRC32C of the
//! uncompressed bytes. The format is self-terminating per chunk, so streams
//! can be concatenated back to back and read incrementally.
//!
//! Framing is what you want in practice: it adds corruption detection and a
//! per-chunk fallback to uncompressed storage, so the output is never much
//! larger than the input.

mod compress;
mod decompress;

#[cfg(feature = "async")]
mod async_io;

/// The ten magic bytes at the start of every stream: an identifier chunk
/// whose payload spells out the format name.
pub const STREAM_IDENTIFIER: &[u8] = b"\xff\x06\x00\x00sNaPpY";

/// The payload of the identifier chunk.
pub(crate) const STREAM_BODY: &[u8] = b"sNaPpY";

/// Data chunks carry at most this many uncompressed bytes.
pub const MAX_CHUNK_INPUT: usize = 64 * 1024;

/// 1-byte chunk type plus 3-byte little-endian payload length.
pub(crate) const CHUNK_HEADER_SIZE: usize = 4;

/// A data chunk's payload starts with its 4-byte masked checksum.
pub(crate) const CHUNK_CRC_SIZE: usize = 4;

/// The largest payload length a data chunk may declare: checksum plus 64 KiB.
pub(crate) const MAX_DATA_CHUNK_LEN: usize = CHUNK_CRC_SIZE + MAX_CHUNK_INPUT;

/// The chunk types this crate knows by name.
///
/// Everything else is reserved: `0x02..=0x7f` must abort decoding,
/// `0x80..=0xfd` must be skipped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ChunkType {
    Compressed = 0x00,
    Uncompressed = 0x01,
    Padding = 0xfe,
    StreamIdentifier = 0xff,
}

impl ChunkType {
    pub(crate) fn from_u8(byte: u8) -> Result<ChunkType, u8> {
        match byte {
            0x00 => Ok(ChunkType::Compressed),
            0x01 => Ok(ChunkType::Uncompressed),
            0xfe => Ok(ChunkType::Padding),
            0xff => Ok(ChunkType::StreamIdentifier),
            other => Err(other),
        }
    }
}

pub use compress::*;
pub use decompress::*;

#[cfg(feature = "async")]
pub use async_io::*;
