//! Tag-driven decoding of raw blocks.

use std::cmp;

use byteorder::{ByteOrder, LE};
use culpa::{throw, throws};
use thiserror::Error;

use super::{MAX_UNCOMPRESSED_LEN, TAG_COPY1, TAG_COPY2, TAG_COPY4, TAG_LITERAL};
use crate::varint::{read_varint, VarintError};

/// Errors when decoding a raw block.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Error)]
pub enum DecodeError {
    #[error("Block stream ended prematurely. Either your input was truncated or you're trying to decompress garbage.")]
    UnexpectedEnd,
    #[error("The block length prefix is overlong or encodes a value above 2^32-1. You are probably decoding corrupted input.")]
    BadLengthHeader,
    #[error("Refusing to decode a block that declares more than 2^30 uncompressed bytes. This is either garbage input or an OOM attack.")]
    LengthLimitExceeded,
    #[error("The offset of a copy is zero. This is always invalid. You are probably decoding corrupted input.")]
    ZeroCopyOffset,
    #[error("The offset of a copy reaches back before the start of the output.")]
    CopyOffsetOutOfBounds,
    #[error("An element runs past the declared uncompressed length.")]
    DeclaredLengthExceeded,
    #[error("The tag stream ended before producing the declared number of bytes.")]
    DeclaredLengthMismatch,
    #[error("The destination buffer holds {available} bytes but the block declares {needed}. Retry with a buffer sized by decompress_len.")]
    OutputTooSmall { needed: usize, available: usize },
}
type Error = DecodeError; // do it this way for better docs

impl From<VarintError> for DecodeError {
    fn from(e: VarintError) -> DecodeError {
        match e {
            VarintError::UnexpectedEnd => DecodeError::UnexpectedEnd,
            VarintError::Overflow => DecodeError::BadLengthHeader,
        }
    }
}

/// Read the uncompressed length a block declares, without decoding it.
///
/// Use this to size the destination buffer for [`decompress`]. Declared
/// lengths above [`MAX_UNCOMPRESSED_LEN`](super::MAX_UNCOMPRESSED_LEN) are
/// rejected here, before anything is allocated.
#[throws]
pub fn decompress_len(input: &[u8]) -> usize {
    let (len, _) = read_varint(input)?;
    let len = len as usize;
    if len > MAX_UNCOMPRESSED_LEN {
        throw!(Error::LengthLimitExceeded);
    }
    len
}

/// Decompress a block into `output`, returning the number of bytes written.
///
/// `output` must be at least as large as the declared uncompressed length.
/// The decoder halts at the first inconsistency; whatever was written up to
/// that point is unspecified garbage.
#[throws]
pub fn decompress(input: &[u8], output: &mut [u8]) -> usize {
    let (declared, header_len) = read_varint(input)?;
    let declared = declared as usize;
    if declared > MAX_UNCOMPRESSED_LEN {
        throw!(Error::LengthLimitExceeded);
    }
    if output.len() < declared {
        throw!(Error::OutputTooSmall { needed: declared, available: output.len() });
    }
    decode_tags(&input[header_len..], &mut output[..declared])?;
    declared
}

/// Decompress a block into a freshly allocated buffer.
#[throws]
pub fn decompress_to_vec(input: &[u8]) -> Vec<u8> {
    let mut output = vec![0; decompress_len(input)?];
    decompress(input, &mut output)?;
    output
}

/// The decode state machine: one tag plus its operands per iteration, until
/// the input runs out and the output is exactly full.
#[throws]
fn decode_tags(src: &[u8], dst: &mut [u8]) {
    let mut s = 0;
    let mut d = 0;

    while s < src.len() {
        let tag = src[s];
        match tag & 0b11 {
            TAG_LITERAL => {
                let upper = (tag >> 2) as usize;
                let (len, tag_len) = if upper < 60 {
                    (upper as u64 + 1, 1)
                } else {
                    // 60..=63: that many minus 59 little-endian bytes follow
                    let extra = upper - 59;
                    if src.len() - s <= extra {
                        throw!(Error::UnexpectedEnd);
                    }
                    let mut raw = [0u8; 4];
                    raw[..extra].copy_from_slice(&src[s + 1..s + 1 + extra]);
                    (u64::from(LE::read_u32(&raw)) + 1, 1 + extra)
                };
                s += tag_len;
                if len > (dst.len() - d) as u64 {
                    throw!(Error::DeclaredLengthExceeded);
                }
                let len = len as usize;
                if len > src.len() - s {
                    throw!(Error::UnexpectedEnd);
                }
                dst[d..d + len].copy_from_slice(&src[s..s + len]);
                d += len;
                s += len;
            }
            TAG_COPY1 => {
                if src.len() - s < 2 {
                    throw!(Error::UnexpectedEnd);
                }
                let len = 4 + ((tag >> 2) & 0x7) as usize;
                let offset = (tag as usize & 0xe0) << 3 | src[s + 1] as usize;
                s += 2;
                d = back_copy(dst, d, offset, len)?;
            }
            TAG_COPY2 => {
                if src.len() - s < 3 {
                    throw!(Error::UnexpectedEnd);
                }
                let len = 1 + (tag >> 2) as usize;
                let offset = LE::read_u16(&src[s + 1..]) as usize;
                s += 3;
                d = back_copy(dst, d, offset, len)?;
            }
            TAG_COPY4 => {
                if src.len() - s < 5 {
                    throw!(Error::UnexpectedEnd);
                }
                let len = 1 + (tag >> 2) as usize;
                let offset = LE::read_u32(&src[s + 1..]) as usize;
                s += 5;
                d = back_copy(dst, d, offset, len)?;
            }
            _ => unreachable!(),
        }
    }

    if d != dst.len() {
        throw!(Error::DeclaredLengthMismatch);
    }
}

/// Validate a copy against the write cursor, perform it, return the new cursor.
#[throws]
fn back_copy(dst: &mut [u8], d: usize, offset: usize, len: usize) -> usize {
    if offset == 0 {
        throw!(Error::ZeroCopyOffset);
    }
    if offset > d {
        throw!(Error::CopyOffsetOutOfBounds);
    }
    if len > dst.len() - d {
        throw!(Error::DeclaredLengthExceeded);
    }
    incremental_copy(dst, d, offset, len);
    d + len
}

/// Copy `len` bytes from `offset` back, tolerating source/destination overlap.
///
/// Overlapping copies repeat the pattern between the source and the cursor,
/// which is what run-length-ish matches in the wire format rely on.
fn incremental_copy(dst: &mut [u8], d: usize, offset: usize, len: usize) {
    let from = d - offset;
    if len <= offset {
        // fastpath: nonoverlapping
        dst.copy_within(from..from + len, d);
        return;
    }
    match offset {
        // fastpath: memset if we repeat the same byte forever
        1 => {
            let byte = dst[from];
            for slot in &mut dst[d..d + len] {
                *slot = byte;
            }
        }
        2 | 4 | 8 => {
            // fastpath: overlapping but small

            // speedup: build a 16 byte pattern so we can handle 16 bytes each
            // iteration instead of one
            let mut pattern = [0u8; 16];
            for chunk in pattern.chunks_mut(offset) {
                // if this panics (i.e. chunklen != offset), offset does not divide 16 (but it always does)
                chunk.copy_from_slice(&dst[from..from + offset]);
            }
            let mut at = d;
            while at < d + len {
                let n = cmp::min(pattern.len(), d + len - at);
                dst[at..at + n].copy_from_slice(&pattern[..n]);
                at += n;
            }
        }
        _ => {
            // slowest path: copy single bytes
            for i in 0..len {
                dst[d + i] = dst[from + i];
            }
        }
    }
}
