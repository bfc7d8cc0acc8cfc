use byteorder::{ByteOrder, LE};
use std::cmp;
use std::io::{self, BufRead, ErrorKind, Read};
use thiserror::Error;
use culpa::{throw, throws};

use super::{
    ChunkType, CHUNK_CRC_SIZE, CHUNK_HEADER_SIZE, MAX_CHUNK_INPUT, MAX_DATA_CHUNK_LEN, STREAM_BODY,
};
use crate::crc32c::crc32c_masked;
use crate::raw;

/// Errors when decompressing a stream.
#[derive(Error, Debug)]
pub enum DecompressionError {
    #[error("error reading from the input you gave me")]
    InputError(#[from] io::Error),
    #[error("the raw block decompression failed (data corruption?)")]
    CodecError(#[from] raw::DecodeError),
    #[error("the stream does not begin with the identifier chunk (first chunk type: {0:#04x})")]
    MissingStreamIdentifier(u8),
    #[error("the identifier chunk does not spell out the format name")]
    StreamIdentifierMismatch,
    #[error("found a second identifier chunk in the middle of the stream")]
    DuplicateStreamIdentifier,
    #[error("chunk type {0:#04x} is reserved as unskippable, so this decoder has to give up here")]
    ReservedUnskippableChunk(u8),
    #[error("a data chunk declares {len} bytes, outside what the format allows")]
    InvalidChunkLength { len: usize },
    #[error("checksum mismatch: the chunk declares {expected:#010x} but its data sums to {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("the stream ends in the middle of a chunk")]
    TruncatedChunk,
}
type Error = DecompressionError; // do it this way for better docs

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(ErrorKind::Other, e)
    }
}

/// Wrapper around `FrameReader` that implements `Read` and `BufRead`.
pub struct FrameIoReader<R: Read> {
    frame_reader: FrameReader<R>,
    bytes_taken: usize,
    buffer: Vec<u8>,
}
impl<R: Read> Read for FrameIoReader<R> {
    #[throws(io::Error)]
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mybuf = self.fill_buf()?;
        let bytes_to_take = cmp::min(mybuf.len(), buf.len());
        buf[..bytes_to_take].copy_from_slice(&mybuf[..bytes_to_take]);
        self.consume(bytes_to_take);
        bytes_to_take
    }
}
impl<R: Read> BufRead for FrameIoReader<R> {
    #[throws(io::Error)]
    fn fill_buf(&mut self) -> &[u8] {
        if self.bytes_taken == self.buffer.len() {
            self.buffer.clear();
            self.frame_reader.decode_chunk(&mut self.buffer)?;
            self.bytes_taken = 0;
        }
        &self.buffer[self.bytes_taken..]
    }

    fn consume(&mut self, amt: usize) {
        self.bytes_taken += amt;
        assert!(self.bytes_taken <= self.buffer.len(), "You consumed more bytes than I even gave you!");
    }
}

/// Read a compressed stream.
///
/// This reader yields the decoded bytes one chunk at a time. It validates the
/// leading stream identifier, every chunk's length bounds and checksum, and
/// skips over padding and reserved-skippable chunks.
pub struct FrameReader<R: Read> {
    reader: R,
    /// Compressed chunk payloads land here before decoding.
    src: Vec<u8>,
    read_stream_ident: bool,
    finished: bool,
}

impl<R: Read> FrameReader<R> {
    /// Create a new FrameReader over an underlying reader.
    ///
    /// The identifier chunk is checked on first use, not here, because an
    /// entirely empty input is a valid (empty) stream. If you want to read
    /// any data following the stream, you should probably pass in your
    /// reader by reference, rather than by value.
    pub fn new(reader: R) -> Self {
        FrameReader { reader, src: Vec::new(), read_stream_ident: false, finished: false }
    }

    /// Gets a reference to the underlying reader.
    pub fn get_ref(&self) -> &R {
        &self.reader
    }

    /// Gets a mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Gets the underlying reader back.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Convert this `FrameReader` into something that implements `std::io::BufRead`.
    pub fn into_read(self) -> FrameIoReader<R> {
        FrameIoReader {
            buffer: Vec::with_capacity(MAX_CHUNK_INPUT),
            bytes_taken: 0,
            frame_reader: self,
        }
    }

    /// Decode the next data chunk.
    ///
    /// The `output` buffer must be empty upon calling this method. It stays
    /// empty when the stream has ended.
    #[throws]
    pub fn decode_chunk(&mut self, output: &mut Vec<u8>) {
        assert!(output.is_empty(), "You must pass an empty buffer to this interface.");

        if self.finished {
            return;
        }

        loop {
            let mut header = [0u8; CHUNK_HEADER_SIZE];
            if !read_exact_eof(&mut self.reader, &mut header)? {
                self.finished = true;
                return;
            }
            let chunk_type = header[0];
            let len = LE::read_u24(&header[1..]) as usize;

            match ChunkType::from_u8(chunk_type) {
                Ok(ChunkType::StreamIdentifier) => {
                    if self.read_stream_ident {
                        throw!(Error::DuplicateStreamIdentifier);
                    }
                    if len != STREAM_BODY.len() {
                        throw!(Error::StreamIdentifierMismatch);
                    }
                    let mut body = [0u8; 6];
                    read_exact_or_truncated(&mut self.reader, &mut body)?;
                    if &body[..] != STREAM_BODY {
                        throw!(Error::StreamIdentifierMismatch);
                    }
                    self.read_stream_ident = true;
                }
                _ if !self.read_stream_ident => {
                    throw!(Error::MissingStreamIdentifier(chunk_type));
                }
                Ok(ChunkType::Padding) => self.skip(len)?,
                Ok(ChunkType::Compressed) => {
                    let expected = self.read_data_payload(len)?;
                    let decoded_len = raw::decompress_len(&self.src)?;
                    if decoded_len > MAX_CHUNK_INPUT {
                        throw!(Error::InvalidChunkLength { len: decoded_len });
                    }
                    output.resize(decoded_len, 0);
                    raw::decompress(&self.src, output)?;
                    verify_checksum(expected, output)?;
                    // a chunk of zero bytes is pointless but legal; an empty
                    // result here must not read as end-of-stream
                    if !output.is_empty() {
                        return;
                    }
                }
                Ok(ChunkType::Uncompressed) => {
                    let expected = self.read_data_payload(len)?;
                    output.extend_from_slice(&self.src);
                    verify_checksum(expected, output)?;
                    if !output.is_empty() {
                        return;
                    }
                }
                Err(reserved) if (0x80..=0xfd).contains(&reserved) => self.skip(len)?,
                Err(reserved) => throw!(Error::ReservedUnskippableChunk(reserved)),
            }
        }
    }

    /// Read a data chunk's checksum and payload (into `self.src`), after
    /// validating the declared length.
    #[throws]
    fn read_data_payload(&mut self, len: usize) -> u32 {
        if len < CHUNK_CRC_SIZE || len > MAX_DATA_CHUNK_LEN {
            throw!(Error::InvalidChunkLength { len });
        }
        let mut crc = [0u8; CHUNK_CRC_SIZE];
        read_exact_or_truncated(&mut self.reader, &mut crc)?;
        self.src.resize(len - CHUNK_CRC_SIZE, 0);
        read_exact_or_truncated(&mut self.reader, &mut self.src)?;
        LE::read_u32(&crc)
    }

    /// Drain `len` bytes of a chunk nobody cares about.
    #[throws]
    fn skip(&mut self, len: usize) {
        let mut scratch = [0u8; 512];
        let mut remaining = len;
        while remaining > 0 {
            let n = cmp::min(scratch.len(), remaining);
            read_exact_or_truncated(&mut self.reader, &mut scratch[..n])?;
            remaining -= n;
        }
    }
}

#[throws]
fn verify_checksum(expected: u32, data: &[u8]) {
    let actual = crc32c_masked(data);
    if expected != actual {
        throw!(Error::ChecksumMismatch { expected, actual });
    }
}

/// Like `Read::read_exact`, except a clean EOF before the first byte returns
/// `Ok(false)` instead of an error.
fn read_exact_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool, Error> {
    match reader.read(buf) {
        Ok(0) => Ok(false),
        Ok(n) if n == buf.len() => Ok(true),
        Ok(n) => {
            read_exact_or_truncated(reader, &mut buf[n..])?;
            Ok(true)
        }
        Err(ref e) if e.kind() == ErrorKind::Interrupted => read_exact_eof(reader, buf),
        Err(e) => Err(Error::InputError(e)),
    }
}

/// `Read::read_exact` with EOF reported as stream corruption: once a chunk
/// header declared more bytes, they have to be there.
fn read_exact_or_truncated<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), Error> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::TruncatedChunk
        } else {
            Error::InputError(e)
        }
    })
}

/// Convenience wrapper around `FrameReader` that reads everything into a vector and returns it.
#[throws]
pub fn decompress_frame<R: Read>(reader: R) -> Vec<u8> {
    let mut plaintext = Vec::new();
    FrameReader::new(reader).into_read().read_to_end(&mut plaintext)?;
    plaintext
}

#[cfg(test)]
mod tests {
    use super::super::compress_frame;
    use super::*;
    use crate::crc32c::crc32c_masked;
    use std::io::Cursor;

    fn compress(input: &[u8]) -> Vec<u8> {
        let mut stream = Vec::new();
        compress_frame(Cursor::new(input), &mut stream).unwrap();
        stream
    }

    fn decompress(stream: &[u8]) -> Result<Vec<u8>, DecompressionError> {
        let mut out = Vec::new();
        let mut reader = FrameReader::new(Cursor::new(stream));
        loop {
            let mut chunk = Vec::new();
            reader.decode_chunk(&mut chunk)?;
            if chunk.is_empty() {
                return Ok(out);
            }
            out.extend_from_slice(&chunk);
        }
    }

    fn raw_chunk(chunk_type: u8, data: &[u8]) -> Vec<u8> {
        let mut chunk = vec![chunk_type, 0, 0, 0];
        LE::write_u24(&mut chunk[1..4], (4 + data.len()) as u32);
        let mut crc = [0u8; 4];
        LE::write_u32(&mut crc, crc32c_masked(data));
        chunk.extend_from_slice(&crc);
        chunk.extend_from_slice(data);
        chunk
    }

    #[test]
    fn round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog, twice: \
                     the quick brown fox jumps over the lazy dog";
        assert_eq!(decompress(&compress(data)).unwrap(), data.as_ref());
    }

    #[test]
    fn empty_input_is_an_empty_stream() {
        assert_eq!(decompress(b"").unwrap(), b"");
    }

    #[test]
    fn skippable_chunks_are_skipped() {
        let mut stream = super::super::STREAM_IDENTIFIER.to_vec();
        stream.extend_from_slice(&[0xfe, 0x03, 0x00, 0x00, 1, 2, 3]); // padding
        stream.extend_from_slice(&raw_chunk(0x01, b"abc"));
        stream.extend_from_slice(&[0x80, 0x02, 0x00, 0x00, 9, 9]); // reserved skippable
        stream.extend_from_slice(&raw_chunk(0x01, b"def"));
        assert_eq!(decompress(&stream).unwrap(), b"abcdef");
    }

    #[test]
    fn unskippable_chunks_are_fatal() {
        let mut stream = super::super::STREAM_IDENTIFIER.to_vec();
        stream.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        match decompress(&stream) {
            Err(DecompressionError::ReservedUnskippableChunk(0x02)) => {}
            other => panic!("expected ReservedUnskippableChunk, got {:?}", other),
        }
    }

    #[test]
    fn missing_identifier_is_fatal() {
        let stream = raw_chunk(0x01, b"abc");
        match decompress(&stream) {
            Err(DecompressionError::MissingStreamIdentifier(0x01)) => {}
            other => panic!("expected MissingStreamIdentifier, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_identifier_is_fatal() {
        let mut stream = super::super::STREAM_IDENTIFIER.to_vec();
        stream.extend_from_slice(&raw_chunk(0x01, b"abc"));
        stream.extend_from_slice(super::super::STREAM_IDENTIFIER);
        stream.extend_from_slice(&raw_chunk(0x01, b"def"));
        match decompress(&stream) {
            Err(DecompressionError::DuplicateStreamIdentifier) => {}
            other => panic!("expected DuplicateStreamIdentifier, got {:?}", other),
        }
    }

    #[test]
    fn mangled_identifier_is_fatal() {
        let mut stream = super::super::STREAM_IDENTIFIER.to_vec();
        stream[4] = b'x';
        stream.extend_from_slice(&raw_chunk(0x01, b"abc"));
        match decompress(&stream) {
            Err(DecompressionError::StreamIdentifierMismatch) => {}
            other => panic!("expected StreamIdentifierMismatch, got {:?}", other),
        }
    }

    #[test]
    fn flipped_payload_bit_is_fatal() {
        let data = b"checksums exist for a reason";
        let stream = compress(data);
        for bit in 0..8 {
            let mut corrupted = stream.clone();
            let last = corrupted.len() - 1;
            corrupted[last] ^= 1 << bit;
            match decompress(&corrupted) {
                Err(DecompressionError::ChecksumMismatch { .. })
                | Err(DecompressionError::CodecError(_)) => {}
                other => panic!("bit {}: expected corruption error, got {:?}", bit, other),
            }
        }
    }

    #[test]
    fn flipped_checksum_bit_is_fatal() {
        let stream = compress(b"checksums exist for a reason");
        let mut corrupted = stream.clone();
        corrupted[14] ^= 0x01; // inside the crc field of the first data chunk
        match decompress(&corrupted) {
            Err(DecompressionError::ChecksumMismatch { .. }) => {}
            other => panic!("expected ChecksumMismatch, got {:?}", other),
        }
    }

    #[test]
    fn truncation_is_fatal() {
        let stream = compress(b"do not cut me off");
        for cut in 1..stream.len() {
            if cut == super::super::STREAM_IDENTIFIER.len() {
                // ending right after the identifier is just an empty stream
                assert_eq!(decompress(&stream[..cut]).unwrap(), b"");
                continue;
            }
            match decompress(&stream[..cut]) {
                Err(DecompressionError::TruncatedChunk) => {}
                other => panic!("cut {}: expected TruncatedChunk, got {:?}", cut, other),
            }
        }
    }

    #[test]
    fn oversized_chunk_length_is_fatal() {
        let mut stream = super::super::STREAM_IDENTIFIER.to_vec();
        stream.extend_from_slice(&[0x01, 0xff, 0xff, 0xff]);
        stream.extend_from_slice(&[0u8; 64]);
        match decompress(&stream) {
            Err(DecompressionError::InvalidChunkLength { .. }) => {}
            other => panic!("expected InvalidChunkLength, got {:?}", other),
        }
    }

    #[test]
    fn io_reader_matches_chunkwise_decoding() {
        let data: Vec<u8> = (0..50_000u32).map(|n| (n % 251) as u8).collect();
        let stream = compress(&data);

        let mut bulk = Vec::new();
        FrameReader::new(Cursor::new(&stream))
            .into_read()
            .read_to_end(&mut bulk)
            .unwrap();
        assert_eq!(bulk, data);
    }
}
