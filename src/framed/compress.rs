use byteorder::{ByteOrder, LE};
use std::cmp;
use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;
use culpa::{throw, throws};

use super::{MAX_CHUNK_INPUT, STREAM_IDENTIFIER};
use crate::crc32c::crc32c_masked;
use crate::raw::{compress_with_table, max_compressed_len, BlockTable};

/// Errors when compressing a stream.
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("error reading from the input you gave me")]
    ReadError(io::Error),
    #[error("error writing to the output you gave me")]
    WriteError(#[from] io::Error),
}
type Error = CompressionError; // do it this way for better docs
impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        io::Error::new(ErrorKind::Other, e)
    }
}

/// Compress a stream.
///
/// This writer buffers up to 64 KiB and turns every full buffer (and whatever
/// is left at flush time) into one chunk. Each chunk carries the masked CRC32C
/// of its raw bytes; if compression does not shrink the bytes, they are stored
/// uncompressed instead, so a stream never grows by more than the chunk
/// framing.
///
/// Call [`finish`](FrameWriter::finish) (or at least `flush`) when you are
/// done: dropping the writer with buffered data silently loses it, like any
/// other buffered writer.
pub struct FrameWriter<W: Write> {
    inner: W,
    /// Bytes accepted from the caller but not yet turned into a chunk.
    src: Vec<u8>,
    /// The encoded chunk being assembled, headers and all.
    chunk: Vec<u8>,
    /// Compression scratch, sized once for the worst case.
    scratch: Vec<u8>,
    table: BlockTable,
    wrote_stream_ident: bool,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        FrameWriter {
            inner,
            src: Vec::with_capacity(MAX_CHUNK_INPUT),
            chunk: Vec::new(),
            scratch: vec![0; max_compressed_len(MAX_CHUNK_INPUT)],
            table: BlockTable::new(),
            wrote_stream_ident: false,
        }
    }

    /// Gets a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Gets a mutable reference to the underlying writer.
    ///
    /// Note that mutation of the stream may result in surprising results if
    /// this writer is continued to be used.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Flush any buffered bytes as a final chunk and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }

    fn emit_buffered_chunk(&mut self) -> io::Result<()> {
        self.chunk.clear();
        encode_chunk(
            &self.src,
            &mut self.table,
            &mut self.scratch,
            &mut self.wrote_stream_ident,
            &mut self.chunk,
        )?;
        self.inner.write_all(&self.chunk)?;
        self.src.clear();
        Ok(())
    }
}

impl<W: Write> Write for FrameWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut remaining = buf;
        while !remaining.is_empty() {
            let free = MAX_CHUNK_INPUT - self.src.len();
            if free == 0 {
                self.emit_buffered_chunk()?;
                continue;
            }
            let n = cmp::min(free, remaining.len());
            self.src.extend_from_slice(&remaining[..n]);
            remaining = &remaining[n..];
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.src.is_empty() {
            self.emit_buffered_chunk()?;
        }
        self.inner.flush()
    }
}

/// Encode `data` as one chunk, appending to `out`.
///
/// Emits the stream identifier first when this is the first chunk. `data`
/// must be non-empty and at most 64 KiB.
pub(crate) fn encode_chunk(
    data: &[u8],
    table: &mut BlockTable,
    scratch: &mut [u8],
    wrote_stream_ident: &mut bool,
    out: &mut Vec<u8>,
) -> io::Result<()> {
    debug_assert!(!data.is_empty() && data.len() <= MAX_CHUNK_INPUT);

    if !*wrote_stream_ident {
        out.extend_from_slice(STREAM_IDENTIFIER);
        *wrote_stream_ident = true;
    }

    // the checksum always covers the raw bytes, whichever representation wins
    let checksum = crc32c_masked(data);
    let compressed_len = compress_with_table(data, scratch, table)?;

    let (chunk_type, payload): (u8, &[u8]) = if compressed_len < data.len() {
        (super::ChunkType::Compressed as u8, &scratch[..compressed_len])
    } else {
        (super::ChunkType::Uncompressed as u8, data)
    };

    let mut header = [0u8; 8];
    header[0] = chunk_type;
    LE::write_u24(&mut header[1..4], (4 + payload.len()) as u32);
    LE::write_u32(&mut header[4..8], checksum);
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    Ok(())
}

/// Compress everything `reader` yields into `writer` as one stream.
#[throws]
pub fn compress_frame<R: Read, W: Write>(mut reader: R, writer: W) {
    let mut writer = FrameWriter::new(writer);
    let mut buf = vec![0u8; MAX_CHUNK_INPUT];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => throw!(Error::ReadError(e)),
        };
        writer.write_all(&buf[..n])?;
    }
    writer.finish()?;
}
