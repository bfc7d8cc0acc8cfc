//! Asynchronous frame entry points on top of tokio.
//!
//! These wrap the same chunk machinery as the synchronous layer and suspend
//! only at the inner reader/writer. Dropping a future in flight simply
//! abandons the operation; the value itself stays consistent because every
//! await point sits between whole I/O steps.

use std::cmp;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use byteorder::{ByteOrder, LE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::compress::encode_chunk;
use super::{
    DecompressionError, CHUNK_CRC_SIZE, CHUNK_HEADER_SIZE, MAX_CHUNK_INPUT, MAX_DATA_CHUNK_LEN,
    STREAM_BODY,
};
use crate::crc32c::crc32c_masked;
use crate::raw;
use crate::raw::{max_compressed_len, BlockTable};

/// The asynchronous twin of [`FrameWriter`](super::FrameWriter).
///
/// Implements `AsyncWrite`; call `shutdown` (or at least `flush`) before
/// dropping it, otherwise buffered bytes are lost.
pub struct AsyncFrameWriter<W> {
    inner: W,
    /// Bytes accepted but not yet framed.
    src: Vec<u8>,
    /// An encoded chunk on its way into `inner`.
    pending: Vec<u8>,
    pending_pos: usize,
    scratch: Vec<u8>,
    table: BlockTable,
    wrote_stream_ident: bool,
}

impl<W: AsyncWrite + Unpin> AsyncFrameWriter<W> {
    pub fn new(inner: W) -> Self {
        AsyncFrameWriter {
            inner,
            src: Vec::with_capacity(MAX_CHUNK_INPUT),
            pending: Vec::new(),
            pending_pos: 0,
            scratch: vec![0; max_compressed_len(MAX_CHUNK_INPUT)],
            table: BlockTable::new(),
            wrote_stream_ident: false,
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Gets the underlying writer back. Flush first.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Push the staged chunk bytes into the inner writer.
    fn poll_drain(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while self.pending_pos < self.pending.len() {
            let n = ready!(
                Pin::new(&mut self.inner).poll_write(cx, &self.pending[self.pending_pos..])
            )?;
            if n == 0 {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "inner writer refused the chunk",
                )));
            }
            self.pending_pos += n;
        }
        self.pending.clear();
        self.pending_pos = 0;
        Poll::Ready(Ok(()))
    }

    /// Turn the accumulated bytes into the next staged chunk.
    fn stage_chunk(&mut self) -> io::Result<()> {
        debug_assert!(self.pending.is_empty());
        encode_chunk(
            &self.src,
            &mut self.table,
            &mut self.scratch,
            &mut self.wrote_stream_ident,
            &mut self.pending,
        )?;
        self.src.clear();
        Ok(())
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for AsyncFrameWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        loop {
            // nothing is consumed from `buf` until all staged bytes are out,
            // so a Pending here never loses data
            ready!(this.poll_drain(cx))?;
            if this.src.len() == MAX_CHUNK_INPUT {
                this.stage_chunk()?;
                continue;
            }
            let free = MAX_CHUNK_INPUT - this.src.len();
            let n = cmp::min(free, buf.len());
            this.src.extend_from_slice(&buf[..n]);
            return Poll::Ready(Ok(n));
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            ready!(this.poll_drain(cx))?;
            if this.src.is_empty() {
                break;
            }
            this.stage_chunk()?;
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.as_mut().poll_flush(cx))?;
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

enum ReadState {
    Header,
    Body,
    Skip,
    Eof,
}

/// The asynchronous twin of [`FrameReader`](super::FrameReader), as an
/// `AsyncRead`.
pub struct AsyncFrameReader<R> {
    inner: R,
    state: ReadState,
    header: [u8; CHUNK_HEADER_SIZE],
    header_filled: usize,
    chunk_type: u8,
    body_filled: usize,
    /// Bytes left to drain from a padding or skippable chunk.
    skip_remaining: usize,
    /// Chunk payload being assembled.
    src: Vec<u8>,
    /// Decoded bytes not yet handed to the caller.
    dst: Vec<u8>,
    dsts: usize,
    dste: usize,
    read_stream_ident: bool,
}

impl<R: AsyncRead + Unpin> AsyncFrameReader<R> {
    pub fn new(inner: R) -> Self {
        AsyncFrameReader {
            inner,
            state: ReadState::Header,
            header: [0; CHUNK_HEADER_SIZE],
            header_filled: 0,
            chunk_type: 0,
            body_filled: 0,
            skip_remaining: 0,
            src: Vec::new(),
            dst: Vec::new(),
            dsts: 0,
            dste: 0,
            read_stream_ident: false,
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Validate a freshly read chunk header and size `src` for its body.
    fn start_body(&mut self) -> Result<(), DecompressionError> {
        self.chunk_type = self.header[0];
        let len = LE::read_u24(&self.header[1..]) as usize;

        match self.chunk_type {
            0xff => {
                if self.read_stream_ident {
                    return Err(DecompressionError::DuplicateStreamIdentifier);
                }
                if len != STREAM_BODY.len() {
                    return Err(DecompressionError::StreamIdentifierMismatch);
                }
            }
            _ if !self.read_stream_ident => {
                return Err(DecompressionError::MissingStreamIdentifier(self.chunk_type));
            }
            0x00 | 0x01 => {
                if len < CHUNK_CRC_SIZE || len > MAX_DATA_CHUNK_LEN {
                    return Err(DecompressionError::InvalidChunkLength { len });
                }
            }
            0x02..=0x7f => {
                return Err(DecompressionError::ReservedUnskippableChunk(self.chunk_type));
            }
            // padding and reserved-skippable: drain the body through a small
            // scratch buffer, never allocating the declared length
            _ => {
                self.skip_remaining = len;
                self.state = ReadState::Skip;
                return Ok(());
            }
        }

        self.src.resize(len, 0);
        self.body_filled = 0;
        self.state = ReadState::Body;
        Ok(())
    }

    /// Act on a fully buffered chunk body.
    fn finish_body(&mut self) -> Result<(), DecompressionError> {
        self.state = ReadState::Header;
        self.header_filled = 0;

        match self.chunk_type {
            0xff => {
                if self.src != STREAM_BODY {
                    return Err(DecompressionError::StreamIdentifierMismatch);
                }
                self.read_stream_ident = true;
            }
            0x00 => {
                let expected = LE::read_u32(&self.src);
                let payload = &self.src[CHUNK_CRC_SIZE..];
                let decoded_len = raw::decompress_len(payload)?;
                if decoded_len > MAX_CHUNK_INPUT {
                    return Err(DecompressionError::InvalidChunkLength { len: decoded_len });
                }
                self.dst.resize(decoded_len, 0);
                raw::decompress(payload, &mut self.dst)?;
                verify(expected, &self.dst)?;
                self.dsts = 0;
                self.dste = decoded_len;
            }
            0x01 => {
                let expected = LE::read_u32(&self.src);
                let n = self.src.len() - CHUNK_CRC_SIZE;
                self.dst.resize(n, 0);
                self.dst.copy_from_slice(&self.src[CHUNK_CRC_SIZE..]);
                verify(expected, &self.dst)?;
                self.dsts = 0;
                self.dste = n;
            }
            _ => {}
        }
        Ok(())
    }
}

fn verify(expected: u32, data: &[u8]) -> Result<(), DecompressionError> {
    let actual = crc32c_masked(data);
    if expected != actual {
        return Err(DecompressionError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

impl<R: AsyncRead + Unpin> AsyncRead for AsyncFrameReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        loop {
            if this.dsts < this.dste {
                let n = cmp::min(this.dste - this.dsts, buf.remaining());
                buf.put_slice(&this.dst[this.dsts..this.dsts + n]);
                this.dsts += n;
                return Poll::Ready(Ok(()));
            }
            match this.state {
                ReadState::Eof => return Poll::Ready(Ok(())),
                ReadState::Header => {
                    while this.header_filled < CHUNK_HEADER_SIZE {
                        let mut read_buf = ReadBuf::new(&mut this.header[this.header_filled..]);
                        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
                        let n = read_buf.filled().len();
                        if n == 0 {
                            if this.header_filled == 0 {
                                this.state = ReadState::Eof;
                                return Poll::Ready(Ok(()));
                            }
                            return Poll::Ready(Err(DecompressionError::TruncatedChunk.into()));
                        }
                        this.header_filled += n;
                    }
                    this.start_body()?;
                }
                ReadState::Body => {
                    while this.body_filled < this.src.len() {
                        let mut read_buf = ReadBuf::new(&mut this.src[this.body_filled..]);
                        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
                        let n = read_buf.filled().len();
                        if n == 0 {
                            return Poll::Ready(Err(DecompressionError::TruncatedChunk.into()));
                        }
                        this.body_filled += n;
                    }
                    this.finish_body()?;
                }
                ReadState::Skip => {
                    let mut scratch = [0u8; 512];
                    while this.skip_remaining > 0 {
                        let n = cmp::min(scratch.len(), this.skip_remaining);
                        let mut read_buf = ReadBuf::new(&mut scratch[..n]);
                        ready!(Pin::new(&mut this.inner).poll_read(cx, &mut read_buf))?;
                        let got = read_buf.filled().len();
                        if got == 0 {
                            return Poll::Ready(Err(DecompressionError::TruncatedChunk.into()));
                        }
                        this.skip_remaining -= got;
                    }
                    this.state = ReadState::Header;
                    this.header_filled = 0;
                }
            }
        }
    }
}

/// Compress everything `reader` yields into `writer` as one stream,
/// returning the writer.
pub async fn compress_frame_async<R, W>(mut reader: R, writer: W) -> io::Result<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut writer = AsyncFrameWriter::new(writer);
    tokio::io::copy(&mut reader, &mut writer).await?;
    writer.shutdown().await?;
    Ok(writer.into_inner())
}

/// Read a whole stream into a vector.
pub async fn decompress_frame_async<R>(reader: R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut plaintext = Vec::new();
    AsyncFrameReader::new(reader).read_to_end(&mut plaintext).await?;
    Ok(plaintext)
}
