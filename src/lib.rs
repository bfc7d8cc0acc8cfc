//! Pure Rust implementation of the Snappy compression format.
//!
//! Two layers are exposed:
//!
//! * [`raw`] — the block format: a length prefix plus a tag stream of
//!   literals and back-copies. Fast, checksum-free, and only suitable when
//!   something else already delimits your data.
//! * [`framed`] — the streaming format: 64 KiB chunks with masked CRC32C
//!   checksums and an uncompressed fallback, behind ordinary
//!   `Read`/`Write` wrappers (and `AsyncRead`/`AsyncWrite` with the
//!   `async` feature).
//!
//! The wire format matches the reference implementation in both directions;
//! output from other Snappy libraries decodes here and vice versa.

#![forbid(unsafe_code)]

pub mod framed;
pub mod raw;

mod crc32c;
mod varint;
