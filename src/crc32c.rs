//! Masked CRC32C checksums as used by the framed format.
//!
//! Every data chunk carries the Castagnoli CRC of its *uncompressed* bytes,
//! passed through a fixed bit-rotation mask. The mask exists so that data
//! containing embedded CRCs (think: a snappy stream of snappy streams) does
//! not produce degenerate checksums.

use crc::{Crc, CRC_32_ISCSI};

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Unmasked CRC32C (Castagnoli polynomial) of `data`.
pub fn crc32c(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}

/// The masked checksum stored in the stream: rotate right by 15, then add a constant.
pub fn crc32c_masked(data: &[u8]) -> u32 {
    mask(crc32c(data))
}

fn mask(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(0xa282_ead8)
}
