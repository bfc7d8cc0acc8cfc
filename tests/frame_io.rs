use snappy_compression::framed::{compress_frame, decompress_frame, FrameReader, FrameWriter};
use rand::prelude::*;
use std::io::{Cursor, Read, Write};

/// A reader that hands out at most `cap` bytes per call, to exercise the
/// chunk reassembly paths.
struct DribbleReader<R> {
    inner: R,
    cap: usize,
}

impl<R: Read> Read for DribbleReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.cap.min(buf.len());
        self.inner.read(&mut buf[..n])
    }
}

fn mixed_data(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut data = vec![0u8; len];
    // half random, half repetitive, so both chunk representations show up
    rng.fill(&mut data[..len / 2]);
    for (i, slot) in data[len / 2..].iter_mut().enumerate() {
        *slot = (i % 64) as u8;
    }
    data
}

#[test]
fn bulk_round_trip() {
    let data = mixed_data(1_000_000);
    let mut stream = Vec::new();
    compress_frame(Cursor::new(&data), &mut stream).unwrap();
    assert_eq!(decompress_frame(Cursor::new(&stream)).unwrap(), data);
}

#[test]
fn randomly_chunked_writes_round_trip() {
    let data = mixed_data(400_000);
    let mut rng = StdRng::seed_from_u64(42);

    let mut writer = FrameWriter::new(Vec::new());
    let mut at = 0;
    while at < data.len() {
        let n = rng.gen_range(1, 100).min(data.len() - at);
        writer.write_all(&data[at..at + n]).unwrap();
        at += n;
    }
    let stream = writer.finish().unwrap();

    assert_eq!(decompress_frame(Cursor::new(&stream)).unwrap(), data);
}

#[test]
fn randomly_chunked_reads_round_trip() {
    let data = mixed_data(400_000);
    let mut stream = Vec::new();
    compress_frame(Cursor::new(&data), &mut stream).unwrap();

    let mut rng = StdRng::seed_from_u64(43);
    let mut reader = FrameReader::new(Cursor::new(&stream)).into_read();
    let mut decoded = Vec::new();
    let mut buf = [0u8; 100];
    loop {
        let n = rng.gen_range(1, buf.len());
        let got = reader.read(&mut buf[..n]).unwrap();
        if got == 0 {
            break;
        }
        decoded.extend_from_slice(&buf[..got]);
    }
    assert_eq!(decoded, data);
}

#[test]
fn single_byte_writes_match_bulk_output() {
    let data = mixed_data(200_000);

    let mut bulk = FrameWriter::new(Vec::new());
    bulk.write_all(&data).unwrap();
    let bulk_stream = bulk.finish().unwrap();

    let mut dribble = FrameWriter::new(Vec::new());
    for &byte in &data {
        dribble.write_all(&[byte]).unwrap();
    }
    let dribble_stream = dribble.finish().unwrap();

    assert_eq!(bulk_stream, dribble_stream);
}

#[test]
fn single_byte_underlying_reads_work() {
    let data = mixed_data(150_000);
    let mut stream = Vec::new();
    compress_frame(Cursor::new(&data), &mut stream).unwrap();

    let dribble = DribbleReader { inner: Cursor::new(&stream), cap: 1 };
    assert_eq!(decompress_frame(dribble).unwrap(), data);
}

#[test]
fn flush_boundaries_do_not_change_the_content() {
    let data = mixed_data(300_000);
    let mut rng = StdRng::seed_from_u64(44);

    let mut writer = FrameWriter::new(Vec::new());
    let mut at = 0;
    while at < data.len() {
        let n = rng.gen_range(1, 50_000).min(data.len() - at);
        writer.write_all(&data[at..at + n]).unwrap();
        if rng.gen_bool(0.3) {
            writer.flush().unwrap();
        }
        at += n;
    }
    let stream = writer.finish().unwrap();

    assert_eq!(decompress_frame(Cursor::new(&stream)).unwrap(), data);
}

#[test]
fn ten_megabytes_of_noise_survive_tiny_writes() {
    let mut rng = StdRng::seed_from_u64(0xdead_beef);
    let mut data = vec![0u8; 10 << 20];
    rng.fill(&mut data[..]);

    let mut writer = FrameWriter::new(Vec::new());
    let mut at = 0;
    while at < data.len() {
        let n = rng.gen_range(1, 100).min(data.len() - at);
        writer.write_all(&data[at..at + n]).unwrap();
        at += n;
    }
    let stream = writer.finish().unwrap();

    assert_eq!(decompress_frame(Cursor::new(&stream)).unwrap(), data);
}

#[test]
fn corrupting_any_payload_byte_is_detected() {
    // random bytes end up in an uncompressed chunk, where the payload is the
    // checksummed data itself, so every single flip must trip the CRC
    let mut rng = StdRng::seed_from_u64(45);
    let mut data = vec![0u8; 4_096];
    rng.fill(&mut data[..]);

    let mut stream = Vec::new();
    compress_frame(Cursor::new(&data), &mut stream).unwrap();

    // the first 14 bytes are the identifier plus the first chunk header;
    // everything after that is crc and payload
    for _ in 0..64 {
        let at = rng.gen_range(14, stream.len());
        let bit = rng.gen_range(0, 8);
        let mut corrupted = stream.clone();
        corrupted[at] ^= 1 << bit;
        assert!(
            decompress_frame(Cursor::new(&corrupted)).is_err(),
            "flip at byte {} bit {} went undetected",
            at,
            bit
        );
    }
}
