#![no_main]
use libfuzzer_sys::fuzz_target;
use snappy_compression::framed::{compress_frame, decompress_frame};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let mut stream = Vec::new();
    compress_frame(Cursor::new(data), &mut stream).expect("Could not compress input data");

    let decompressed =
        decompress_frame(Cursor::new(stream)).expect("Could not decompress our own stream");
    assert!(data == decompressed.as_slice(), "Round trip did not match the original input");
});
