#![no_main]
use libfuzzer_sys::fuzz_target;
use snappy_compression::framed::decompress_frame;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    let compressed = reference_compress(data);
    let decompressed = decompress_frame(Cursor::new(compressed))
        .expect("Failed to decompress data compressed by the reference implementation");
    assert!(
        data == decompressed.as_slice(),
        "Decompression result did not match the original input"
    );
});

// compress data using the reference snappy implementation
fn reference_compress(data: &[u8]) -> Vec<u8> {
    let mut writer = snap::write::FrameEncoder::new(Vec::new());
    std::io::Write::write_all(&mut writer, data).unwrap();
    writer.into_inner().unwrap()
}
