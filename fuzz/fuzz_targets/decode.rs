#![no_main]
use libfuzzer_sys::fuzz_target;
use snappy_compression::framed::FrameReader;
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    let mut reader = FrameReader::new(Cursor::new(data)).into_read();
    let mut buffer = vec![0; 4096];
    let mut result = reader.read(&mut buffer);
    while result.is_ok() && result.unwrap() > 0 {
        result = reader.read(&mut buffer);
    }
});
