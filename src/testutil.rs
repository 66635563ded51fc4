//! Shared test fixtures.

use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Write a minimal but valid 1x1 RGBA PNG carrying the given tEXt chunks.
pub fn write_png_with_text(path: &Path, texts: &[(&str, &str)]) {
    let mut bytes: Vec<u8> = Vec::new();
    bytes.extend_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);

    // IHDR: 1x1, 8-bit RGBA
    let ihdr = [0, 0, 0, 1, 0, 0, 0, 1, 8, 6, 0, 0, 0];
    push_chunk(&mut bytes, b"IHDR", &ihdr);

    for (keyword, value) in texts {
        let mut data = Vec::new();
        data.extend_from_slice(keyword.as_bytes());
        data.push(0);
        data.extend_from_slice(value.as_bytes());
        push_chunk(&mut bytes, b"tEXt", &data);
    }

    // One zero RGBA pixel (filter byte + 4 samples) in a stored deflate
    // block, with its zlib header and adler32 checksum.
    let idat = [
        0x78, 0x01, 0x01, 0x05, 0x00, 0xFA, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x05,
        0x00, 0x01,
    ];
    push_chunk(&mut bytes, b"IDAT", &idat);
    push_chunk(&mut bytes, b"IEND", &[]);

    File::create(path).unwrap().write_all(&bytes).unwrap();
}

fn push_chunk(out: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(data);

    let mut crc_input = Vec::with_capacity(4 + data.len());
    crc_input.extend_from_slice(chunk_type);
    crc_input.extend_from_slice(data);
    out.extend_from_slice(&crc32(&crc_input).to_be_bytes());
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}
