//! Native PNG text-chunk walker.
//!
//! ComfyUI and Automatic1111 embed their provenance payloads as PNG `tEXt`
//! chunks (`prompt`/`workflow` JSON and the `parameters` block). The chunk
//! stream is walked directly: 4-byte big-endian length, 4-byte type, data,
//! 4-byte CRC. `iTXt` is also handled in its uncompressed form; compressed
//! iTXt is rare in generator output and is skipped.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Read all textual chunks of a PNG file as a keyword -> value map.
///
/// Fails when the file cannot be opened or does not start with the PNG
/// signature; a well-formed PNG without text chunks yields an empty map.
pub fn read_text_chunks(path: &Path) -> Result<HashMap<String, String>> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut signature = [0u8; 8];
    reader.read_exact(&mut signature)?;
    if signature != PNG_SIGNATURE {
        bail!("not a PNG container: {}", path.display());
    }

    let mut chunks = HashMap::new();

    loop {
        let mut len_buf = [0u8; 4];
        if reader.read_exact(&mut len_buf).is_err() {
            break;
        }
        let chunk_len = u32::from_be_bytes(len_buf) as usize;

        let mut type_buf = [0u8; 4];
        if reader.read_exact(&mut type_buf).is_err() {
            break;
        }

        match &type_buf {
            b"IEND" => break,
            b"tEXt" | b"iTXt" => {
                let mut data = vec![0u8; chunk_len];
                if reader.read_exact(&mut data).is_err() {
                    break;
                }
                let mut crc = [0u8; 4];
                let _ = reader.read_exact(&mut crc);

                if &type_buf == b"tEXt" {
                    parse_text_chunk(&data, &mut chunks);
                } else {
                    parse_itxt_chunk(&data, &mut chunks);
                }
            }
            _ => {
                // Skip data + CRC of chunks we do not care about.
                let mut skip = vec![0u8; chunk_len + 4];
                if reader.read_exact(&mut skip).is_err() {
                    break;
                }
            }
        }
    }

    Ok(chunks)
}

/// `tEXt` payload: keyword\0value. Latin-1 per the standard, but generator
/// tools write UTF-8 in practice, so lossy UTF-8 decoding is used.
fn parse_text_chunk(data: &[u8], chunks: &mut HashMap<String, String>) {
    let Some(null_pos) = data.iter().position(|&b| b == 0) else {
        return;
    };
    let keyword = String::from_utf8_lossy(&data[..null_pos]).to_string();
    if keyword.is_empty() {
        return;
    }
    let value = String::from_utf8_lossy(&data[null_pos + 1..]).to_string();
    chunks.insert(keyword, value);
}

/// `iTXt` payload: keyword\0compression_flag compression_method
/// language\0translated_keyword\0text.
fn parse_itxt_chunk(data: &[u8], chunks: &mut HashMap<String, String>) {
    let Some(keyword_end) = data.iter().position(|&b| b == 0) else {
        return;
    };
    let keyword = String::from_utf8_lossy(&data[..keyword_end]).to_string();
    if keyword.is_empty() {
        return;
    }

    let mut offset = keyword_end + 1;
    if offset + 2 > data.len() {
        return;
    }
    let compression_flag = data[offset];
    offset += 2; // compression_flag + compression_method

    // language tag, then translated keyword, both null-terminated
    for _ in 0..2 {
        match data[offset..].iter().position(|&b| b == 0) {
            Some(null_pos) => offset += null_pos + 1,
            None => return,
        }
    }

    if offset <= data.len() && compression_flag == 0 {
        let text = String::from_utf8_lossy(&data[offset..]).to_string();
        chunks.insert(keyword, text);
    }
}
