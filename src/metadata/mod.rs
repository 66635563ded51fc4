//! Embedded metadata extraction from generated images.

pub mod normalize;
pub mod png_text;

use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::IngestError;

pub use normalize::{normalize, NormalizedMetadata, Provenance};

/// Raw embedded fields of one image, before normalization.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedMetadata {
    pub prompt: Option<String>,
    pub workflow: Option<String>,
    pub parameters: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Original capture timestamp from EXIF, when the container carries one.
    pub taken_at: Option<DateTime<Utc>>,
}

/// Read the embedded provenance fields and basic image attributes of a PNG.
///
/// Fails only when the file itself is unreadable or not a PNG; an image
/// without any text chunks is valid and yields empty fields.
pub fn read_embedded(path: &Path) -> Result<EmbeddedMetadata, IngestError> {
    let mut chunks = png_text::read_text_chunks(path)
        .map_err(|e| IngestError::read(path, e.to_string()))?;

    let mut metadata = EmbeddedMetadata {
        prompt: chunks.remove("prompt"),
        workflow: chunks.remove("workflow"),
        parameters: chunks.remove("parameters"),
        ..Default::default()
    };

    if let Ok(reader) = image::ImageReader::open(path) {
        if let Ok(dims) = reader.into_dimensions() {
            metadata.width = Some(dims.0);
            metadata.height = Some(dims.1);
        }
    }

    metadata.taken_at = read_exif_taken_at(path);

    Ok(metadata)
}

/// EXIF `DateTimeOriginal`, when present. PNGs from generator tools rarely
/// carry an eXIf chunk, so absence is the common case.
fn read_exif_taken_at(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;

    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let display = field.display_value().to_string();
    let display = display.trim_matches('"');

    for format in ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(display, format) {
            return Some(naive.and_utc());
        }
    }
    None
}
