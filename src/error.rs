//! Error taxonomy for the ingestion pipeline.
//!
//! Only conditions that abort one image's ingestion are modelled here.
//! Field-level parse failures and unresolved negative-prompt / checkpoint /
//! seed references degrade in place (logged, recorded as empty or NULL) and
//! never surface as errors. A duplicate file location is the normal skip
//! path, also not an error.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// The file is missing, unreadable, or not a PNG container.
    #[error("unreadable image {path}: {message}")]
    Read { path: PathBuf, message: String },

    /// No prompt-encode node is reachable from a sampler's positive input.
    /// Without its driving prompt the image cannot be meaningfully cataloged.
    #[error("sampler node {node_id}: no positive prompt reachable")]
    UnresolvedPositivePrompt { node_id: String },

    /// A checkpoint or LoRA name carried no file extension, so no FileType
    /// row can be resolved for it.
    #[error("{name:?} carries no file extension")]
    MissingExtension { name: String },
}

impl IngestError {
    pub fn read(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Read {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}
