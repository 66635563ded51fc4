//! gendex: a catalog for AI-image generation provenance.
//!
//! Ingests PNG outputs of ComfyUI and Automatic1111, extracts the embedded
//! provenance metadata and normalizes it into relational entities: the
//! checkpoint used, LoRA adapters applied, prompts submitted and sampler
//! parameters, all queryable by facet.

pub mod auto1111;
pub mod comfy;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod metadata;

#[cfg(test)]
pub(crate) mod testutil;
