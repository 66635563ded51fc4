//! Ingestion orchestrator.
//!
//! Drives one image end-to-end: existence check, metadata extraction,
//! provenance resolution, entity upserts and the final generation insert.
//! Batch mode walks configured roots and isolates per-file failures so one
//! corrupt image never aborts a directory sweep.
//!
//! Processing is strictly sequential per image. The entity upserts are
//! conflict-safe at the storage layer, but nothing here runs concurrently.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::auto1111;
use crate::comfy::resolve::{self, PromptRole};
use crate::comfy::WorkflowGraph;
use crate::db::entities::{
    self, clean_name, get_or_create_checkpoints, get_or_create_file_type, get_or_create_loras,
    get_or_create_prompts,
};
use crate::db::{generations, ksamplers, Database, NewGeneration, NewKSampler};
use crate::error::IngestError;
use crate::metadata::{self, Provenance};

/// Terminal state of one image's ingestion. Failure is the `Err` side of
/// the pipeline result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new generation row was created.
    Ingested(i64),
    /// The location was already cataloged and no forced update was asked.
    Skipped(i64),
}

impl IngestOutcome {
    pub fn generation_id(self) -> i64 {
        match self {
            IngestOutcome::Ingested(id) | IngestOutcome::Skipped(id) => id,
        }
    }
}

/// Counters for a batch sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub ingested: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Entities resolved for one image, ready to be linked.
#[derive(Debug, Default)]
struct ResolvedEntities {
    checkpoint_ids: Vec<i64>,
    lora_links: Vec<(i64, f64, f64)>,
    samplers: Vec<NewKSampler>,
}

pub struct Ingestor<'a> {
    db: &'a Database,
}

impl<'a> Ingestor<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Ingest a single image.
    ///
    /// Without `force`, a location that is already cataloged short-circuits
    /// to [`IngestOutcome::Skipped`]. With `force`, the prior generation is
    /// fully removed (links first) and the pipeline re-runs from scratch.
    pub fn ingest_file(&self, path: &Path, force: bool) -> Result<IngestOutcome> {
        let location = resolve_location(path);
        let location_str = location.to_string_lossy().to_string();

        if let Some(existing) = generations::find_by_location(self.db, &location_str)? {
            if !force {
                debug!("already cataloged, skipping: {location_str}");
                return Ok(IngestOutcome::Skipped(existing));
            }
            info!("forced update, replacing generation {existing}: {location_str}");
            generations::delete_generation(self.db, existing)?;
        }

        // Extracting
        let embedded = metadata::read_embedded(&location)?;
        let normalized = metadata::normalize(embedded);

        // Resolving
        let resolved = match &normalized.source {
            Provenance::ComfyUi(graph) => self.resolve_comfy(graph)?,
            Provenance::Automatic1111(text) => self.resolve_auto1111(text)?,
            Provenance::None => {
                debug!("no provenance metadata in {location_str}");
                ResolvedEntities::default()
            }
        };

        // Persisting
        let fs_meta = std::fs::metadata(&location)
            .map_err(|e| IngestError::read(&location, e.to_string()))?;
        let date_created = normalized.taken_at.or_else(|| filesystem_timestamp(&fs_meta));

        let extension = location
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "png".to_string());
        let file_type_id = get_or_create_file_type(self.db, &extension)?;

        let name = location
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| location_str.clone());

        let generation_id = generations::insert_generation(
            self.db,
            &NewGeneration {
                file_type_id,
                source: normalized.source_tag().map(String::from),
                name,
                file_location: location_str,
                width: normalized.width.map(i64::from),
                height: normalized.height.map(i64::from),
                date_created,
                size: fs_meta.len() as i64,
                raw_json: serde_json::to_string(&normalized.raw)?,
            },
        )?;

        generations::link_checkpoints(self.db, generation_id, &resolved.checkpoint_ids)?;
        generations::link_loras(self.db, generation_id, &resolved.lora_links)?;
        let sampler_ids = ksamplers::insert_ksamplers(self.db, &resolved.samplers)?;
        generations::link_ksamplers(self.db, generation_id, &sampler_ids)?;

        info!("cataloged generation {generation_id}");
        Ok(IngestOutcome::Ingested(generation_id))
    }

    /// Recursively ingest every `.png` under `root`, continuing past
    /// per-file failures.
    pub fn ingest_directory(&self, root: &Path, force: bool) -> Result<BatchSummary> {
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .is_some_and(|ext| ext.to_string_lossy().eq_ignore_ascii_case("png"))
            })
            .map(|e| e.path().to_path_buf())
            .collect();
        files.sort();

        let mut summary = BatchSummary::default();
        for file in files {
            match self.ingest_file(&file, force) {
                Ok(IngestOutcome::Ingested(_)) => summary.ingested += 1,
                Ok(IngestOutcome::Skipped(_)) => summary.skipped += 1,
                Err(e) => {
                    warn!("failed to ingest {}: {e:#}", file.display());
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Batch-ingest all configured library roots.
    pub fn ingest_all(&self, roots: &[PathBuf], force: bool) -> Result<BatchSummary> {
        let mut total = BatchSummary::default();
        for root in roots {
            info!("scanning {}", root.display());
            let summary = self.ingest_directory(root, force)?;
            total.ingested += summary.ingested;
            total.skipped += summary.skipped;
            total.failed += summary.failed;
        }
        Ok(total)
    }

    fn resolve_comfy(&self, graph: &WorkflowGraph) -> Result<ResolvedEntities> {
        entities::register_nodes(self.db, graph.class_types())?;

        let checkpoint_nodes = graph.checkpoints();
        let checkpoint_names: Vec<String> =
            checkpoint_nodes.iter().map(|(_, name)| name.clone()).collect();
        let checkpoint_ids = get_or_create_checkpoints(self.db, &checkpoint_names)?;
        let checkpoint_by_node: HashMap<&str, i64> = checkpoint_nodes
            .iter()
            .filter_map(|(node_id, name)| {
                checkpoint_ids
                    .get(clean_name(name))
                    .map(|id| (node_id.as_str(), *id))
            })
            .collect();

        let prompt_nodes = graph.prompts();
        let prompt_texts: Vec<String> =
            prompt_nodes.iter().map(|(_, text)| text.clone()).collect();
        let prompt_ids = get_or_create_prompts(self.db, &prompt_texts)?;
        let prompt_by_node: HashMap<&str, i64> = prompt_nodes
            .iter()
            .filter_map(|(node_id, text)| {
                prompt_ids.get(text).map(|id| (node_id.as_str(), *id))
            })
            .collect();

        let lora_uses = graph.loras();
        let lora_names: Vec<String> = lora_uses.iter().map(|l| l.name.clone()).collect();
        let lora_ids = get_or_create_loras(self.db, &lora_names)?;
        let lora_links = lora_uses
            .iter()
            .filter_map(|l| {
                lora_ids
                    .get(clean_name(&l.name))
                    .map(|id| (*id, l.model_strength, l.clip_strength))
            })
            .collect();

        let mut samplers = Vec::new();
        for (node_id, inputs) in graph.samplers() {
            let checkpoint_id = inputs
                .model
                .as_deref()
                .and_then(|start| resolve::resolve_checkpoint(graph, start))
                .and_then(|terminal| checkpoint_by_node.get(terminal.as_str()).copied());
            if checkpoint_id.is_none() {
                warn!("sampler {node_id}: checkpoint unresolved, keeping NULL");
            }

            let positive_prompt_ids: Vec<i64> = inputs
                .positive
                .as_deref()
                .map(|start| resolve::resolve_prompts(graph, start, PromptRole::Positive))
                .unwrap_or_default()
                .iter()
                .filter_map(|terminal| prompt_by_node.get(terminal.as_str()).copied())
                .collect();
            if positive_prompt_ids.is_empty() {
                return Err(IngestError::UnresolvedPositivePrompt { node_id }.into());
            }

            let negative_prompt_ids: Vec<i64> = inputs
                .negative
                .as_deref()
                .map(|start| resolve::resolve_prompts(graph, start, PromptRole::Negative))
                .unwrap_or_default()
                .iter()
                .filter_map(|terminal| prompt_by_node.get(terminal.as_str()).copied())
                .collect();
            if negative_prompt_ids.is_empty() {
                warn!("sampler {node_id}: no negative prompt reachable, recording none");
            }

            let seed = resolve::resolve_seed(graph, &inputs);
            if seed.is_none() {
                warn!("sampler {node_id}: seed unresolved, keeping NULL");
            }

            samplers.push(NewKSampler {
                checkpoint_id,
                seed,
                steps: inputs.steps,
                cfg: inputs.cfg,
                sampler_name: inputs.sampler_name.clone(),
                scheduler: inputs.scheduler.clone(),
                denoise: inputs.denoise,
                positive_prompt_ids,
                negative_prompt_ids,
            });
        }

        let mut checkpoint_link_ids: Vec<i64> = checkpoint_by_node.values().copied().collect();
        checkpoint_link_ids.sort_unstable();
        checkpoint_link_ids.dedup();

        Ok(ResolvedEntities {
            checkpoint_ids: checkpoint_link_ids,
            lora_links,
            samplers,
        })
    }

    fn resolve_auto1111(&self, text: &str) -> Result<ResolvedEntities> {
        let block = auto1111::parse_parameters(text);
        let settings = block.sampler_settings();

        let mut positive_texts: Vec<String> = Vec::new();
        if !block.positive.is_empty() {
            positive_texts.push(block.positive.clone());
        }
        if let Some(hires) = block.hires_prompt() {
            positive_texts.push(hires.to_string());
        }
        let mut all_texts = positive_texts.clone();
        if !block.negative.is_empty() {
            all_texts.push(block.negative.clone());
        }
        let prompt_ids = get_or_create_prompts(self.db, &all_texts)?;

        let checkpoint_ids = match &settings.model {
            Some(model) => {
                let name = with_default_extension(model);
                get_or_create_checkpoints(self.db, &[name])?
                    .into_values()
                    .collect()
            }
            None => Vec::new(),
        };

        let lora_uses = block.loras();
        let lora_names: Vec<String> = lora_uses.iter().map(|l| l.name.clone()).collect();
        let lora_ids = get_or_create_loras(self.db, &lora_names)?;
        let lora_links = lora_uses
            .iter()
            .filter_map(|l| {
                lora_ids
                    .get(clean_name(&l.name))
                    .map(|id| (*id, l.model_strength, l.clip_strength))
            })
            .collect();

        let mut samplers = Vec::new();
        if !block.fields.is_empty() {
            samplers.push(NewKSampler {
                checkpoint_id: checkpoint_ids.first().copied(),
                seed: settings.seed,
                steps: settings.steps,
                cfg: settings.cfg,
                sampler_name: settings.sampler_name.clone(),
                scheduler: settings.scheduler.clone(),
                denoise: settings.denoise,
                positive_prompt_ids: positive_texts
                    .iter()
                    .filter_map(|t| prompt_ids.get(t).copied())
                    .collect(),
                negative_prompt_ids: prompt_ids
                    .get(&block.negative)
                    .copied()
                    .into_iter()
                    .collect(),
            });
        }

        Ok(ResolvedEntities {
            checkpoint_ids,
            lora_links,
            samplers,
        })
    }
}

/// Stable identity of an ingested file: its canonical absolute path.
fn resolve_location(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

/// Automatic1111 records model and LoRA names without an extension;
/// the catalog keys weight files by a real file name.
fn with_default_extension(name: &str) -> String {
    if clean_name(name).contains('.') {
        name.to_string()
    } else {
        format!("{name}.safetensors")
    }
}

fn filesystem_timestamp(meta: &std::fs::Metadata) -> Option<DateTime<Utc>> {
    meta.created()
        .or_else(|_| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
