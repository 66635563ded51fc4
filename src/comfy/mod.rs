//! ComfyUI workflow-graph model.
//!
//! The `prompt` text chunk of a ComfyUI image is a mapping from node-id to a
//! node record carrying a `class_type` and an `inputs` map. Each input value
//! is either a literal or a two-element `[upstream_node_id, output_slot]`
//! reference. Known class types are lifted into typed variants at parse
//! time; everything else becomes `NodeKind::Other` but keeps its raw inputs
//! so reference chains can still be followed through it.

pub mod resolve;

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

const CLASS_CHECKPOINT_LOADER: &str = "CheckpointLoaderSimple";
const CLASS_PROMPT_ENCODE: &str = "CLIPTextEncode";
const CLASS_LORA_LOADER: &str = "LoraLoader";
const CLASS_LORA_STACK: &str = "CR LoRA Stack";
const CLASS_SAMPLER: &str = "KSampler";

/// One LoRA application: adapter name plus its strength pair.
#[derive(Debug, Clone, PartialEq)]
pub struct LoraUse {
    pub name: String,
    pub model_strength: f64,
    pub clip_strength: f64,
}

/// Sampler node inputs. `seed` keeps its raw value since it may be either a
/// literal number or a reference to an upstream seed provider.
#[derive(Debug, Clone)]
pub struct SamplerInputs {
    pub seed: Option<Value>,
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
    pub model: Option<String>,
    pub positive: Option<String>,
    pub negative: Option<String>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    CheckpointLoader { ckpt_name: String },
    PromptEncode { text: String },
    LoraLoader(LoraUse),
    /// Stack node contributing up to three adapters, each gated by an
    /// `On`/`Off` switch. Only the enabled slots are kept.
    LoraStack(Vec<LoraUse>),
    Sampler(SamplerInputs),
    Other,
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub class_type: String,
    pub kind: NodeKind,
    pub inputs: Map<String, Value>,
}

/// Parsed workflow graph: node-id -> node.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    nodes: BTreeMap<String, GraphNode>,
}

impl WorkflowGraph {
    /// Build a graph from the parsed `prompt` object. Records that do not
    /// look like nodes (no `class_type`) are ignored rather than failing
    /// the whole graph.
    pub fn from_nodes(raw: &Map<String, Value>) -> Self {
        let mut nodes = BTreeMap::new();
        for (node_id, record) in raw {
            let Some(class_type) = record.get("class_type").and_then(Value::as_str) else {
                continue;
            };
            let inputs = record
                .get("inputs")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let kind = classify(class_type, &inputs);
            nodes.insert(
                node_id.clone(),
                GraphNode {
                    class_type: class_type.to_string(),
                    kind,
                    inputs,
                },
            );
        }
        Self { nodes }
    }

    pub fn get(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GraphNode)> {
        self.nodes.iter()
    }

    /// Distinct `class_type` values observed in this graph, for the
    /// append-only node registry.
    pub fn class_types(&self) -> BTreeSet<String> {
        self.nodes.values().map(|n| n.class_type.clone()).collect()
    }

    /// Checkpoint-loader nodes as (node_id, checkpoint file name).
    pub fn checkpoints(&self) -> Vec<(String, String)> {
        self.nodes
            .iter()
            .filter_map(|(id, node)| match &node.kind {
                NodeKind::CheckpointLoader { ckpt_name } => {
                    Some((id.clone(), ckpt_name.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Prompt-encode nodes as (node_id, prompt text).
    pub fn prompts(&self) -> Vec<(String, String)> {
        self.nodes
            .iter()
            .filter_map(|(id, node)| match &node.kind {
                NodeKind::PromptEncode { text } => Some((id.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    /// Sampler nodes as (node_id, inputs).
    pub fn samplers(&self) -> Vec<(String, SamplerInputs)> {
        self.nodes
            .iter()
            .filter_map(|(id, node)| match &node.kind {
                NodeKind::Sampler(inputs) => Some((id.clone(), inputs.clone())),
                _ => None,
            })
            .collect()
    }

    /// All LoRA applications in the graph, deduplicated by the full
    /// (name, model-strength, clip-strength) triple. The same adapter at a
    /// different strength stays a distinct entry.
    pub fn loras(&self) -> Vec<LoraUse> {
        let mut seen: Vec<LoraUse> = Vec::new();
        for node in self.nodes.values() {
            match &node.kind {
                NodeKind::LoraLoader(lora) => push_unique(&mut seen, lora.clone()),
                NodeKind::LoraStack(slots) => {
                    for lora in slots {
                        push_unique(&mut seen, lora.clone());
                    }
                }
                _ => {}
            }
        }
        seen
    }
}

fn push_unique(seen: &mut Vec<LoraUse>, lora: LoraUse) {
    if !seen.contains(&lora) {
        seen.push(lora);
    }
}

/// Interpret an input value as a `[node_id, slot]` reference.
pub fn as_node_ref(value: &Value) -> Option<&str> {
    let array = value.as_array()?;
    array.first()?.as_str()
}

fn input_str(inputs: &Map<String, Value>, key: &str) -> Option<String> {
    inputs.get(key).and_then(Value::as_str).map(String::from)
}

fn input_f64(inputs: &Map<String, Value>, key: &str) -> Option<f64> {
    inputs.get(key).and_then(Value::as_f64)
}

fn input_i64(inputs: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = inputs.get(key)?;
    value.as_i64().or_else(|| value.as_u64().map(|u| u as i64))
}

fn input_node_ref(inputs: &Map<String, Value>, key: &str) -> Option<String> {
    inputs.get(key).and_then(as_node_ref).map(String::from)
}

fn classify(class_type: &str, inputs: &Map<String, Value>) -> NodeKind {
    match class_type {
        CLASS_CHECKPOINT_LOADER => match input_str(inputs, "ckpt_name") {
            Some(ckpt_name) => NodeKind::CheckpointLoader { ckpt_name },
            None => NodeKind::Other,
        },
        CLASS_PROMPT_ENCODE => match input_str(inputs, "text") {
            Some(text) => NodeKind::PromptEncode { text },
            None => NodeKind::Other,
        },
        CLASS_LORA_LOADER => match input_str(inputs, "lora_name") {
            Some(name) => NodeKind::LoraLoader(LoraUse {
                name,
                model_strength: input_f64(inputs, "strength_model").unwrap_or(1.0),
                clip_strength: input_f64(inputs, "strength_clip").unwrap_or(1.0),
            }),
            None => NodeKind::Other,
        },
        CLASS_LORA_STACK => NodeKind::LoraStack(lora_stack_slots(inputs)),
        CLASS_SAMPLER => NodeKind::Sampler(SamplerInputs {
            seed: inputs.get("seed").cloned(),
            steps: input_i64(inputs, "steps"),
            cfg: input_f64(inputs, "cfg"),
            sampler_name: input_str(inputs, "sampler_name"),
            scheduler: input_str(inputs, "scheduler"),
            denoise: input_f64(inputs, "denoise"),
            model: input_node_ref(inputs, "model"),
            positive: input_node_ref(inputs, "positive"),
            negative: input_node_ref(inputs, "negative"),
        }),
        _ => NodeKind::Other,
    }
}

fn lora_stack_slots(inputs: &Map<String, Value>) -> Vec<LoraUse> {
    let mut slots = Vec::new();
    for slot in 1..=3 {
        let enabled = input_str(inputs, &format!("switch_{slot}"))
            .is_some_and(|s| s == "On");
        if !enabled {
            continue;
        }
        if let Some(name) = input_str(inputs, &format!("lora_name_{slot}")) {
            slots.push(LoraUse {
                name,
                model_strength: input_f64(inputs, &format!("model_weight_{slot}"))
                    .unwrap_or(1.0),
                clip_strength: input_f64(inputs, &format!("clip_weight_{slot}"))
                    .unwrap_or(1.0),
            });
        }
    }
    slots
}
