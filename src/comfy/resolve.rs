//! Reference resolution over the workflow graph.
//!
//! A sampler's checkpoint, prompts and seed are usually not direct inputs:
//! the value can be routed through an arbitrary chain of intermediate nodes
//! (LoRA loaders, CLIP layer tweaks, conditioning combiners, reroutes)
//! before it reaches the sampler. Resolution walks those chains upstream
//! until a terminal node is found, guarding against cycles with a visited
//! set so malformed graphs cannot loop forever.

use serde_json::Value;
use std::collections::HashSet;

use super::{as_node_ref, NodeKind, SamplerInputs, WorkflowGraph};

/// Conditioning chains may pass through combiner nodes whose input is named
/// one of these instead of `positive`/`negative`.
const CONDITIONING_ALIASES: [&str; 3] = ["conditioning", "conditioning_1", "conditioning_2"];

/// Which prompt input of a sampler is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    Positive,
    Negative,
}

impl PromptRole {
    fn field(self) -> &'static str {
        match self {
            PromptRole::Positive => "positive",
            PromptRole::Negative => "negative",
        }
    }
}

/// Follow the `model` chain from `start` to a checkpoint-loader node.
/// Returns the terminal node-id, or `None` when no loader is reachable.
pub fn resolve_checkpoint(graph: &WorkflowGraph, start: &str) -> Option<String> {
    let mut visited = HashSet::new();
    let mut current = start.to_string();

    while visited.insert(current.clone()) {
        let node = graph.get(&current)?;
        if matches!(node.kind, NodeKind::CheckpointLoader { .. }) {
            return Some(current);
        }
        current = node.inputs.get("model").and_then(as_node_ref)?.to_string();
    }
    None
}

/// Follow a conditioning chain from `start` to prompt-encode nodes.
///
/// A combiner node can merge several branches, so the result is a set of
/// terminal node-ids; an empty result means no prompt is reachable.
pub fn resolve_prompts(graph: &WorkflowGraph, start: &str, role: PromptRole) -> Vec<String> {
    let mut visited = HashSet::new();
    let mut found = Vec::new();
    walk_conditioning(graph, start, role, &mut visited, &mut found);
    found
}

fn walk_conditioning(
    graph: &WorkflowGraph,
    node_id: &str,
    role: PromptRole,
    visited: &mut HashSet<String>,
    found: &mut Vec<String>,
) {
    if !visited.insert(node_id.to_string()) {
        return;
    }
    let Some(node) = graph.get(node_id) else {
        return;
    };
    if matches!(node.kind, NodeKind::PromptEncode { .. }) {
        if !found.iter().any(|id| id == node_id) {
            found.push(node_id.to_string());
        }
        return;
    }

    for key in std::iter::once(role.field()).chain(CONDITIONING_ALIASES) {
        if let Some(upstream) = node.inputs.get(key).and_then(as_node_ref) {
            walk_conditioning(graph, upstream, role, visited, found);
        }
    }
}

/// Resolve a sampler's seed. A literal number short-circuits; a reference
/// is followed upstream until a node with a literal `seed` input is found.
pub fn resolve_seed(graph: &WorkflowGraph, sampler: &SamplerInputs) -> Option<i64> {
    let seed = sampler.seed.as_ref()?;
    if let Some(literal) = seed_literal(seed) {
        return Some(literal);
    }

    let mut visited = HashSet::new();
    let mut current = as_node_ref(seed)?.to_string();

    while visited.insert(current.clone()) {
        let node = graph.get(&current)?;
        let upstream_seed = node.inputs.get("seed")?;
        if let Some(literal) = seed_literal(upstream_seed) {
            return Some(literal);
        }
        current = as_node_ref(upstream_seed)?.to_string();
    }
    None
}

fn seed_literal(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_u64().map(|u| u as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(value: Value) -> WorkflowGraph {
        WorkflowGraph::from_nodes(value.as_object().unwrap())
    }

    fn spec_graph() -> WorkflowGraph {
        graph(json!({
            "1": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "a.safetensors"}},
            "2": {"class_type": "CLIPTextEncode", "inputs": {"text": "cat", "clip": ["1", 1]}},
            "3": {"class_type": "CLIPTextEncode", "inputs": {"text": "blurry", "clip": ["1", 1]}},
            "4": {"class_type": "KSampler", "inputs": {
                "model": ["1", 0], "positive": ["2", 0], "negative": ["3", 0],
                "seed": 42, "steps": 20, "cfg": 7.0,
                "sampler_name": "euler", "scheduler": "normal", "denoise": 1.0
            }}
        }))
    }

    #[test]
    fn test_direct_resolution() {
        let g = spec_graph();
        let (_, sampler) = g.samplers().into_iter().next().unwrap();

        assert_eq!(resolve_checkpoint(&g, sampler.model.as_deref().unwrap()), Some("1".into()));
        assert_eq!(
            resolve_prompts(&g, sampler.positive.as_deref().unwrap(), PromptRole::Positive),
            vec!["2".to_string()]
        );
        assert_eq!(
            resolve_prompts(&g, sampler.negative.as_deref().unwrap(), PromptRole::Negative),
            vec!["3".to_string()]
        );
        assert_eq!(resolve_seed(&g, &sampler), Some(42));
    }

    #[test]
    fn test_chain_length_independence() {
        // The same terminal must be found through any number of pass-through
        // nodes between the sampler and the loader.
        for chain_len in 0..6usize {
            let mut nodes = serde_json::Map::new();
            nodes.insert(
                "ckpt".into(),
                json!({"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "m.safetensors"}}),
            );
            nodes.insert(
                "enc".into(),
                json!({"class_type": "CLIPTextEncode", "inputs": {"text": "cat"}}),
            );
            let mut model_src = "ckpt".to_string();
            let mut cond_src = "enc".to_string();
            for i in 0..chain_len {
                let model_id = format!("m{i}");
                nodes.insert(
                    model_id.clone(),
                    json!({"class_type": "LoraLoader", "inputs":
                        {"lora_name": "l.safetensors", "strength_model": 1.0, "strength_clip": 1.0,
                         "model": [model_src, 0]}}),
                );
                model_src = model_id;

                let cond_id = format!("c{i}");
                nodes.insert(
                    cond_id.clone(),
                    json!({"class_type": "ConditioningCombine", "inputs":
                        {"conditioning_1": [cond_src, 0]}}),
                );
                cond_src = cond_id;
            }

            let g = WorkflowGraph::from_nodes(&nodes);
            assert_eq!(resolve_checkpoint(&g, &model_src), Some("ckpt".into()));
            assert_eq!(
                resolve_prompts(&g, &cond_src, PromptRole::Positive),
                vec!["enc".to_string()]
            );
        }
    }

    #[test]
    fn test_combined_conditioning_yields_multiple_prompts() {
        let g = graph(json!({
            "a": {"class_type": "CLIPTextEncode", "inputs": {"text": "castle"}},
            "b": {"class_type": "CLIPTextEncode", "inputs": {"text": "sunset"}},
            "combine": {"class_type": "ConditioningCombine", "inputs":
                {"conditioning_1": ["a", 0], "conditioning_2": ["b", 0]}}
        }));
        let mut ids = resolve_prompts(&g, "combine", PromptRole::Positive);
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_cycle_terminates_unresolved() {
        let g = graph(json!({
            "x": {"class_type": "Reroute", "inputs": {"model": ["y", 0], "conditioning": ["y", 0]}},
            "y": {"class_type": "Reroute", "inputs": {"model": ["x", 0], "conditioning": ["x", 0]}}
        }));
        assert_eq!(resolve_checkpoint(&g, "x"), None);
        assert!(resolve_prompts(&g, "x", PromptRole::Positive).is_empty());
    }

    #[test]
    fn test_seed_follows_reference_chain() {
        let g = graph(json!({
            "gen": {"class_type": "Seed Generator", "inputs": {"seed": 1234}},
            "pass": {"class_type": "Reroute", "inputs": {"seed": ["gen", 0]}},
            "s": {"class_type": "KSampler", "inputs": {"seed": ["pass", 0], "steps": 10}}
        }));
        let (_, sampler) = g.samplers().into_iter().next().unwrap();
        assert_eq!(resolve_seed(&g, &sampler), Some(1234));
    }

    #[test]
    fn test_seed_unresolvable_is_none() {
        let g = graph(json!({
            "s": {"class_type": "KSampler", "inputs": {"seed": ["ghost", 0]}}
        }));
        let (_, sampler) = g.samplers().into_iter().next().unwrap();
        assert_eq!(resolve_seed(&g, &sampler), None);
    }

    #[test]
    fn test_large_seed_values_survive() {
        let g = graph(json!({
            "s": {"class_type": "KSampler", "inputs": {"seed": 18446744073709551615u64}}
        }));
        let (_, sampler) = g.samplers().into_iter().next().unwrap();
        assert_eq!(resolve_seed(&g, &sampler), Some(-1));
    }
}
