//! Normalization and source detection for embedded metadata.
//!
//! Each textual field is JSON-parsed after sanitizing the literal `NaN`
//! tokens some producer tools emit. Parse failure is non-fatal: the field
//! keeps its original string form and downstream extraction for it yields
//! nothing. Detection runs exactly once and produces one concrete variant;
//! nothing downstream re-sniffs the payload.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use super::EmbeddedMetadata;
use crate::comfy::WorkflowGraph;

/// The provenance convention detected for one image.
#[derive(Debug, Clone)]
pub enum Provenance {
    /// `prompt` parsed into a node graph.
    ComfyUi(WorkflowGraph),
    /// `parameters` text block, kept raw for the parameter parser.
    Automatic1111(String),
    /// Neither convention present: a valid, provenance-less image.
    None,
}

/// One image's metadata after sanitization, parsing and source detection.
#[derive(Debug, Clone)]
pub struct NormalizedMetadata {
    /// Full parsed structure, retained verbatim for audit and re-derivation.
    pub raw: Value,
    pub source: Provenance,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl NormalizedMetadata {
    /// Source tag persisted on the Generation row.
    pub fn source_tag(&self) -> Option<&'static str> {
        match self.source {
            Provenance::ComfyUi(_) => Some("ComfyUI"),
            Provenance::Automatic1111(_) => Some("Automatic1111"),
            Provenance::None => None,
        }
    }
}

/// Replace literal `NaN` tokens with `null` so the payload is valid JSON.
pub fn sanitize_json_string(raw: &str) -> String {
    raw.replace("NaN", "null")
}

fn parse_field(name: &str, raw: &str) -> Value {
    match serde_json::from_str(&sanitize_json_string(raw)) {
        Ok(value) => value,
        Err(e) => {
            debug!("field {name} is not JSON, keeping as text: {e}");
            Value::String(raw.to_string())
        }
    }
}

/// Normalize the embedded fields and classify the provenance source.
pub fn normalize(embedded: EmbeddedMetadata) -> NormalizedMetadata {
    let mut raw = Map::new();

    let prompt = embedded.prompt.map(|s| parse_field("prompt", &s));
    let workflow = embedded.workflow.map(|s| parse_field("workflow", &s));
    let parameters = embedded.parameters.clone();

    let source = match &prompt {
        Some(Value::Object(nodes)) => Provenance::ComfyUi(WorkflowGraph::from_nodes(nodes)),
        _ => match &parameters {
            Some(text) => Provenance::Automatic1111(text.clone()),
            None => Provenance::None,
        },
    };

    if let Some(value) = prompt {
        raw.insert("prompt".into(), value);
    }
    if let Some(value) = workflow {
        raw.insert("workflow".into(), value);
    }
    if let Some(text) = parameters {
        raw.insert("parameters".into(), Value::String(text));
    }
    if let Some(width) = embedded.width {
        raw.insert("width".into(), width.into());
    }
    if let Some(height) = embedded.height {
        raw.insert("height".into(), height.into());
    }
    if let Some(taken_at) = embedded.taken_at {
        raw.insert("taken_at".into(), Value::String(taken_at.to_rfc3339()));
    }

    NormalizedMetadata {
        raw: Value::Object(raw),
        source,
        width: embedded.width,
        height: embedded.height,
        taken_at: embedded.taken_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded(prompt: Option<&str>, parameters: Option<&str>) -> EmbeddedMetadata {
        EmbeddedMetadata {
            prompt: prompt.map(String::from),
            parameters: parameters.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_detects_comfyui_when_prompt_is_object() {
        let meta = normalize(embedded(Some(r#"{"1": {"class_type": "KSampler", "inputs": {}}}"#), None));
        assert!(matches!(meta.source, Provenance::ComfyUi(_)));
        assert_eq!(meta.source_tag(), Some("ComfyUI"));
    }

    #[test]
    fn test_detects_automatic1111_from_parameters() {
        let meta = normalize(embedded(None, Some("a dog\nSteps: 20")));
        assert!(matches!(meta.source, Provenance::Automatic1111(_)));
        assert_eq!(meta.source_tag(), Some("Automatic1111"));
    }

    #[test]
    fn test_malformed_prompt_stays_text_without_provenance() {
        let meta = normalize(embedded(Some("{not json"), None));
        assert!(matches!(meta.source, Provenance::None));
        assert_eq!(meta.raw["prompt"], Value::String("{not json".into()));
    }

    #[test]
    fn test_nan_tokens_are_sanitized() {
        let meta = normalize(embedded(
            Some(r#"{"5": {"class_type": "X", "inputs": {"denoise": NaN}}}"#),
            None,
        ));
        assert_eq!(meta.raw["prompt"]["5"]["inputs"]["denoise"], Value::Null);
    }

    #[test]
    fn test_sanitized_metadata_round_trips() {
        let meta = normalize(embedded(
            Some(r#"{"2": {"class_type": "KSampler", "inputs": {"cfg": NaN, "steps": 20}}}"#),
            Some("a cat\nSteps: 20"),
        ));
        let serialized = serde_json::to_string(&meta.raw).unwrap();
        let reparsed: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(reparsed, meta.raw);
    }
}
