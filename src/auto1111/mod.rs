//! Automatic1111 `parameters` block parser.
//!
//! The payload is a flat text block: positive prompt first, an optional
//! `Negative prompt:` line, then a trailing comma-separated line of
//! `Key: value` pairs. Values may themselves contain commas (for example
//! `Lora hashes: "a: 111, b: 222"`), so pair splitting only happens at a
//! comma followed by something that looks like the next `Key:`.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::comfy::LoraUse;

const NEGATIVE_MARKER: &str = "Negative prompt:";

/// Typed field value: numeric when the text parses as a number, text
/// otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    fn parse(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) => FieldValue::Number(n),
            Err(_) => FieldValue::Text(raw.trim().to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s.clone()),
        }
    }
}

/// Parsed parameter block of one Automatic1111 image.
#[derive(Debug, Clone, Default)]
pub struct ParameterBlock {
    pub positive: String,
    pub negative: String,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Sampler settings synthesized from the block's top-level fields.
/// Automatic1111 records exactly one sampling invocation per image.
#[derive(Debug, Clone, Default)]
pub struct SamplerSettings {
    pub steps: Option<i64>,
    pub cfg: Option<f64>,
    pub seed: Option<i64>,
    pub sampler_name: Option<String>,
    pub scheduler: Option<String>,
    pub denoise: Option<f64>,
    pub model: Option<String>,
}

impl ParameterBlock {
    fn field_f64(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(FieldValue::as_f64)
    }

    fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(FieldValue::as_str)
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            steps: self.field_f64("Steps").map(|n| n as i64),
            cfg: self.field_f64("CFG scale"),
            seed: self.field_f64("Seed").map(|n| n as i64),
            sampler_name: self.field_str("Sampler").map(String::from),
            scheduler: self
                .field_str("Schedule type")
                .map(str::to_lowercase)
                .or_else(|| Some("normal".to_string())),
            denoise: self.field_f64("Denoising strength").or(Some(1.0)),
            model: self.field_str("Model").map(String::from),
        }
    }

    /// The `Hires prompt` text, when the image went through a hires pass
    /// with its own prompt.
    pub fn hires_prompt(&self) -> Option<&str> {
        self.field_str("Hires prompt").filter(|s| !s.is_empty())
    }

    /// LoRAs referenced by the `Lora hashes` field, with strengths
    /// recovered from the `<lora:name:strength>` tags in the positive
    /// prompt. Automatic1111 exposes a single strength, used for both the
    /// model and clip side. Hash names carry no extension, so
    /// `.safetensors` is appended for the entity's natural key.
    pub fn loras(&self) -> Vec<LoraUse> {
        let Some(hashes) = self.field_str("Lora hashes") else {
            return Vec::new();
        };

        let mut loras = Vec::new();
        for entry in hashes.trim_matches('"').split(',') {
            let Some((name, _hash)) = entry.split_once(':') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let strength = lora_strength(&self.positive, name).unwrap_or(1.0);
            let lora = LoraUse {
                name: format!("{name}.safetensors"),
                model_strength: strength,
                clip_strength: strength,
            };
            if !loras.contains(&lora) {
                loras.push(lora);
            }
        }
        loras
    }

    /// Fields as JSON, for the retained raw metadata.
    pub fn fields_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

/// Find the `<lora:name:strength>` tag for one adapter name inside the
/// positive prompt and return its strength.
fn lora_strength(prompt: &str, name: &str) -> Option<f64> {
    let pattern = format!(r"<lora:{}:(-?[0-9.]+)>", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    re.captures(prompt)?
        .get(1)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Parse one `parameters` text block.
pub fn parse_parameters(text: &str) -> ParameterBlock {
    let mut block = ParameterBlock::default();

    let (positive, rest) = match text.split_once(NEGATIVE_MARKER) {
        Some((before, after)) => (before, Some(after)),
        None => (text, None),
    };

    match rest {
        Some(after) => {
            block.positive = positive.trim().to_string();
            match after.split_once('\n') {
                Some((negative, tail)) => {
                    block.negative = negative.trim().to_string();
                    parse_fields(tail, &mut block.fields);
                }
                None => block.negative = after.trim().to_string(),
            }
        }
        None => {
            // No negative prompt; the key-value line, when present, starts
            // at the first line that opens with a `Key:` token.
            match positive.split_once("\nSteps:") {
                Some((prompt, tail)) => {
                    block.positive = prompt.trim().to_string();
                    parse_fields(&format!("Steps:{tail}"), &mut block.fields);
                }
                None => block.positive = positive.trim().to_string(),
            }
        }
    }

    block
}

fn parse_fields(lines: &str, fields: &mut BTreeMap<String, FieldValue>) {
    for pair in split_pairs(lines) {
        if let Some((key, value)) = pair.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() && !value.is_empty() {
                fields.insert(key.to_string(), FieldValue::parse(value));
            }
        }
    }
}

/// Split the key-value section on commas and newlines, but only where the
/// following token looks like the next `Key:`. Quoted spans never split.
fn split_pairs(block: &str) -> Vec<String> {
    let mut pairs = Vec::new();
    let mut start = 0usize;
    let mut in_quotes = false;

    for (idx, ch) in block.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' | '\n' if !in_quotes && next_token_is_key(block, idx + 1) => {
                let segment = block[start..idx].trim();
                if !segment.is_empty() {
                    pairs.push(segment.to_string());
                }
                start = idx + 1;
            }
            _ => {}
        }
    }

    let tail = block[start..].trim();
    if !tail.is_empty() {
        pairs.push(tail.to_string());
    }
    pairs
}

fn next_token_is_key(block: &str, from: usize) -> bool {
    let bytes = block.as_bytes();
    let mut idx = from;

    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    if idx >= bytes.len() || !bytes[idx].is_ascii_uppercase() {
        return false;
    }

    let key_start = idx;
    while idx < bytes.len() {
        match bytes[idx] {
            b':' => return idx > key_start,
            b',' | b'\n' | b'\r' => return false,
            b if b.is_ascii_alphanumeric() || matches!(b, b' ' | b'_' | b'-' | b'(' | b')') => {
                idx += 1;
            }
            _ => return false,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_block() {
        let block = parse_parameters(
            "a dog\nNegative prompt: blurry\nSteps: 20, CFG scale: 7, Seed: 5, Model: v1",
        );
        assert_eq!(block.positive, "a dog");
        assert_eq!(block.negative, "blurry");
        assert_eq!(block.fields.get("Steps"), Some(&FieldValue::Number(20.0)));
        assert_eq!(block.fields.get("CFG scale"), Some(&FieldValue::Number(7.0)));
        assert_eq!(block.fields.get("Seed"), Some(&FieldValue::Number(5.0)));
        assert_eq!(block.fields.get("Model"), Some(&FieldValue::Text("v1".into())));
    }

    #[test]
    fn test_parse_without_negative() {
        let block = parse_parameters("a cat on a mat\nSteps: 30, Sampler: DPM++ 2M, Seed: 99");
        assert_eq!(block.positive, "a cat on a mat");
        assert!(block.negative.is_empty());
        assert_eq!(
            block.fields.get("Sampler"),
            Some(&FieldValue::Text("DPM++ 2M".into()))
        );
    }

    #[test]
    fn test_commas_inside_values_do_not_split() {
        let block = parse_parameters(
            "portrait\nNegative prompt: bad\nSteps: 20, Lora hashes: \"foo: 111, bar: 222\", CFG scale: 7",
        );
        assert_eq!(
            block.fields.get("Lora hashes"),
            Some(&FieldValue::Text("\"foo: 111, bar: 222\"".into()))
        );
        assert_eq!(block.fields.get("CFG scale"), Some(&FieldValue::Number(7.0)));
    }

    #[test]
    fn test_sampler_settings_defaults() {
        let block = parse_parameters(
            "x\nNegative prompt: y\nSteps: 20, Sampler: Euler a, CFG scale: 7, Seed: 5",
        );
        let settings = block.sampler_settings();
        assert_eq!(settings.steps, Some(20));
        assert_eq!(settings.seed, Some(5));
        assert_eq!(settings.sampler_name.as_deref(), Some("Euler a"));
        assert_eq!(settings.scheduler.as_deref(), Some("normal"));
        assert_eq!(settings.denoise, Some(1.0));
    }

    #[test]
    fn test_lora_hashes_cross_reference() {
        let block = parse_parameters(
            "a dog <lora:foo:0.8>\nNegative prompt: blurry\nSteps: 20, CFG scale: 7, Seed: 5, Model: v1, Lora hashes: foo: deadbeef",
        );
        let loras = block.loras();
        assert_eq!(loras.len(), 1);
        assert_eq!(loras[0].name, "foo.safetensors");
        assert_eq!(loras[0].model_strength, 0.8);
        assert_eq!(loras[0].clip_strength, 0.8);
    }

    #[test]
    fn test_lora_without_prompt_tag_defaults_to_full_strength() {
        let block = parse_parameters(
            "plain prompt\nNegative prompt: n\nSteps: 10, Lora hashes: ghost: 1234abcd",
        );
        let loras = block.loras();
        assert_eq!(loras.len(), 1);
        assert_eq!(loras[0].model_strength, 1.0);
    }

    #[test]
    fn test_negative_lora_strength() {
        let block = parse_parameters(
            "age <lora:slider:-3.6>\nNegative prompt: n\nSteps: 10, Lora hashes: slider: ffff0000",
        );
        assert_eq!(block.loras()[0].model_strength, -3.6);
    }

    #[test]
    fn test_hires_prompt_field() {
        let block = parse_parameters(
            "base\nNegative prompt: n\nSteps: 20, Hires prompt: detailed face, Seed: 1",
        );
        assert_eq!(block.hires_prompt(), Some("detailed face"));
    }

    #[test]
    fn test_numeric_coercion() {
        let block = parse_parameters("p\nNegative prompt: n\nSteps: 20, Denoising strength: 0.45");
        assert_eq!(
            block.fields.get("Denoising strength"),
            Some(&FieldValue::Number(0.45))
        );
        let settings = block.sampler_settings();
        assert_eq!(settings.denoise, Some(0.45));
    }
}
