//! Diagnosis protocol and correction extraction.
//!
//! The engine hands a structured prompt to an injected [`DiagnosisProvider`]
//! (an LLM behind the trait) and scans the free-text reply for a corrected
//! tool invocation. Parsing is deliberately forgiving about surrounding
//! prose and deliberately strict about shape: a correction must be a JSON
//! object with a string `"tool"` and an object `"args"`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sampling temperature for diagnosis calls; corrections should be
/// conservative, not creative.
pub const DIAGNOSIS_TEMPERATURE: f32 = 0.2;

/// Token ceiling for a diagnosis reply.
pub const DIAGNOSIS_MAX_TOKENS: u32 = 512;

/// Reply line prefix that announces a corrected invocation.
pub const TOOL_CALL_MARKER: &str = "TOOL_CALL:";

/// One request to the diagnosis backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl DiagnosisRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: DIAGNOSIS_TEMPERATURE,
            max_tokens: DIAGNOSIS_MAX_TOKENS,
        }
    }
}

/// The seam to whatever produces diagnosis text. Implementations may fail;
/// the engine folds every failure into a diagnosis string and never lets it
/// propagate further.
#[async_trait]
pub trait DiagnosisProvider: Send + Sync {
    async fn diagnose(&self, request: DiagnosisRequest) -> anyhow::Result<String>;
}

/// A corrected tool invocation extracted from diagnosis text, or the
/// explicit statement that none could be extracted. Callers must handle
/// both arms; there is no `None` to overlook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Correction {
    ToolCall {
        tool: String,
        args: Map<String, Value>,
    },
    Unparseable,
}

impl Correction {
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }
}

/// Extract a correction from free-form diagnosis text.
///
/// The `TOOL_CALL:` marker is tried first; failing that, every top-level
/// balanced `{...}` block is tried in order. Anything malformed yields
/// [`Correction::Unparseable`], never an error.
pub fn parse_correction(diagnosis: &str) -> Correction {
    if let Some(position) = diagnosis.find(TOOL_CALL_MARKER) {
        let tail = &diagnosis[position + TOOL_CALL_MARKER.len()..];
        if let Some(block) = balanced_json_block(tail) {
            if let Some(correction) = correction_from_json(block) {
                return correction;
            }
        }
    }
    let mut rest = diagnosis;
    while let Some(start) = rest.find('{') {
        let tail = &rest[start..];
        let Some(block) = balanced_json_block(tail) else {
            break;
        };
        if let Some(correction) = correction_from_json(block) {
            return correction;
        }
        rest = &tail[block.len()..];
    }
    Correction::Unparseable
}

/// The first balanced brace-delimited block in `text`, found by depth
/// tracking that ignores braces inside JSON string literals.
fn balanced_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn correction_from_json(block: &str) -> Option<Correction> {
    let value: Value = serde_json::from_str(block).ok()?;
    let object = value.as_object()?;
    let tool = object.get("tool")?.as_str()?.to_owned();
    let args = object.get("args")?.as_object()?.clone();
    Some(Correction::ToolCall { tool, args })
}
