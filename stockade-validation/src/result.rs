//! Validation verdict types shared by every validator entry point.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The five checks a value passes through, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidationLayer {
    /// Representational checks (a nameable value must be non-empty).
    Type,
    /// Per-type byte ceilings.
    Length,
    /// Named character-class allow-lists (warnings only).
    Pattern,
    /// Injection signature detection.
    Injection,
    /// Type-aware heuristics (warnings only).
    Semantic,
}

/// Attack classes a rejected value was flagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InjectionKind {
    CommandInjection,
    PathTraversal,
    SqlInjection,
    PromptInjection,
    NullByte,
    NewlineInjection,
    TemplateInjection,
    UnicodeAttack,
}

impl InjectionKind {
    /// Short label suitable for user-facing rejection messages.
    pub const fn user_label(&self) -> &'static str {
        match self {
            Self::CommandInjection => "command injection",
            Self::PathTraversal => "path traversal",
            Self::SqlInjection => "SQL injection",
            Self::PromptInjection => "prompt injection",
            Self::NullByte => "null byte",
            Self::NewlineInjection => "newline injection",
            Self::TemplateInjection => "template injection",
            Self::UnicodeAttack => "unicode attack",
        }
    }
}

impl fmt::Display for InjectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_label())
    }
}

/// Outcome of validating a single input value.
///
/// Constructed once per validation call and immutable from the caller's
/// point of view. `is_valid` is false whenever `errors` is non-empty; in
/// strict mode accumulated warnings also invalidate the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    /// The cleaned value on success; the input unchanged on failure.
    pub sanitized_value: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub blocked_attacks: Vec<InjectionKind>,
    /// Outcome of each layer that executed. Layers skipped by an early
    /// fail-closed return are absent.
    pub layer_results: BTreeMap<ValidationLayer, bool>,
}

impl ValidationResult {
    /// Success shape: valid, no findings, sanitized value filled in.
    pub fn passed(sanitized_value: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            sanitized_value: sanitized_value.into(),
            errors: Vec::new(),
            warnings: Vec::new(),
            blocked_attacks: Vec::new(),
            layer_results: BTreeMap::new(),
        }
    }

    /// Failure shape: invalid, original value carried through unchanged.
    pub fn failed(original_value: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            sanitized_value: original_value.into(),
            errors,
            warnings: Vec::new(),
            blocked_attacks: Vec::new(),
            layer_results: BTreeMap::new(),
        }
    }

    /// True when the value was flagged with the given attack class.
    pub fn blocked(&self, kind: InjectionKind) -> bool {
        self.blocked_attacks.contains(&kind)
    }

    /// Outcome of one layer, if it executed.
    pub fn layer(&self, layer: ValidationLayer) -> Option<bool> {
        self.layer_results.get(&layer).copied()
    }

    pub(crate) fn record_layer(&mut self, layer: ValidationLayer, passed: bool) {
        self.layer_results.insert(layer, passed);
    }

    pub(crate) fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.is_valid = false;
    }

    pub(crate) fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub(crate) fn add_blocked(&mut self, kind: InjectionKind) {
        if !self.blocked_attacks.contains(&kind) {
            self.blocked_attacks.push(kind);
        }
    }
}
