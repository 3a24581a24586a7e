//! Layered validation of model-proposed values.
//!
//! [`InputValidator::validate`] runs five ordered layers. The type and
//! length layers short-circuit on failure; the pattern and semantic layers
//! only warn; the injection layer records every finding without stopping at
//! the first one so callers see the complete attack surface of a value.

use std::io;
use std::path::{Path, PathBuf};

use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::patterns::{
    AllowlistName, DetectionRule, EXECUTABLE_EXTENSIONS, PROMPT_RULES, RISKY_COMMAND_WORDS,
    SENSITIVE_DIRECTORIES, SHELL_CONSTRUCT_RULES, SHELL_METACHARACTERS, SQL_RULES, TEMPLATE_RULES,
    TRAVERSAL_RULES, allowlist, dangerous_code_point,
};
use crate::result::{InjectionKind, ValidationLayer, ValidationResult};
use crate::sanitize::sanitize_value;

/// What a value is supposed to be. The type selects the length ceiling and
/// which injection scans apply to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Command,
    FilePath,
    PathSegment,
    FileContent,
    Prompt,
    Argument,
    Filename,
    Identifier,
    GitBranch,
    EnvVarName,
    Text,
}

impl InputType {
    /// Maximum accepted size in bytes.
    pub const fn max_bytes(self) -> usize {
        match self {
            Self::Command | Self::FilePath => 4096,
            Self::FileContent => 10 * 1024 * 1024,
            Self::Prompt => 32 * 1024,
            Self::Argument => 1024,
            Self::Filename => 255,
            Self::PathSegment | Self::Identifier | Self::GitBranch | Self::EnvVarName
            | Self::Text => 8192,
        }
    }

    const fn requires_non_empty(self) -> bool {
        matches!(
            self,
            Self::Command
                | Self::FilePath
                | Self::PathSegment
                | Self::Filename
                | Self::Identifier
                | Self::GitBranch
                | Self::EnvVarName
        )
    }

    const fn allowlist_name(self) -> Option<AllowlistName> {
        match self {
            Self::Filename => Some(AllowlistName::Filename),
            Self::Identifier => Some(AllowlistName::Identifier),
            Self::PathSegment => Some(AllowlistName::PathSegment),
            Self::GitBranch => Some(AllowlistName::GitBranch),
            Self::EnvVarName => Some(AllowlistName::EnvVarName),
            _ => None,
        }
    }

    const fn scans_traversal(self) -> bool {
        matches!(
            self,
            Self::Command
                | Self::FilePath
                | Self::PathSegment
                | Self::Filename
                | Self::Argument
                | Self::Text
        )
    }

    // Multi-line values are legitimate for prompts and file content, so the
    // newline scan is limited to the single-line types.
    const fn scans_newlines(self) -> bool {
        matches!(self, Self::Filename | Self::Identifier | Self::Argument)
    }

    const fn scans_sql_and_templates(self) -> bool {
        matches!(self, Self::Argument | Self::Prompt | Self::Text)
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::FilePath => "file path",
            Self::PathSegment => "path segment",
            Self::FileContent => "file content",
            Self::Prompt => "prompt",
            Self::Argument => "argument",
            Self::Filename => "filename",
            Self::Identifier => "identifier",
            Self::GitBranch => "git branch",
            Self::EnvVarName => "environment variable name",
            Self::Text => "text",
        }
    }
}

/// Knobs shared by every validation call on one validator instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidatorOptions {
    /// Treat warnings as invalidating, not just informational.
    pub strict_mode: bool,
    /// Accept non-ASCII input. When off, sanitization projects values down
    /// to ASCII instead of normalizing them.
    pub allow_unicode: bool,
}

impl Default for ValidatorOptions {
    fn default() -> Self {
        Self {
            strict_mode: false,
            allow_unicode: true,
        }
    }
}

/// Constraints applied by [`InputValidator::validate_file_path`] on top of
/// the generic layers.
#[derive(Debug, Clone)]
pub struct PathValidationOptions {
    /// Directory the resolved path must stay inside, if any.
    pub base_dir: Option<PathBuf>,
    /// Require the path to already exist on disk.
    pub must_exist: bool,
    /// Accept paths that do not exist yet.
    pub allow_creation: bool,
}

impl PathValidationOptions {
    /// Options that confine the path to `base_dir` and accept paths that do
    /// not exist yet.
    pub fn contained_in(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            ..Self::default()
        }
    }
}

impl Default for PathValidationOptions {
    fn default() -> Self {
        Self {
            base_dir: None,
            must_exist: false,
            allow_creation: true,
        }
    }
}

/// The layered validator. Stateless apart from its options, so one instance
/// can be shared freely.
#[derive(Debug, Clone, Default)]
pub struct InputValidator {
    options: ValidatorOptions,
}

impl InputValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_options(options: ValidatorOptions) -> Self {
        Self { options }
    }

    /// A validator in strict mode, where warnings invalidate the value.
    pub const fn strict() -> Self {
        Self::with_options(ValidatorOptions {
            strict_mode: true,
            allow_unicode: true,
        })
    }

    pub const fn options(&self) -> &ValidatorOptions {
        &self.options
    }

    /// Run the full layer stack against `value`.
    ///
    /// Never panics or errors out of band. Whatever happens during
    /// validation is reported inside the returned [`ValidationResult`].
    pub fn validate(&self, value: &str, input_type: InputType) -> ValidationResult {
        let mut result = ValidationResult::passed(value);

        let type_ok = !(input_type.requires_non_empty() && value.is_empty());
        result.record_layer(ValidationLayer::Type, type_ok);
        if !type_ok {
            result.add_error(format!("{} must not be empty", input_type.label()));
            debug!(input_type = ?input_type, "type layer rejected value");
            return self.finalize(result);
        }

        let length_ok = value.len() <= input_type.max_bytes();
        result.record_layer(ValidationLayer::Length, length_ok);
        if !length_ok {
            result.add_error(format!(
                "{} exceeds the {}-byte limit (got {} bytes)",
                input_type.label(),
                input_type.max_bytes(),
                value.len()
            ));
            debug!(input_type = ?input_type, bytes = value.len(), "length layer rejected value");
            return self.finalize(result);
        }

        self.pattern_layer(&mut result, value, input_type);
        self.injection_layer(&mut result, value, input_type);
        self.semantic_layer(&mut result, value, input_type);

        self.finalize(result)
    }

    /// Validate a whole command line.
    ///
    /// On top of the generic layers, rejects shell metacharacters and
    /// dangerous shell constructs unless the caller opts into shell syntax
    /// with `allow_shell`.
    pub fn validate_command(&self, command: &str, allow_shell: bool) -> ValidationResult {
        let mut result = self.validate(command, InputType::Command);
        if allow_shell {
            return result;
        }

        let was_valid = result.is_valid;
        let before = result.errors.len();
        for (symbol, meaning) in SHELL_METACHARACTERS {
            if command.contains(*symbol) {
                result.add_error(format!(
                    "Shell metacharacter {symbol:?} ({meaning}) is not allowed"
                ));
                result.add_blocked(InjectionKind::CommandInjection);
            }
        }
        apply_rules(&mut result, command, &SHELL_CONSTRUCT_RULES);

        if was_valid && result.errors.len() > before {
            // The sanitized form of a rejected command must not look usable.
            result.sanitized_value = command.to_owned();
        }
        result
    }

    /// Validate a path and, when `options.base_dir` is set, prove that the
    /// resolved path cannot escape it.
    pub fn validate_file_path(
        &self,
        path: &str,
        options: &PathValidationOptions,
    ) -> ValidationResult {
        let mut result = self.validate(path, InputType::FilePath);
        let was_valid = result.is_valid;
        let before = result.errors.len();

        let candidate = Path::new(path);
        let resolved = match &options.base_dir {
            Some(base) => match resolve_within(base, candidate) {
                Ok(Containment::Inside(resolved)) => Some(resolved),
                Ok(Containment::Escaped(resolved)) => {
                    result.add_error(format!(
                        "path resolves to {} which escapes the permitted base directory",
                        resolved.display()
                    ));
                    result.add_blocked(InjectionKind::PathTraversal);
                    None
                }
                Err(error) => {
                    warn!(path = %candidate.display(), %error, "path resolution failed");
                    result.add_error(format!("path could not be resolved: {error}"));
                    None
                }
            },
            None => Some(lexical_resolve(candidate)),
        };

        if let Some(resolved) = &resolved {
            let exists = resolved.exists();
            if options.must_exist && !exists {
                result.add_error(format!("path does not exist: {}", resolved.display()));
            } else if !options.allow_creation && !exists {
                result.add_error("path does not exist and creating it is not permitted");
            }
        }

        if was_valid && result.errors.len() > before {
            result.sanitized_value = path.to_owned();
        }
        result
    }

    /// Validate free-form prompt text.
    pub fn validate_prompt(&self, text: &str) -> ValidationResult {
        self.validate(text, InputType::Prompt)
    }

    fn pattern_layer(&self, result: &mut ValidationResult, value: &str, input_type: InputType) {
        if let Some(name) = input_type.allowlist_name() {
            if !allowlist(name).is_match(value) {
                result.add_warning(format!(
                    "{} contains characters outside the usual {} pattern",
                    input_type.label(),
                    name.label()
                ));
            }
        }
        result.record_layer(ValidationLayer::Pattern, true);
    }

    fn injection_layer(&self, result: &mut ValidationResult, value: &str, input_type: InputType) {
        let before = result.errors.len();

        if input_type.scans_traversal() {
            apply_rules(result, value, &TRAVERSAL_RULES);
        }
        if value.contains('\u{0}') || value.contains("%00") {
            result.add_error("value contains a literal or percent-encoded null byte");
            result.add_blocked(InjectionKind::NullByte);
        }
        if input_type.scans_newlines() && (value.contains('\n') || value.contains('\r')) {
            result.add_error(format!(
                "{} must not contain newline characters",
                input_type.label()
            ));
            result.add_blocked(InjectionKind::NewlineInjection);
        }
        if input_type.scans_sql_and_templates() {
            apply_rules(result, value, &SQL_RULES);
            apply_rules(result, value, &TEMPLATE_RULES);
        }
        if input_type == InputType::Prompt {
            apply_rules(result, value, &PROMPT_RULES);
        }

        let mut flagged: Vec<char> = Vec::new();
        for c in value.chars() {
            if let Some(label) = dangerous_code_point(c) {
                if !flagged.contains(&c) {
                    flagged.push(c);
                    result.add_error(format!("value contains {label} U+{:04X}", c as u32));
                    result.add_blocked(InjectionKind::UnicodeAttack);
                }
            }
        }

        result.record_layer(ValidationLayer::Injection, result.errors.len() == before);
    }

    fn semantic_layer(&self, result: &mut ValidationResult, value: &str, input_type: InputType) {
        match input_type {
            InputType::FilePath | InputType::PathSegment | InputType::Filename => {
                if let Some(extension) = Path::new(value).extension().and_then(|e| e.to_str()) {
                    if EXECUTABLE_EXTENSIONS
                        .iter()
                        .any(|known| extension.eq_ignore_ascii_case(known))
                    {
                        result.add_warning(format!(
                            "{} has an executable extension '.{extension}'",
                            input_type.label()
                        ));
                    }
                }
                if let Some(dir) = SENSITIVE_DIRECTORIES
                    .iter()
                    .find(|dir| value.starts_with(**dir))
                {
                    result.add_warning(format!(
                        "path is under sensitive system directory {dir}"
                    ));
                }
            }
            InputType::Command => {
                for token in value.split_whitespace() {
                    let base = token.rsplit('/').next().unwrap_or(token);
                    if RISKY_COMMAND_WORDS.contains(&base) {
                        result.add_warning(format!(
                            "command invokes privileged or destructive operation '{base}'"
                        ));
                    }
                    if let Some(dir) = SENSITIVE_DIRECTORIES
                        .iter()
                        .find(|dir| token.starts_with(**dir))
                    {
                        result.add_warning(format!(
                            "command references sensitive system directory {dir}"
                        ));
                    }
                }
            }
            _ => {}
        }
        result.record_layer(ValidationLayer::Semantic, true);
    }

    fn finalize(&self, mut result: ValidationResult) -> ValidationResult {
        if self.options.strict_mode && result.is_valid && !result.warnings.is_empty() {
            result.is_valid = false;
        }
        if result.is_valid {
            result.sanitized_value =
                sanitize_value(&result.sanitized_value, self.options.allow_unicode);
        }
        result
    }
}

fn apply_rules(result: &mut ValidationResult, value: &str, rules: &[DetectionRule]) {
    for rule in rules {
        if rule.regex.is_match(value) {
            result.add_error(format!("detected {}: {}", rule.kind.user_label(), rule.label));
            result.add_blocked(rule.kind);
        }
    }
}

enum Containment {
    Inside(PathBuf),
    Escaped(PathBuf),
}

/// Resolve `candidate` against `base` and report whether the result stays
/// inside the canonicalized base. Paths that do not exist yet are cleaned
/// lexically instead of canonicalized.
fn resolve_within(base: &Path, candidate: &Path) -> io::Result<Containment> {
    let canonical_base = base.canonicalize()?;
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        canonical_base.join(candidate)
    };
    let resolved = match joined.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) => joined.clean(),
    };
    if resolved.starts_with(&canonical_base) {
        Ok(Containment::Inside(resolved))
    } else {
        Ok(Containment::Escaped(resolved))
    }
}

fn lexical_resolve(candidate: &Path) -> PathBuf {
    match candidate.canonicalize() {
        Ok(resolved) => resolved,
        Err(_) => candidate.clean(),
    }
}
