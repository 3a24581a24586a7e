//! Static detection tables consumed by the validator.
//!
//! Every rule is a `(pattern, label, kind)` tuple compiled once into an
//! immutable table, so tests can enumerate each rule against matching and
//! non-matching fixtures.

use crate::result::InjectionKind;
use regex::Regex;
use std::sync::LazyLock;

/// One compiled detection rule.
pub(crate) struct DetectionRule {
    pub regex: Regex,
    pub label: &'static str,
    pub kind: InjectionKind,
}

fn compile_rules(sources: &[(&'static str, &'static str, InjectionKind)]) -> Vec<DetectionRule> {
    sources
        .iter()
        .map(|&(pattern, label, kind)| DetectionRule {
            regex: compile_regex(pattern),
            label,
            kind,
        })
        .collect()
}

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        // Patterns are static; `all_rules_compile` exercises every one.
        Err(err) => panic!("invalid detection pattern `{pattern}`: {err}"),
    }
}

const TRAVERSAL_SOURCES: &[(&str, &str, InjectionKind)] = &[
    (r"\.\./", "parent-directory traversal '../'", InjectionKind::PathTraversal),
    (r"\.\.\\", "parent-directory traversal '..\\'", InjectionKind::PathTraversal),
    (
        r"(?i)%2e%2e(%2f|%5c|/|\\)",
        "percent-encoded parent-directory traversal",
        InjectionKind::PathTraversal,
    ),
    (
        r"(?i)\.\.(%2f|%5c)",
        "percent-encoded path separator after '..'",
        InjectionKind::PathTraversal,
    ),
    (
        r"(?i)%252e",
        "double-encoded dot sequence",
        InjectionKind::PathTraversal,
    ),
    (r"^/etc(/|$)", "absolute path into /etc", InjectionKind::PathTraversal),
    (r"^/root(/|$)", "absolute path into /root", InjectionKind::PathTraversal),
    (r"^~", "home-directory expansion", InjectionKind::PathTraversal),
    (r"(^|/)\.ssh(/|$)", "SSH credential directory", InjectionKind::PathTraversal),
    (r"(^|/)\.aws(/|$)", "AWS credential directory", InjectionKind::PathTraversal),
    (r"(^|/)\.gnupg(/|$)", "GnuPG credential directory", InjectionKind::PathTraversal),
    (r"(^|/)\.netrc(/|$)", "netrc credentials file", InjectionKind::PathTraversal),
    (
        r"(^|/)\.env([./]|$)",
        "environment secrets file",
        InjectionKind::PathTraversal,
    ),
];

const SQL_SOURCES: &[(&str, &str, InjectionKind)] = &[
    (
        r"(?i)'\s*(or|and)\s+'?\d+'?\s*=\s*'?\d+",
        "quoted boolean tautology",
        InjectionKind::SqlInjection,
    ),
    (
        r"(?i)\bunion\s+(all\s+)?select\b",
        "UNION SELECT clause",
        InjectionKind::SqlInjection,
    ),
    (
        r"(?i);\s*(drop|truncate)\s+table\b",
        "chained DROP/TRUNCATE TABLE",
        InjectionKind::SqlInjection,
    ),
    (
        r"(?i);\s*delete\s+from\b",
        "chained DELETE FROM",
        InjectionKind::SqlInjection,
    ),
    (
        r"(?i);\s*insert\s+into\b",
        "chained INSERT INTO",
        InjectionKind::SqlInjection,
    ),
    (r";\s*--", "statement terminator with comment tail", InjectionKind::SqlInjection),
];

const TEMPLATE_SOURCES: &[(&str, &str, InjectionKind)] = &[
    (
        r"\{\{.+\}\}",
        "handlebars/jinja template expression",
        InjectionKind::TemplateInjection,
    ),
    (
        r"\$\{.+\}",
        "dollar-brace template expansion",
        InjectionKind::TemplateInjection,
    ),
    (r"<%.+%>", "ERB/JSP template tag", InjectionKind::TemplateInjection),
];

const PROMPT_SOURCES: &[(&str, &str, InjectionKind)] = &[
    (
        r"(?i)ignore\s+(all\s+|any\s+)?(previous|prior|above)\s+instructions",
        "instruction-override phrasing",
        InjectionKind::PromptInjection,
    ),
    (
        r"(?i)disregard\s+(your|the|all)\s+(system\s+)?(prompt|instructions|rules)",
        "system-prompt override phrasing",
        InjectionKind::PromptInjection,
    ),
    (
        r"(?i)forget\s+(everything|all)\s+(you|above)",
        "context-reset phrasing",
        InjectionKind::PromptInjection,
    ),
    (
        r"(?i)you\s+are\s+now\s+(dan|in\s+developer\s+mode)",
        "persona-jailbreak phrasing",
        InjectionKind::PromptInjection,
    ),
    (
        r"(?i)reveal\s+(your\s+)?(system\s+prompt|hidden\s+instructions)",
        "prompt-exfiltration phrasing",
        InjectionKind::PromptInjection,
    ),
    (
        r"(?i)pretend\s+(you\s+have|there\s+are)\s+no\s+(rules|restrictions|guidelines)",
        "restriction-bypass phrasing",
        InjectionKind::PromptInjection,
    ),
];

/// Dangerous shell constructs checked by `validate_command` beyond the bare
/// metacharacter table.
const SHELL_CONSTRUCT_SOURCES: &[(&str, &str, InjectionKind)] = &[
    (
        r"\$\(",
        "command substitution '$('",
        InjectionKind::CommandInjection,
    ),
    (
        r"(?i)(^|\s)eval(\s|$)",
        "dangerous shell builtin 'eval'",
        InjectionKind::CommandInjection,
    ),
    (
        r"(?i)(^|\s)exec(\s|$)",
        "dangerous shell builtin 'exec'",
        InjectionKind::CommandInjection,
    ),
    (
        r"(?i)(^|\s)source\s",
        "dangerous shell builtin 'source'",
        InjectionKind::CommandInjection,
    ),
];

pub(crate) static TRAVERSAL_RULES: LazyLock<Vec<DetectionRule>> =
    LazyLock::new(|| compile_rules(TRAVERSAL_SOURCES));
pub(crate) static SQL_RULES: LazyLock<Vec<DetectionRule>> =
    LazyLock::new(|| compile_rules(SQL_SOURCES));
pub(crate) static TEMPLATE_RULES: LazyLock<Vec<DetectionRule>> =
    LazyLock::new(|| compile_rules(TEMPLATE_SOURCES));
pub(crate) static PROMPT_RULES: LazyLock<Vec<DetectionRule>> =
    LazyLock::new(|| compile_rules(PROMPT_SOURCES));
pub(crate) static SHELL_CONSTRUCT_RULES: LazyLock<Vec<DetectionRule>> =
    LazyLock::new(|| compile_rules(SHELL_CONSTRUCT_SOURCES));

/// Shell metacharacters rejected by `validate_command` unless the caller
/// explicitly allows shell syntax.
pub(crate) const SHELL_METACHARACTERS: &[(char, &str)] = &[
    (';', "command chaining"),
    ('|', "pipe"),
    ('&', "background execution / chaining"),
    ('$', "variable or command substitution"),
    ('`', "backtick command substitution"),
    ('>', "output redirection"),
    ('<', "input redirection"),
    ('\n', "newline command separator"),
    ('\r', "carriage-return command separator"),
];

/// Bidi controls, zero-width characters, and the BOM. Any of these inside a
/// value proposed by a model is treated as an attack.
const BIDI_AND_ZERO_WIDTH: &[char] = &[
    '\u{202A}', '\u{202B}', '\u{202C}', '\u{202D}', '\u{202E}', '\u{2066}', '\u{2067}',
    '\u{2068}', '\u{2069}', '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}',
];

/// Cyrillic letters visually identical to Latin ones, the classic homoglyph
/// spoofing set.
const CYRILLIC_HOMOGLYPHS: &[char] = &[
    '\u{0430}', '\u{0435}', '\u{043E}', '\u{0440}', '\u{0441}', '\u{0443}', '\u{0445}',
    '\u{0410}', '\u{0415}', '\u{041E}', '\u{0420}', '\u{0421}', '\u{0425}',
];

/// Label for a dangerous code point, or `None` for a benign one.
pub(crate) fn dangerous_code_point(c: char) -> Option<&'static str> {
    if BIDI_AND_ZERO_WIDTH.contains(&c) {
        Some("bidi/zero-width control character")
    } else if CYRILLIC_HOMOGLYPHS.contains(&c) {
        Some("Cyrillic homoglyph")
    } else {
        None
    }
}

static FILENAME_ALLOWLIST: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^[A-Za-z0-9._-]+$"));
static IDENTIFIER_ALLOWLIST: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^[A-Za-z_][A-Za-z0-9_]*$"));
static PATH_SEGMENT_ALLOWLIST: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^[A-Za-z0-9._-]+$"));
static GIT_BRANCH_ALLOWLIST: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$"));
static ENV_VAR_NAME_ALLOWLIST: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^[A-Z_][A-Z0-9_]*$"));

/// Named character-class allow-list for the given pattern name, if one exists.
pub(crate) fn allowlist(name: AllowlistName) -> &'static Regex {
    match name {
        AllowlistName::Filename => &FILENAME_ALLOWLIST,
        AllowlistName::Identifier => &IDENTIFIER_ALLOWLIST,
        AllowlistName::PathSegment => &PATH_SEGMENT_ALLOWLIST,
        AllowlistName::GitBranch => &GIT_BRANCH_ALLOWLIST,
        AllowlistName::EnvVarName => &ENV_VAR_NAME_ALLOWLIST,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllowlistName {
    Filename,
    Identifier,
    PathSegment,
    GitBranch,
    EnvVarName,
}

impl AllowlistName {
    pub(crate) const fn label(self) -> &'static str {
        match self {
            Self::Filename => "filename",
            Self::Identifier => "identifier",
            Self::PathSegment => "path segment",
            Self::GitBranch => "git branch",
            Self::EnvVarName => "environment variable name",
        }
    }
}

/// File extensions that mark a name as executable content.
pub(crate) const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "msi", "ps1", "sh", "bash", "zsh", "py", "rb", "pl",
    "php", "jar",
];

/// System directories that warrant a warning when referenced. `/etc` and
/// `/root` additionally hard-fail through the traversal rules when a value
/// starts with them.
pub(crate) const SENSITIVE_DIRECTORIES: &[&str] =
    &["/etc", "/root", "/var", "/boot", "/proc", "/sys", "/dev"];

/// Words inside a command string that flag privileged or destructive intent.
pub(crate) const RISKY_COMMAND_WORDS: &[&str] = &["sudo", "chown", "chmod", "rm"];
