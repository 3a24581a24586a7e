//! Deterministic error categorization.
//!
//! Categories come from ordered substring matching over the lower-cased
//! error text. First match wins, so marker-group order is significant: the
//! command-not-found group runs before the generic not-found group, which
//! would otherwise swallow it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of failure an error string describes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Syntax,
    Permission,
    NotFound,
    CommandNotFound,
    Timeout,
    TypeError,
    ValueError,
    Network,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syntax => "syntax",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::CommandNotFound => "command_not_found",
            Self::Timeout => "timeout",
            Self::TypeError => "type_error",
            Self::ValueError => "value_error",
            Self::Network => "network",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// How the recovery engine should react to a categorized failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Retry the same tool with corrected arguments.
    RetryModified,
    /// Retry with a different tool or target.
    RetryAlternative,
    /// The command does not exist here; suggest installing it.
    SuggestInstall,
    /// The operation needs rights we do not have; suggest obtaining them.
    SuggestPermission,
    /// Give up and hand the failure to a human.
    Escalate,
    /// Stop without escalation.
    Abort,
}

/// Ordered marker groups; scanning stops at the first group with a hit.
const CATEGORY_MARKERS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::CommandNotFound,
        &["command not found", "no such command", "is not recognized"],
    ),
    (
        ErrorCategory::Permission,
        &[
            "permission denied",
            "access denied",
            "operation not permitted",
            "eacces",
            "eperm",
        ],
    ),
    (
        ErrorCategory::Timeout,
        &["timed out", "timeout", "deadline exceeded"],
    ),
    (
        ErrorCategory::Network,
        &[
            "connection refused",
            "connection reset",
            "network is unreachable",
            "no route to host",
            "name or service not known",
            "temporary failure in name resolution",
            "network",
        ],
    ),
    (
        ErrorCategory::Syntax,
        &[
            "syntax error",
            "invalid syntax",
            "unexpected token",
            "parse error",
            "unexpected eof",
        ],
    ),
    (
        ErrorCategory::TypeError,
        &["typeerror", "type error", "type mismatch"],
    ),
    (
        ErrorCategory::ValueError,
        &[
            "valueerror",
            "value error",
            "invalid value",
            "invalid argument",
            "invalid option",
        ],
    ),
    (
        ErrorCategory::NotFound,
        &[
            "no such file or directory",
            "not found",
            "does not exist",
            "enoent",
            "cannot find",
        ],
    ),
];

/// Map an error string to its category. Pure; empty input is `Unknown`.
pub fn categorize_error(error: &str) -> ErrorCategory {
    if error.trim().is_empty() {
        return ErrorCategory::Unknown;
    }
    let lowered = error.to_lowercase();
    for (category, markers) in CATEGORY_MARKERS {
        if markers.iter().any(|marker| lowered.contains(marker)) {
            return *category;
        }
    }
    ErrorCategory::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fixtures_map_to_their_categories() {
        let cases = [
            ("Permission denied: /etc/shadow", ErrorCategory::Permission),
            ("bash: foo: command not found", ErrorCategory::CommandNotFound),
            ("No such file or directory", ErrorCategory::NotFound),
            ("Connection refused (os error 111)", ErrorCategory::Network),
            ("process timed out after 100ms", ErrorCategory::Timeout),
            ("SyntaxError: invalid syntax", ErrorCategory::Syntax),
            ("TypeError: cannot concatenate", ErrorCategory::TypeError),
            ("ValueError: invalid literal", ErrorCategory::ValueError),
            ("something inscrutable happened", ErrorCategory::Unknown),
        ];
        for (error, expected) in cases {
            assert_eq!(categorize_error(error), expected, "{error}");
        }
    }

    #[test]
    fn command_not_found_wins_over_generic_not_found() {
        assert_eq!(
            categorize_error("zsh: command not found: pyhton"),
            ErrorCategory::CommandNotFound
        );
        assert_eq!(
            categorize_error("config file not found"),
            ErrorCategory::NotFound
        );
    }

    #[test]
    fn empty_and_whitespace_are_unknown() {
        assert_eq!(categorize_error(""), ErrorCategory::Unknown);
        assert_eq!(categorize_error("   \n\t"), ErrorCategory::Unknown);
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(categorize_error("PERMISSION DENIED"), ErrorCategory::Permission);
        assert_eq!(categorize_error("Timed Out"), ErrorCategory::Timeout);
    }

    #[test]
    fn every_marker_resolves_to_its_own_group() {
        for (category, markers) in CATEGORY_MARKERS {
            for marker in *markers {
                assert_eq!(categorize_error(marker), *category, "{marker}");
            }
        }
    }
}
