//! Child environment synthesis.
//!
//! The child never inherits the parent environment as-is. Either it starts
//! from nothing (`Minimal`) or from the parent minus a deny list
//! (`Inherit`), and in both modes a fixed `PATH`, locale, and terminal type
//! are forced afterwards so nothing earlier in the map can override them.

use std::collections::HashMap;
use std::env;

use serde::{Deserialize, Serialize};

/// The only `PATH` a child ever sees.
pub const FIXED_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// How the child environment is synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvMode {
    /// Safe defaults only.
    #[default]
    Minimal,
    /// Parent environment minus the deny list.
    Inherit,
}

/// Variables that must never reach a child: loader injection, interpreter
/// startup hooks, shell re-entry points, and agent/credential sockets.
const DENIED_NAMES: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "PYTHONPATH",
    "PYTHONSTARTUP",
    "PYTHONHOME",
    "PERL5LIB",
    "RUBYLIB",
    "NODE_OPTIONS",
    "BASH_ENV",
    "ENV",
    "PROMPT_COMMAND",
    "SHELL",
    "IFS",
    "GLIBC_TUNABLES",
    "GCONV_PATH",
    "HOSTALIASES",
    "SSH_AUTH_SOCK",
    "GPG_AGENT_INFO",
    "KUBECONFIG",
    "VAULT_TOKEN",
    "PATH",
];

const DENIED_PREFIXES: &[&str] = &["LD_", "DYLD_", "AWS_", "AZURE_", "GOOGLE_", "GCP_", "MALLOC_"];

const DENIED_SUFFIXES: &[&str] = &["_TOKEN", "_KEY", "_SECRET", "_PASSWORD", "_CREDENTIALS"];

/// Whether a variable name is stripped by the deny list.
pub fn is_denied_var(name: &str) -> bool {
    DENIED_NAMES.contains(&name)
        || DENIED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
        || DENIED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Build the environment map for one child process.
///
/// Always constructed fresh; the result is never cached or shared between
/// calls. `extra` entries pass through the same deny list as inherited
/// variables.
pub fn build_child_env(
    mode: EnvMode,
    extra: Option<&HashMap<String, String>>,
) -> HashMap<String, String> {
    let mut child_env = HashMap::new();

    if mode == EnvMode::Inherit {
        for (name, value) in env::vars_os() {
            let (Some(name), Some(value)) = (name.to_str(), value.to_str()) else {
                continue;
            };
            if !is_denied_var(name) {
                child_env.insert(name.to_owned(), value.to_owned());
            }
        }
    }

    if let Some(extra) = extra {
        for (name, value) in extra {
            if !is_denied_var(name) {
                child_env.insert(name.clone(), value.clone());
            }
        }
    }

    // Forced values go last so neither inheritance nor extras can win.
    child_env.insert("PATH".to_owned(), FIXED_PATH.to_owned());
    if let Ok(home) = env::var("HOME") {
        child_env.insert("HOME".to_owned(), home);
    }
    if let Ok(user) = env::var("USER") {
        child_env.insert("USER".to_owned(), user);
    }
    child_env.insert("LANG".to_owned(), "C.UTF-8".to_owned());
    child_env.insert("LC_ALL".to_owned(), "C.UTF-8".to_owned());
    child_env.insert("TERM".to_owned(), "dumb".to_owned());

    child_env
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deny_list_covers_exact_prefix_and_suffix_rules() {
        assert!(is_denied_var("LD_PRELOAD"));
        assert!(is_denied_var("SHELL"));
        assert!(is_denied_var("DYLD_FRAMEWORK_PATH"));
        assert!(is_denied_var("AWS_SESSION"));
        assert!(is_denied_var("GITHUB_TOKEN"));
        assert!(is_denied_var("DATABASE_PASSWORD"));

        assert!(!is_denied_var("HOME"));
        assert!(!is_denied_var("LANG"));
        assert!(!is_denied_var("CARGO_TARGET_DIR"));
    }

    #[test]
    fn minimal_mode_contains_only_safe_defaults() {
        let child_env = build_child_env(EnvMode::Minimal, None);
        assert_eq!(child_env.get("PATH").map(String::as_str), Some(FIXED_PATH));
        assert_eq!(child_env.get("TERM").map(String::as_str), Some("dumb"));
        assert_eq!(child_env.get("LC_ALL").map(String::as_str), Some("C.UTF-8"));
        assert!(!child_env.contains_key("SHELL"));
        assert!(child_env.len() <= 6);
    }

    #[test]
    fn extras_are_filtered_through_the_deny_list() {
        let mut extra = HashMap::new();
        extra.insert("LD_PRELOAD".to_owned(), "/tmp/evil.so".to_owned());
        extra.insert("API_SECRET".to_owned(), "hunter2".to_owned());
        extra.insert("BUILD_DIR".to_owned(), "/tmp/build".to_owned());

        let child_env = build_child_env(EnvMode::Minimal, Some(&extra));
        assert!(!child_env.contains_key("LD_PRELOAD"));
        assert!(!child_env.contains_key("API_SECRET"));
        assert_eq!(
            child_env.get("BUILD_DIR").map(String::as_str),
            Some("/tmp/build")
        );
    }

    #[test]
    fn extras_cannot_override_the_fixed_path() {
        let mut extra = HashMap::new();
        extra.insert("PATH".to_owned(), "/tmp/evil-bin".to_owned());

        let child_env = build_child_env(EnvMode::Minimal, Some(&extra));
        assert_eq!(child_env.get("PATH").map(String::as_str), Some(FIXED_PATH));
    }

    #[test]
    fn inherit_mode_strips_denied_variables() {
        std::env::set_var("STOCKADE_TEST_PLAIN", "keep");
        std::env::set_var("STOCKADE_TEST_API_TOKEN", "drop");

        let child_env = build_child_env(EnvMode::Inherit, None);
        assert_eq!(
            child_env.get("STOCKADE_TEST_PLAIN").map(String::as_str),
            Some("keep")
        );
        assert!(!child_env.contains_key("STOCKADE_TEST_API_TOKEN"));
        assert_eq!(child_env.get("PATH").map(String::as_str), Some(FIXED_PATH));
        assert!(!child_env.contains_key("SHELL"));

        std::env::remove_var("STOCKADE_TEST_PLAIN");
        std::env::remove_var("STOCKADE_TEST_API_TOKEN");
    }
}
