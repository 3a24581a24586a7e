//! Pre-spawn command admission.
//!
//! Admission is a pure policy decision over an argument vector: `Deny` for
//! the blocked set (every mode), `Confirm` for the dangerous set outside
//! `Privileged`, and in `Strict` mode `Deny` for anything not on the safe
//! allow-list. When the program is a shell invoked with `-c`, the script
//! payload is tokenized and each embedded command re-checked, so a blocked
//! command cannot ride in through `bash -c`.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Admission strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Only the safe allow-list (plus configured extras) may run.
    Strict,
    /// Anything not blocked may run; dangerous commands need confirmation.
    #[default]
    Standard,
    /// Dangerous commands run without confirmation. Blocked stays blocked.
    Privileged,
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionDecision {
    Allow,
    /// The command may run, but only after the caller obtains explicit user
    /// confirmation. The executor itself never blocks on this.
    Confirm { command: String },
    Deny { reason: String },
}

/// Destructive or irreversible operations, rejected in every mode.
const BLOCKED_COMMANDS: &[&str] = &[
    "rm", "dd", "mkfs", "shutdown", "reboot", "halt", "poweroff", "init", "passwd", "sudo", "su",
    "mount", "umount", "iptables", "nftables", "ufw", "systemctl", "service", "kill", "killall",
    "pkill", "fdisk", "parted", "chroot", "modprobe", "insmod", "rmmod", "mkswap", "swapon",
    "swapoff",
];

/// Commands that change state broadly enough to need a human in the loop.
const DANGEROUS_COMMANDS: &[&str] = &[
    "chmod", "chown", "chgrp", "mv", "cp", "ln", "apt", "apt-get", "yum", "dnf", "pacman", "brew",
    "npm", "pip", "pip3", "cargo", "gem", "docker", "podman", "kubectl", "curl", "wget", "git",
    "make", "gcc", "g++", "tar", "unzip", "crontab",
];

/// Read-only or otherwise harmless commands allowed under `Strict`.
const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "find", "echo", "pwd", "whoami", "date", "wc", "sort",
    "uniq", "cut", "tr", "which", "file", "stat", "du", "df", "env", "printenv", "basename",
    "dirname", "readlink", "sleep", "true", "false", "diff", "cmp", "md5sum", "sha256sum",
];

const SHELL_PROGRAMS: &[&str] = &["sh", "bash", "zsh", "dash"];

const SHELL_SCRIPT_FLAGS: &[&str] = &["-c", "-lc", "-ic", "-ilc"];

/// The admission policy for one executor: a mode plus any extra commands
/// granted under `Strict`.
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    mode: ExecutionMode,
    extra_safe: BTreeSet<String>,
}

impl AdmissionPolicy {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            extra_safe: BTreeSet::new(),
        }
    }

    /// Extend the `Strict` allow-list with extra command names.
    pub fn with_extra_safe(mut self, commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_safe.extend(commands.into_iter().map(Into::into));
        self
    }

    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Decide whether `args` may be spawned. Pure; spawns nothing.
    pub fn admit(&self, args: &[String]) -> AdmissionDecision {
        let Some(program) = args.first() else {
            return AdmissionDecision::Deny {
                reason: "empty command".to_owned(),
            };
        };
        let base = basename(program);

        if is_blocked(base) {
            return AdmissionDecision::Deny {
                reason: format!("'{base}' is a blocked command"),
            };
        }

        let mut needs_confirmation = is_dangerous(base).then(|| base.to_owned());

        if let Some(script) = shell_payload(args) {
            for embedded in split_script_commands(script) {
                let Some(first) = embedded.first() else {
                    continue;
                };
                let embedded_base = basename(first);
                if is_blocked(embedded_base) {
                    return AdmissionDecision::Deny {
                        reason: format!("shell payload invokes blocked command '{embedded_base}'"),
                    };
                }
                if needs_confirmation.is_none() && is_dangerous(embedded_base) {
                    needs_confirmation = Some(embedded_base.to_owned());
                }
            }
        }

        if self.mode == ExecutionMode::Strict
            && !is_safe(base)
            && !self.extra_safe.contains(base)
        {
            return AdmissionDecision::Deny {
                reason: format!("'{base}' is not in the strict allow-list"),
            };
        }

        match needs_confirmation {
            Some(command) if self.mode != ExecutionMode::Privileged => {
                AdmissionDecision::Confirm { command }
            }
            _ => AdmissionDecision::Allow,
        }
    }
}

fn basename(program: &str) -> &str {
    Path::new(program)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(program)
}

fn is_blocked(name: &str) -> bool {
    BLOCKED_COMMANDS.contains(&name) || name.starts_with("mkfs.")
}

fn is_dangerous(name: &str) -> bool {
    DANGEROUS_COMMANDS.contains(&name)
}

fn is_safe(name: &str) -> bool {
    SAFE_COMMANDS.contains(&name)
}

/// The script string of a `sh -c` style invocation, if `args` is one.
fn shell_payload(args: &[String]) -> Option<&str> {
    let base = basename(args.first()?);
    if !SHELL_PROGRAMS.contains(&base) {
        return None;
    }
    args.windows(2).find_map(|window| {
        SHELL_SCRIPT_FLAGS
            .contains(&window[0].as_str())
            .then(|| window[1].as_str())
    })
}

/// Split a shell script into its embedded commands: segments at unquoted
/// `;`, `&`, `|`, and newlines, each segment tokenized. No expansion, no
/// execution; this exists purely so admission can inspect command names.
pub(crate) fn split_script_commands(script: &str) -> Vec<Vec<String>> {
    let mut commands = Vec::new();
    let mut segment = String::new();
    let mut in_quotes = false;
    let mut quote_char = ' ';
    let mut escaped = false;

    for c in script.chars() {
        if escaped {
            segment.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '\'' | '"' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            c if in_quotes && c == quote_char => in_quotes = false,
            ';' | '&' | '|' | '\n' if !in_quotes => {
                push_segment(&mut commands, &segment);
                segment.clear();
            }
            _ => segment.push(c),
        }
    }
    push_segment(&mut commands, &segment);
    commands
}

fn push_segment(commands: &mut Vec<Vec<String>>, segment: &str) {
    let tokens = split_command_line(segment);
    if !tokens.is_empty() {
        commands.push(tokens);
    }
}

/// Quote-aware whitespace tokenizer. Quotes group, backslash escapes
/// (except inside single quotes); nothing is expanded.
pub fn split_command_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quote_char = ' ';
    let mut escaped = false;

    for c in line.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if quote_char != '\'' => escaped = true,
            '\'' | '"' if !in_quotes => {
                in_quotes = true;
                quote_char = c;
            }
            c if in_quotes && c == quote_char => {
                in_quotes = false;
                quote_char = ' ';
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
