//! Sandboxed command execution.
//!
//! [`SecureExecutor`] spawns argument vectors, never shell strings. Every
//! child gets a synthesized environment, its own process group, POSIX
//! resource ceilings applied between fork and exec, a wall clock timeout
//! enforced from the parent, and capped output capture. `execute` does not
//! return `Result`: every failure mode is folded into [`ExecutionResult`]
//! so callers always get exit data, output, and a reason.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::admission::{split_command_line, AdmissionDecision, AdmissionPolicy, ExecutionMode};
use crate::env::{build_child_env, EnvMode};
use crate::limits::{platform_limiter, ResourceLimiter, ResourceLimits};
#[cfg(unix)]
use crate::process_group::{self, KillSignal};

/// Captured bytes per stream before the rest is drained and discarded.
pub const OUTPUT_CAP_BYTES: usize = 1024 * 1024;

/// Appended to a stream that hit [`OUTPUT_CAP_BYTES`].
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

const READ_CHUNK: usize = 8192;

/// One command to run: an argument vector plus per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
    timeout: Option<Duration>,
    stdin: Option<Vec<u8>>,
}

impl ExecRequest {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Extra environment for this call. Entries still pass the deny list,
    /// and forced variables such as `PATH` cannot be overridden.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Wall clock ceiling for this call, overriding the limit profile.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(bytes.into());
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Everything that came out of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// The child was killed by a resource ceiling (CPU time or file size).
    pub resource_exceeded: bool,
    pub execution_time: Duration,
    pub command: Vec<String>,
    pub working_directory: PathBuf,
    pub error_message: Option<String>,
}

impl ExecutionResult {
    /// A result for a command that was never spawned.
    pub fn rejected(command: &[String], reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            success: false,
            exit_code: None,
            stdout: String::new(),
            stderr: reason.clone(),
            timed_out: false,
            resource_exceeded: false,
            execution_time: Duration::ZERO,
            command: command.to_vec(),
            working_directory: PathBuf::new(),
            error_message: Some(reason),
        }
    }

    fn in_dir(mut self, dir: Option<&Path>) -> Self {
        if let Some(dir) = dir {
            self.working_directory = dir.to_path_buf();
        }
        self
    }
}

/// Spawns pre-validated argument vectors under admission policy, resource
/// ceilings, and a synthesized environment.
#[derive(Debug, Clone)]
pub struct SecureExecutor {
    policy: AdmissionPolicy,
    env_mode: EnvMode,
    limits: ResourceLimits,
    limiter: Arc<dyn ResourceLimiter>,
    default_cwd: Option<PathBuf>,
}

impl SecureExecutor {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            policy: AdmissionPolicy::new(mode),
            env_mode: EnvMode::default(),
            limits: ResourceLimits::default(),
            limiter: platform_limiter(),
            default_cwd: None,
        }
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_env_mode(mut self, mode: EnvMode) -> Self {
        self.env_mode = mode;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_cwd = Some(dir.into());
        self
    }

    /// Extend the strict-mode allow-list.
    pub fn with_extra_safe_commands(
        mut self,
        commands: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.policy = self.policy.with_extra_safe(commands);
        self
    }

    /// Swap the resource limiter, mainly for tests and non-POSIX hosts.
    pub fn with_limiter(mut self, limiter: Arc<dyn ResourceLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub const fn mode(&self) -> ExecutionMode {
        self.policy.mode()
    }

    pub const fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// The admission decision for `args` without running anything. Callers
    /// that honor confirmation prompts ask here first; `execute` itself
    /// treats `Confirm` as already confirmed.
    pub fn admission(&self, args: &[String]) -> AdmissionDecision {
        self.policy.admit(args)
    }

    /// Run one command to completion. Never panics and never returns an
    /// error; rejections, spawn failures, timeouts, and signals all come
    /// back as an [`ExecutionResult`] with `error_message` set.
    pub async fn execute(&self, request: ExecRequest) -> ExecutionResult {
        let start = Instant::now();
        let cwd = request.cwd.clone().or_else(|| self.default_cwd.clone());

        if request.args.is_empty() {
            return ExecutionResult::rejected(&request.args, "empty command")
                .in_dir(cwd.as_deref());
        }
        match self.policy.admit(&request.args) {
            AdmissionDecision::Allow => {}
            AdmissionDecision::Confirm { command } => {
                debug!(command, "running confirmation-gated command");
            }
            AdmissionDecision::Deny { reason } => {
                debug!(reason, "command rejected by admission policy");
                return ExecutionResult::rejected(&request.args, reason).in_dir(cwd.as_deref());
            }
        }

        if let Some(dir) = &cwd {
            if !dir.is_dir() {
                return ExecutionResult::rejected(
                    &request.args,
                    format!("working directory {} does not exist", dir.display()),
                )
                .in_dir(Some(dir));
            }
        }
        let working_directory = cwd
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());

        let child_env = build_child_env(self.env_mode, Some(&request.env));

        let mut command = Command::new(&request.args[0]);
        command
            .args(&request.args[1..])
            .env_clear()
            .envs(&child_env)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &cwd {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        {
            let limiter = Arc::clone(&self.limiter);
            let limits = self.limits;
            // Runs between fork and exec; only async-signal-safe calls.
            unsafe {
                command.pre_exec(move || {
                    process_group::enter_own_process_group()?;
                    limiter.apply(&limits)
                });
            }
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                let reason = match err.kind() {
                    ErrorKind::NotFound => {
                        format!("command not found: {}", request.args[0])
                    }
                    ErrorKind::PermissionDenied => {
                        format!("permission denied: {}", request.args[0])
                    }
                    _ => format!("failed to spawn {}: {err}", request.args[0]),
                };
                return ExecutionResult::rejected(&request.args, reason)
                    .in_dir(Some(&working_directory));
            }
        };

        let stdin_task = request.stdin.as_ref().and_then(|bytes| {
            let bytes = bytes.clone();
            child.stdin.take().map(|mut pipe| {
                tokio::spawn(async move {
                    // The child may exit without reading; that is not our
                    // failure to report.
                    let _ = pipe.write_all(&bytes).await;
                    let _ = pipe.shutdown().await;
                })
            })
        });
        let stdout_task = child
            .stdout
            .take()
            .map(|stream| tokio::spawn(drain_capped(stream)));
        let stderr_task = child
            .stderr
            .take()
            .map(|stream| tokio::spawn(drain_capped(stream)));

        let wall = request.timeout.unwrap_or_else(|| self.limits.wall_clock());
        let mut timed_out = false;
        let mut wait_failure = None;
        let status = match tokio::time::timeout(wall, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(err)) => {
                wait_failure = Some(format!("failed to await child: {err}"));
                None
            }
            Err(_) => {
                timed_out = true;
                #[cfg(unix)]
                if let Some(pid) = child.id() {
                    if let Err(err) = process_group::kill_group(pid, KillSignal::Kill) {
                        warn!(pid, error = %err, "failed to kill process group on timeout");
                    }
                }
                // Reaps the direct child even if the group signal missed.
                let _ = child.kill().await;
                None
            }
        };

        if let Some(task) = stdin_task {
            let _ = task.await;
        }
        let (stdout_bytes, stdout_truncated) = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => (Vec::new(), false),
        };
        let (stderr_bytes, stderr_truncated) = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => (Vec::new(), false),
        };

        let mut stdout = String::from_utf8_lossy(&stdout_bytes).into_owned();
        if stdout_truncated {
            stdout.push_str(TRUNCATION_MARKER);
        }
        let mut stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();
        if stderr_truncated {
            stderr.push_str(TRUNCATION_MARKER);
        }

        let resource_exceeded = status.as_ref().is_some_and(resource_signal_hit);
        let error_message = if let Some(reason) = wait_failure {
            Some(reason)
        } else if timed_out {
            Some(format!("timed out after {}ms", wall.as_millis()))
        } else {
            status.as_ref().and_then(exit_failure_reason)
        };

        ExecutionResult {
            success: status.as_ref().is_some_and(ExitStatus::success),
            exit_code: status.as_ref().and_then(ExitStatus::code),
            stdout,
            stderr,
            timed_out,
            resource_exceeded,
            execution_time: start.elapsed(),
            command: request.args,
            working_directory,
            error_message,
        }
    }

    /// Blocking wrapper around [`execute`](Self::execute) for callers that
    /// do not own a runtime. Refuses to run inside one.
    pub fn execute_sync(&self, request: ExecRequest) -> ExecutionResult {
        if tokio::runtime::Handle::try_current().is_ok() {
            return ExecutionResult::rejected(
                &request.args,
                "execute_sync called from within an async runtime; use execute",
            );
        }
        match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(self.execute(request)),
            Err(err) => {
                ExecutionResult::rejected(&request.args, format!("failed to build runtime: {err}"))
            }
        }
    }

    /// Tokenize a raw command line and run it. Quoting is respected but
    /// nothing is expanded; prefer [`execute`](Self::execute) with an
    /// argument vector.
    pub async fn execute_line(&self, line: &str) -> ExecutionResult {
        warn!("executing a raw command line; prefer pre-tokenized argument vectors");
        self.execute(ExecRequest::new(split_command_line(line))).await
    }
}

/// Read a stream to EOF, keeping at most [`OUTPUT_CAP_BYTES`]. The tail is
/// still consumed so the child never blocks on a full pipe.
async fn drain_capped<R>(mut stream: R) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if captured.len() < OUTPUT_CAP_BYTES {
                    let take = n.min(OUTPUT_CAP_BYTES - captured.len());
                    captured.extend_from_slice(&buf[..take]);
                    if take < n {
                        truncated = true;
                    }
                } else {
                    truncated = true;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    (captured, truncated)
}

fn exit_failure_reason(status: &ExitStatus) -> Option<String> {
    if status.success() {
        return None;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(describe_signal(signal));
        }
    }
    status.code().map(|code| format!("exited with status {code}"))
}

#[cfg(unix)]
fn resource_signal_hit(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    matches!(status.signal(), Some(libc::SIGXCPU | libc::SIGXFSZ))
}

#[cfg(not(unix))]
fn resource_signal_hit(_status: &ExitStatus) -> bool {
    false
}

#[cfg(unix)]
fn describe_signal(signal: i32) -> String {
    match signal {
        libc::SIGXCPU => "cpu time limit exceeded (SIGXCPU)".to_owned(),
        libc::SIGXFSZ => "file size limit exceeded (SIGXFSZ)".to_owned(),
        libc::SIGKILL => "killed (SIGKILL)".to_owned(),
        libc::SIGSEGV => "segmentation fault (SIGSEGV)".to_owned(),
        other => format!("terminated by signal {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::FIXED_PATH;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn standard() -> SecureExecutor {
        SecureExecutor::new(ExecutionMode::Standard)
    }

    #[tokio::test]
    async fn echo_captures_stdout() {
        let result = standard().execute(ExecRequest::new(["echo", "hello"])).await;
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "");
        assert_eq!(result.error_message, None);
        assert!(!result.timed_out);
        assert!(!result.resource_exceeded);
        assert_eq!(result.command, vec!["echo", "hello"]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let result = standard().execute(ExecRequest::new(["false"])).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
        let reason = result.error_message.unwrap();
        assert!(reason.contains("exited with status 1"), "{reason}");
    }

    #[tokio::test]
    async fn missing_command_reports_not_found() {
        let result = standard()
            .execute(ExecRequest::new(["no-such-binary-acbd18db"]))
            .await;
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        let reason = result.error_message.unwrap();
        assert!(reason.contains("command not found"), "{reason}");
        assert!(result.stderr.contains("command not found"));
    }

    #[tokio::test]
    async fn blocked_command_is_rejected_without_spawning() {
        let result = standard().execute(ExecRequest::new(["rm", "-rf", "/tmp/x"])).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.error_message.unwrap().contains("blocked"));
    }

    #[tokio::test]
    async fn strict_mode_rejects_unlisted_commands() {
        let executor = SecureExecutor::new(ExecutionMode::Strict);
        let result = executor.execute(ExecRequest::new(["python3", "-V"])).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("allow-list"));
    }

    #[tokio::test]
    async fn confirmation_gated_command_still_runs() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.txt");
        std::fs::write(&src, "payload").unwrap();
        let dst = dir.path().join("b.txt");

        let executor = standard();
        let args = vec![
            "cp".to_owned(),
            src.display().to_string(),
            dst.display().to_string(),
        ];
        assert!(matches!(
            executor.admission(&args),
            AdmissionDecision::Confirm { .. }
        ));
        let result = executor.execute(ExecRequest::new(args)).await;
        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(std::fs::read_to_string(dst).unwrap(), "payload");
    }

    #[tokio::test]
    async fn sleep_is_cut_off_at_the_wall_clock() {
        let started = Instant::now();
        let result = standard()
            .execute(ExecRequest::new(["sleep", "10"]).timeout(Duration::from_millis(100)))
            .await;
        let elapsed = started.elapsed();
        assert!(result.timed_out);
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.error_message.unwrap().contains("timed out"));
        assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn stdin_bytes_reach_the_child() {
        let result = standard()
            .execute(ExecRequest::new(["cat"]).stdin("through the pipe"))
            .await;
        assert!(result.success);
        assert_eq!(result.stdout, "through the pipe");
    }

    #[tokio::test]
    async fn oversized_output_is_truncated_with_a_marker() {
        let result = standard()
            .execute(ExecRequest::new(["head", "-c", "2097152", "/dev/zero"]))
            .await;
        assert!(result.success);
        assert!(result.stdout.ends_with(TRUNCATION_MARKER));
        assert_eq!(result.stdout.len(), OUTPUT_CAP_BYTES + TRUNCATION_MARKER.len());
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn extra_env_passes_the_deny_list() {
        let result = standard()
            .execute(
                ExecRequest::new(["env"])
                    .env("AGENT_TASK_ID", "42")
                    .env("LD_PRELOAD", "/tmp/evil.so"),
            )
            .await;
        assert!(result.success);
        assert!(result.stdout.contains("AGENT_TASK_ID=42"));
        assert!(!result.stdout.contains("LD_PRELOAD"));
        assert!(result.stdout.contains("TERM=dumb"));
        assert!(result.stdout.contains("LC_ALL=C.UTF-8"));
    }

    #[tokio::test]
    async fn path_cannot_be_overridden() {
        let result = standard()
            .execute(ExecRequest::new(["env"]).env("PATH", "/tmp/nowhere"))
            .await;
        assert!(result.success);
        assert!(
            result.stdout.lines().any(|line| line == format!("PATH={FIXED_PATH}")),
            "{}",
            result.stdout
        );
    }

    #[tokio::test]
    async fn working_directory_is_applied() {
        let dir = tempdir().unwrap();
        let executor = standard().with_working_dir(dir.path());
        let result = executor.execute(ExecRequest::new(["pwd"])).await;
        assert!(result.success);
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(result.stdout.trim_end(), expected.display().to_string());
        assert_eq!(result.working_directory, dir.path());
    }

    #[tokio::test]
    async fn missing_working_directory_is_rejected() {
        let result = standard()
            .execute(ExecRequest::new(["pwd"]).current_dir("/definitely/not/here"))
            .await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("working directory"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_size_ceiling_kills_the_writer() {
        let dir = tempdir().unwrap();
        let limits = ResourceLimits::new(5, 256 * 1024 * 1024, 4096, 64, 32, 10.0).unwrap();
        let executor = standard().with_limits(limits).with_working_dir(dir.path());
        // /dev/zero never hits EOF, so cp only stops when the file size
        // ceiling delivers SIGXFSZ.
        let result = executor
            .execute(
                ExecRequest::new(["cp", "/dev/zero", "out.bin"])
                    .timeout(Duration::from_secs(5)),
            )
            .await;
        assert!(!result.success);
        assert!(!result.timed_out, "{:?}", result.error_message);
        assert!(result.resource_exceeded);
        let reason = result.error_message.unwrap();
        assert!(reason.contains("file size limit"), "{reason}");
    }

    #[test]
    fn execute_sync_works_outside_a_runtime() {
        let result = standard().execute_sync(ExecRequest::new(["echo", "sync"]));
        assert!(result.success);
        assert_eq!(result.stdout, "sync\n");
    }

    #[tokio::test]
    async fn execute_sync_refuses_inside_a_runtime() {
        let result = standard().execute_sync(ExecRequest::new(["echo", "nested"]));
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("async runtime"));
    }

    #[tokio::test]
    async fn execute_line_respects_quoting() {
        let result = standard().execute_line("echo 'a b'").await;
        assert!(result.success);
        assert_eq!(result.stdout, "a b\n");
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let result = standard().execute(ExecRequest::new(Vec::<String>::new())).await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("empty"));
    }
}
