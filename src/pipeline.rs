//! The assembled pipeline: one raw command line in, one audited outcome out.
//!
//! [`CommandPipeline`] wires the three layers together in the only safe
//! order: validate the line, admit the argument vector, execute, and on
//! failure consult the recovery engine for a corrected invocation.
//! Corrections are model output and get no shortcut; they pass the same
//! validation and admission gates as the original line before they run.
//! The attempt loop is bounded by [`CommandPipeline::with_max_attempts`]
//! (default [`DEFAULT_MAX_ATTEMPTS`]), counting the original execution.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use stockade_exec::{
    split_command_line, AdmissionDecision, ExecRequest, ExecutionMode, ExecutionResult,
    SecureExecutor,
};
use stockade_recovery::{ErrorRecoveryEngine, RecoveryContext, RecoveryResult, ToolInvocation};
use stockade_validation::{InputValidator, ValidationResult};

/// Tool name under which executions are reported to the recovery engine.
/// A correction must target this tool to be re-executed.
pub const PIPELINE_TOOL: &str = "run_command";

/// Executions per run, counting the original attempt.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Consulted when admission answers `Confirm`. Receives the rendered
/// command line and returns whether the user approved. Without an
/// installed hook, confirmation-gated commands are denied.
pub type ConfirmationHook = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// How one pipeline run ended. `Rejected` and `Denied` mean no process
/// was ever spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// The line failed validation and was never tokenized or executed.
    Rejected { validation: ValidationResult },
    /// Admission refused the command, or confirmation was required and
    /// not granted.
    Denied { reason: String },
    /// An execution succeeded, possibly after corrected retries.
    Completed {
        result: ExecutionResult,
        attempts: u32,
    },
    /// Every attempt failed. `recovery` holds the last recovery verdict
    /// when one was sought.
    Failed {
        result: ExecutionResult,
        recovery: Option<RecoveryResult>,
        attempts: u32,
    },
}

impl PipelineOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Display-ready reason when the run did not complete.
    pub fn failure_reason(&self) -> Option<String> {
        match self {
            Self::Completed { .. } => None,
            Self::Rejected { validation } => {
                let reasons = if validation.errors.is_empty() {
                    &validation.warnings
                } else {
                    &validation.errors
                };
                Some(reasons.join("; "))
            }
            Self::Denied { reason } => Some(reason.clone()),
            Self::Failed { result, recovery, .. } => recovery
                .as_ref()
                .and_then(|recovery| recovery.escalation_reason.clone())
                .or_else(|| Some(failure_text(result))),
        }
    }
}

/// Drives raw command lines through validation, admission, execution,
/// and bounded recovery.
pub struct CommandPipeline {
    validator: InputValidator,
    executor: SecureExecutor,
    engine: ErrorRecoveryEngine,
    max_attempts: u32,
    confirmer: Option<ConfirmationHook>,
}

impl fmt::Debug for CommandPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandPipeline")
            .field("executor", &self.executor)
            .field("max_attempts", &self.max_attempts)
            .field("has_confirmer", &self.confirmer.is_some())
            .finish_non_exhaustive()
    }
}

impl CommandPipeline {
    /// A pipeline with `Standard` admission, default validation and
    /// limits, no diagnosis provider, and no confirmation hook.
    /// Confirmation-gated commands are denied until a hook is installed.
    pub fn new() -> Self {
        Self::with_mode(ExecutionMode::Standard)
    }

    pub fn with_mode(mode: ExecutionMode) -> Self {
        Self {
            validator: InputValidator::new(),
            executor: SecureExecutor::new(mode),
            engine: ErrorRecoveryEngine::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            confirmer: None,
        }
    }

    pub fn with_validator(mut self, validator: InputValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_executor(mut self, executor: SecureExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_engine(mut self, engine: ErrorRecoveryEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Ceiling on executions per run, counting the original attempt.
    /// Clamped to at least one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Install the hook consulted when admission asks for confirmation.
    pub fn with_confirmation(mut self, hook: ConfirmationHook) -> Self {
        self.confirmer = Some(hook);
        self
    }

    pub fn executor(&self) -> &SecureExecutor {
        &self.executor
    }

    /// The engine, for `stats()` and breaker inspection.
    pub fn engine(&self) -> &ErrorRecoveryEngine {
        &self.engine
    }

    /// Run one command line through the full pipeline.
    pub async fn run(&self, line: &str) -> PipelineOutcome {
        self.run_with_intent(line, None).await
    }

    /// Same as [`CommandPipeline::run`], with the user's stated goal
    /// attached to recovery contexts so diagnosis prompts can cite it.
    pub async fn run_with_intent(&self, line: &str, intent: Option<&str>) -> PipelineOutcome {
        let validation = self.validator.validate_command(line, false);
        if !validation.is_valid {
            debug!(errors = ?validation.errors, "command line failed validation");
            return PipelineOutcome::Rejected { validation };
        }
        let mut args = split_command_line(&validation.sanitized_value);
        if args.is_empty() {
            return PipelineOutcome::Denied {
                reason: "empty command line".to_owned(),
            };
        }
        if let Err(reason) = self.admit(&args) {
            debug!(%reason, "command denied by admission");
            return PipelineOutcome::Denied { reason };
        }

        let mut history: Vec<ToolInvocation> = Vec::new();
        let mut pending: Option<RecoveryContext> = None;
        let mut attempt: u32 = 1;
        loop {
            let result = self.executor.execute(ExecRequest::new(args.clone())).await;

            if result.success {
                if let Some(context) = pending.take() {
                    self.engine.record_recovery_outcome(&context, true, None);
                }
                return PipelineOutcome::Completed {
                    result,
                    attempts: attempt,
                };
            }
            if let Some(context) = pending.take() {
                self.engine.record_recovery_outcome(&context, false, None);
            }
            if attempt >= self.max_attempts {
                return PipelineOutcome::Failed {
                    result,
                    recovery: None,
                    attempts: attempt,
                };
            }

            let mut context =
                RecoveryContext::new(PIPELINE_TOOL, command_payload(&args), failure_text(&result))
                    .with_attempt(attempt, self.max_attempts)
                    .with_history(history.clone());
            if let Some(intent) = intent {
                context = context.with_intent(intent);
            }
            history.push(ToolInvocation {
                tool: PIPELINE_TOOL.to_owned(),
                args: command_payload(&args),
            });

            let recovery = self.engine.attempt_recovery_with_backoff(&mut context).await;
            if !recovery.success {
                return PipelineOutcome::Failed {
                    result,
                    recovery: Some(recovery),
                    attempts: attempt,
                };
            }
            let vetted = match extract_correction(&recovery) {
                Some(corrected) => self.vet_correction(corrected),
                None => Err(format!("correction did not target {PIPELINE_TOOL}")),
            };
            match vetted {
                Ok(corrected_args) => {
                    debug!(command = ?corrected_args, "retrying with corrected command");
                    args = corrected_args;
                    pending = Some(context);
                    attempt += 1;
                }
                Err(reason) => {
                    return self.correction_failed(&context, recovery, result, attempt, reason);
                }
            }
        }
    }

    /// Pure admission check, folded down to allow-or-reason. `Confirm`
    /// consults the hook; a missing or declining hook denies.
    fn admit(&self, args: &[String]) -> Result<(), String> {
        match self.executor.admission(args) {
            AdmissionDecision::Allow => Ok(()),
            AdmissionDecision::Confirm { command } => {
                let rendered = args.join(" ");
                match &self.confirmer {
                    Some(confirm) if confirm(&rendered) => {
                        debug!(command = %rendered, "execution confirmed");
                        Ok(())
                    }
                    Some(_) => Err(format!("user declined to run '{command}'")),
                    None => Err(format!(
                        "'{command}' requires confirmation and no confirmation hook is installed"
                    )),
                }
            }
            AdmissionDecision::Deny { reason } => Err(reason),
        }
    }

    /// A corrected command passes the same gates as an original line.
    /// Argv corrections are validated against their rendered join but
    /// executed with their boundaries intact.
    fn vet_correction(&self, corrected: CorrectedCommand) -> Result<Vec<String>, String> {
        let args = match corrected {
            CorrectedCommand::Line(line) => {
                let check = self.validator.validate_command(&line, false);
                if !check.is_valid {
                    return Err(correction_rejection(&check));
                }
                split_command_line(&check.sanitized_value)
            }
            CorrectedCommand::Argv(args) => {
                let check = self.validator.validate_command(&args.join(" "), false);
                if !check.is_valid {
                    return Err(correction_rejection(&check));
                }
                args
            }
        };
        if args.is_empty() {
            return Err("corrected command is empty".to_owned());
        }
        self.admit(&args)?;
        Ok(args)
    }

    fn correction_failed(
        &self,
        context: &RecoveryContext,
        mut recovery: RecoveryResult,
        result: ExecutionResult,
        attempts: u32,
        reason: String,
    ) -> PipelineOutcome {
        debug!(%reason, "discarding unusable correction");
        self.engine
            .record_recovery_outcome(context, false, Some(reason.clone()));
        recovery.escalation_reason = Some(reason);
        PipelineOutcome::Failed {
            result,
            recovery: Some(recovery),
            attempts,
        }
    }
}

impl Default for CommandPipeline {
    fn default() -> Self {
        Self::new()
    }
}

enum CorrectedCommand {
    Line(String),
    Argv(Vec<String>),
}

/// Pull a runnable command out of a recovery verdict. Only corrections
/// that target [`PIPELINE_TOOL`] and carry a `command` argument count.
fn extract_correction(recovery: &RecoveryResult) -> Option<CorrectedCommand> {
    if recovery.corrected_tool.as_deref() != Some(PIPELINE_TOOL) {
        return None;
    }
    match recovery.corrected_args.as_ref()?.get("command")? {
        Value::String(line) => Some(CorrectedCommand::Line(line.clone())),
        Value::Array(parts) => {
            let args: Option<Vec<String>> = parts
                .iter()
                .map(|part| part.as_str().map(str::to_owned))
                .collect();
            args.map(CorrectedCommand::Argv)
        }
        _ => None,
    }
}

fn command_payload(args: &[String]) -> Value {
    let mut payload = Map::new();
    payload.insert(
        "command".to_owned(),
        Value::Array(args.iter().cloned().map(Value::String).collect()),
    );
    Value::Object(payload)
}

fn correction_rejection(check: &ValidationResult) -> String {
    let detail = check
        .errors
        .first()
        .cloned()
        .unwrap_or_else(|| "validation failed".to_owned());
    format!("corrected command rejected: {detail}")
}

/// The most useful error string a failed result offers. The child's own
/// stderr carries the categorizable text for ordinary failures; timeout
/// and resource kills are described by the executor instead.
fn failure_text(result: &ExecutionResult) -> String {
    if result.timed_out || result.resource_exceeded {
        if let Some(message) = &result.error_message {
            return message.clone();
        }
    }
    let stderr = result.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_owned();
    }
    if let Some(message) = &result.error_message {
        if !message.is_empty() {
            return message.clone();
        }
    }
    match result.exit_code {
        Some(code) => format!("command exited with status {code}"),
        None => "command terminated without an exit status".to_owned(),
    }
}
