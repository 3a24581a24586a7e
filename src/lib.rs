//! Stockade is a secure command pipeline for agentic CLI assistants.
//!
//! Model-produced command lines are untrusted input. Stockade stands
//! between the model and the operating system with three layers, each
//! usable on its own and assembled end to end by [`CommandPipeline`]:
//!
//! - [`validation`]: five-layer input validation (type, length, pattern,
//!   injection, semantic) with Unicode NFC sanitization, shell
//!   metacharacter rejection, and canonicalized path containment checks.
//! - [`exec`]: non-shell execution of argument vectors under an admission
//!   policy, a synthesized environment, POSIX resource ceilings, and a
//!   wall-clock timeout that kills the whole process group. Output capture
//!   is capped and truncation is marked.
//! - [`recovery`]: failure categorization, a retry policy with
//!   equal-jitter exponential backoff behind a circuit breaker, and
//!   LLM-assisted diagnosis whose corrections are parsed, re-validated,
//!   and re-executed.
//!
//! Every public entry point returns a populated result record instead of
//! panicking or propagating errors; a hostile command line or a crashing
//! child process must never take the calling agent loop down with it.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use stockade::{CommandPipeline, PipelineOutcome};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Deny everything that would need interactive confirmation.
//!     let pipeline = CommandPipeline::new().with_confirmation(Arc::new(|_: &str| false));
//!
//!     match pipeline.run("wc -l Cargo.toml").await {
//!         PipelineOutcome::Completed { result, .. } => print!("{}", result.stdout),
//!         outcome => eprintln!("refused: {:?}", outcome.failure_reason()),
//!     }
//! }
//! ```
//!
//! The layers are plain library types; nothing here installs a tracing
//! subscriber, spawns a runtime, or reads configuration files. Resource
//! ceilings and process-group control are POSIX features and degrade to
//! logged no-ops elsewhere.

pub use stockade_exec as exec;
pub use stockade_recovery as recovery;
pub use stockade_validation as validation;

mod pipeline;

pub use pipeline::{
    CommandPipeline, ConfirmationHook, PipelineOutcome, DEFAULT_MAX_ATTEMPTS, PIPELINE_TOOL,
};

pub use stockade_exec::{
    isolated_execution, split_command_line, AdmissionDecision, AdmissionPolicy, EnvMode,
    ExecRequest, ExecutionMode, ExecutionResult, ResourceLimits, SecureExecutor,
};
pub use stockade_recovery::{
    categorize_error, parse_correction, CircuitBreaker, CircuitBreakerConfig, CircuitState,
    Correction, DiagnosisProvider, DiagnosisRequest, ErrorCategory, ErrorRecoveryEngine,
    RecoveryContext, RecoveryResult, RecoveryStats, RecoveryStrategy, RetryPolicy, ToolInvocation,
};
pub use stockade_validation::{
    sanitize_value, InjectionKind, InputType, InputValidator, PathValidationOptions,
    ValidationLayer, ValidationResult, ValidatorOptions,
};
