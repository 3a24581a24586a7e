//! Sandboxed execution of pre-validated commands.
//!
//! The crate takes argument vectors that have already been through input
//! validation and runs them with defense in depth: an admission policy
//! decides what may spawn at all, the child environment is synthesized
//! from scratch, POSIX resource ceilings are applied between fork and
//! exec, and a wall clock timeout tears down the whole process group.
//!
//! ```no_run
//! use stockade_exec::{ExecRequest, ExecutionMode, SecureExecutor};
//!
//! # async fn demo() {
//! let executor = SecureExecutor::new(ExecutionMode::Standard);
//! let result = executor.execute(ExecRequest::new(["ls", "-la"])).await;
//! if !result.success {
//!     eprintln!("failed: {:?}", result.error_message);
//! }
//! # }
//! ```

mod admission;
mod env;
mod executor;
mod isolated;
mod limits;
mod process_group;

pub use admission::{split_command_line, AdmissionDecision, AdmissionPolicy, ExecutionMode};
pub use env::{build_child_env, is_denied_var, EnvMode, FIXED_PATH};
pub use executor::{
    ExecRequest, ExecutionResult, SecureExecutor, OUTPUT_CAP_BYTES, TRUNCATION_MARKER,
};
pub use isolated::isolated_execution;
#[cfg(unix)]
pub use limits::PosixResourceLimiter;
pub use limits::{
    platform_limiter, LimitsError, NoopResourceLimiter, ResourceLimiter, ResourceLimits,
};
pub use process_group::{is_running, kill_group, terminate_gracefully, KillSignal, TerminationOutcome};
