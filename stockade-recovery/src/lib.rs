//! Classified recovery from failed executions.
//!
//! A failed command produces an error string; this crate categorizes it,
//! picks a strategy, consults a [`DiagnosisProvider`] for a corrected
//! invocation, and wraps the whole cycle in a retry policy and a circuit
//! breaker. Like the rest of the pipeline, no public entry point panics or
//! returns `Err`; every outcome is a populated [`RecoveryResult`].
//!
//! ```
//! use stockade_recovery::{categorize_error, ErrorCategory};
//!
//! assert_eq!(
//!     categorize_error("bash: rg: command not found"),
//!     ErrorCategory::CommandNotFound,
//! );
//! ```

mod breaker;
mod category;
mod diagnosis;
mod engine;
mod retry;

pub use breaker::{BreakerDiagnostics, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use category::{categorize_error, ErrorCategory, RecoveryStrategy};
pub use diagnosis::{
    parse_correction, Correction, DiagnosisProvider, DiagnosisRequest, DIAGNOSIS_MAX_TOKENS,
    DIAGNOSIS_TEMPERATURE, TOOL_CALL_MARKER,
};
pub use engine::{
    ErrorRecoveryEngine, RecoveryContext, RecoveryResult, RecoveryStats, ToolInvocation,
};
pub use retry::RetryPolicy;
