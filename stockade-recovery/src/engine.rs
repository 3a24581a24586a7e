//! Recovery orchestration.
//!
//! One cycle runs categorize, strategize, and (for non-terminal strategies)
//! diagnose and parse, always returning a populated [`RecoveryResult`].
//! [`ErrorRecoveryEngine::attempt_recovery_with_backoff`] wraps the cycle
//! with the circuit breaker gate, the permanent-error gate, and the
//! jittered backoff sleep. Whether a produced correction actually worked is
//! decided one layer up: the caller re-executes it and reports back through
//! [`ErrorRecoveryEngine::record_recovery_outcome`], which feeds the
//! learned-fix table.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use stockade_exec::ExecutionResult;

use crate::breaker::{BreakerDiagnostics, CircuitBreaker};
use crate::category::{categorize_error, ErrorCategory, RecoveryStrategy};
use crate::diagnosis::{parse_correction, Correction, DiagnosisProvider, DiagnosisRequest};
use crate::retry::RetryPolicy;

/// One prior tool call, kept for diagnosis context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub args: Value,
}

/// Everything one failure/retry cycle needs. Owned by the caller; the
/// engine fills in `diagnosis`, `suggested_fix`, and `recovery_strategy`
/// as the cycle proceeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryContext {
    pub attempt_number: u32,
    pub max_attempts: u32,
    pub tool_name: String,
    pub tool_args: Value,
    pub error: String,
    pub category: ErrorCategory,
    pub user_intent: Option<String>,
    pub history: Vec<ToolInvocation>,
    pub diagnosis: Option<String>,
    pub suggested_fix: Option<Correction>,
    pub recovery_strategy: Option<RecoveryStrategy>,
}

impl RecoveryContext {
    pub fn new(tool_name: impl Into<String>, tool_args: Value, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            attempt_number: 1,
            max_attempts: 3,
            tool_name: tool_name.into(),
            tool_args,
            category: categorize_error(&error),
            error,
            user_intent: None,
            history: Vec::new(),
            diagnosis: None,
            suggested_fix: None,
            recovery_strategy: None,
        }
    }

    pub fn with_attempt(mut self, attempt_number: u32, max_attempts: u32) -> Self {
        self.attempt_number = attempt_number;
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.user_intent = Some(intent.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ToolInvocation>) -> Self {
        self.history = history;
        self
    }
}

/// The verdict of one recovery cycle. `success` means a correction was
/// produced; `recovered` stays false until the caller has re-executed the
/// correction and verified it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryResult {
    pub success: bool,
    pub recovered: bool,
    pub attempts_used: u32,
    pub corrected_tool: Option<String>,
    pub corrected_args: Option<Map<String, Value>>,
    pub result: Option<ExecutionResult>,
    pub final_error: Option<String>,
    pub escalation_reason: Option<String>,
    pub what_worked: Option<String>,
    pub what_failed: Option<String>,
}

impl RecoveryResult {
    pub fn escalated(context: &RecoveryContext, reason: impl Into<String>) -> Self {
        Self {
            attempts_used: context.attempt_number,
            final_error: Some(context.error.clone()),
            escalation_reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn corrected(context: &RecoveryContext, tool: String, args: Map<String, Value>) -> Self {
        Self {
            success: true,
            attempts_used: context.attempt_number,
            corrected_tool: Some(tool),
            corrected_args: Some(args),
            ..Self::default()
        }
    }
}

/// Observability snapshot of one engine's lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStats {
    pub errors_seen: BTreeMap<ErrorCategory, u64>,
    pub fixes_learned: usize,
    pub what_worked: Vec<String>,
    pub what_failed: Vec<String>,
    pub breaker: BreakerDiagnostics,
}

#[derive(Debug, Default)]
struct LearningState {
    // error string -> the tool that fixed it
    fixes: HashMap<String, String>,
    errors_seen: BTreeMap<ErrorCategory, u64>,
    what_worked: Vec<String>,
    what_failed: Vec<String>,
}

/// Orchestrates recovery cycles. Interior-mutable throughout, so a single
/// instance can be shared behind an `Arc`; one logical session per engine
/// is the intended usage.
pub struct ErrorRecoveryEngine {
    breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
    provider: Option<Arc<dyn DiagnosisProvider>>,
    learning: Mutex<LearningState>,
}

impl fmt::Debug for ErrorRecoveryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorRecoveryEngine")
            .field("breaker", &self.breaker)
            .field("retry_policy", &self.retry_policy)
            .field("has_provider", &self.provider.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for ErrorRecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorRecoveryEngine {
    pub fn new() -> Self {
        Self {
            breaker: CircuitBreaker::default(),
            retry_policy: RetryPolicy::default(),
            provider: None,
            learning: Mutex::new(LearningState::default()),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn DiagnosisProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Pick a strategy for the context's error: a learned fix for the exact
    /// error string wins, then the fixed category table.
    pub fn determine_strategy(&self, context: &RecoveryContext) -> RecoveryStrategy {
        if self.learning.lock().fixes.contains_key(&context.error) {
            return RecoveryStrategy::RetryModified;
        }
        match context.category {
            ErrorCategory::Syntax
            | ErrorCategory::Timeout
            | ErrorCategory::TypeError
            | ErrorCategory::ValueError => RecoveryStrategy::RetryModified,
            ErrorCategory::Permission => RecoveryStrategy::SuggestPermission,
            ErrorCategory::NotFound | ErrorCategory::Network => RecoveryStrategy::RetryAlternative,
            ErrorCategory::CommandNotFound => RecoveryStrategy::SuggestInstall,
            ErrorCategory::Unknown => {
                if context.attempt_number < context.max_attempts {
                    RecoveryStrategy::RetryModified
                } else {
                    RecoveryStrategy::Escalate
                }
            }
        }
    }

    /// One recovery cycle without the backoff/breaker wrapper.
    pub async fn attempt_recovery(&self, context: &mut RecoveryContext) -> RecoveryResult {
        context.category = categorize_error(&context.error);
        {
            let mut learning = self.learning.lock();
            *learning.errors_seen.entry(context.category).or_insert(0) += 1;
        }

        let strategy = self.determine_strategy(context);
        context.recovery_strategy = Some(strategy);
        debug!(category = %context.category, ?strategy, "selected recovery strategy");

        if matches!(strategy, RecoveryStrategy::Escalate | RecoveryStrategy::Abort) {
            return RecoveryResult::escalated(
                context,
                format!(
                    "giving up on {} error after attempt {} of {}",
                    context.category, context.attempt_number, context.max_attempts
                ),
            );
        }

        let diagnosis = self.diagnose_error(context).await;
        context.diagnosis = Some(diagnosis.clone());
        let correction = parse_correction(&diagnosis);
        context.suggested_fix = Some(correction.clone());

        match correction {
            Correction::ToolCall { tool, args } => RecoveryResult::corrected(context, tool, args),
            Correction::Unparseable => {
                RecoveryResult::escalated(context, "diagnosis produced no usable correction")
            }
        }
    }

    /// The full wrapper: breaker gate, permanent-error gate, backoff sleep,
    /// inner cycle, breaker bookkeeping. Never returns an error.
    pub async fn attempt_recovery_with_backoff(
        &self,
        context: &mut RecoveryContext,
    ) -> RecoveryResult {
        if !self.breaker.allow() {
            let state = self.breaker.state();
            debug!(%state, "recovery attempt blocked by circuit breaker");
            return RecoveryResult::escalated(
                context,
                format!("circuit breaker is {state}; recovery attempts are suspended"),
            );
        }
        if !self.retry_policy.is_retryable(&context.error) {
            return RecoveryResult::escalated(
                context,
                format!("permanent error, not retryable: {}", context.error),
            );
        }
        if context.attempt_number > 1 {
            let delay = self.retry_policy.backoff_delay(context.attempt_number);
            debug!(attempt = context.attempt_number, ?delay, "backing off before retry");
            tokio::time::sleep(delay).await;
        }

        let result = self.attempt_recovery(context).await;
        if result.success {
            self.breaker.record_success();
        } else {
            self.breaker.record_failure();
        }
        result
    }

    /// Build the diagnosis prompt and consult the provider. Provider
    /// absence or failure becomes a diagnosis string, never an error.
    pub async fn diagnose_error(&self, context: &RecoveryContext) -> String {
        let Some(provider) = &self.provider else {
            return "diagnosis unavailable: no provider configured".to_owned();
        };
        let request = DiagnosisRequest::new(build_diagnosis_prompt(context));
        match provider.diagnose(request).await {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "diagnosis provider failed");
                format!("diagnosis failed: {err}")
            }
        }
    }

    /// The caller's report on whether a re-executed correction worked.
    /// Success teaches the engine: the same error string will map straight
    /// to `RetryModified` from now on.
    pub fn record_recovery_outcome(
        &self,
        context: &RecoveryContext,
        worked: bool,
        notes: Option<String>,
    ) {
        let mut learning = self.learning.lock();
        if worked {
            let fix = match &context.suggested_fix {
                Some(Correction::ToolCall { tool, .. }) => tool.clone(),
                _ => context.tool_name.clone(),
            };
            learning.fixes.insert(context.error.clone(), fix.clone());
            learning
                .what_worked
                .push(notes.unwrap_or_else(|| format!("{fix} fixed: {}", summarize(&context.error))));
        } else {
            learning.what_failed.push(
                notes.unwrap_or_else(|| {
                    format!("correction did not resolve: {}", summarize(&context.error))
                }),
            );
        }
    }

    pub fn stats(&self) -> RecoveryStats {
        let learning = self.learning.lock();
        RecoveryStats {
            errors_seen: learning.errors_seen.clone(),
            fixes_learned: learning.fixes.len(),
            what_worked: learning.what_worked.clone(),
            what_failed: learning.what_failed.clone(),
            breaker: self.breaker.diagnostics(),
        }
    }
}

fn build_diagnosis_prompt(context: &RecoveryContext) -> String {
    let mut prompt = String::from("A tool invocation failed and needs a correction.\n\n");
    if let Some(intent) = &context.user_intent {
        let _ = writeln!(prompt, "User intent: {intent}");
    }
    let _ = writeln!(prompt, "Failed tool: {}", context.tool_name);
    let _ = writeln!(prompt, "Arguments: {}", context.tool_args);
    let _ = writeln!(prompt, "Error: {}", context.error);
    let _ = writeln!(prompt, "Category: {}", context.category);
    if !context.history.is_empty() {
        let _ = writeln!(prompt, "\nRecent tool calls:");
        let start = context.history.len().saturating_sub(3);
        for invocation in &context.history[start..] {
            let _ = writeln!(prompt, "  {}({})", invocation.tool, invocation.args);
        }
    }
    prompt.push_str(
        "\nExplain the likely cause in one or two sentences. If a corrected \
         invocation exists, finish with one line of the form \
         TOOL_CALL: {\"tool\": \"...\", \"args\": {...}}\n",
    );
    prompt
}

fn summarize(error: &str) -> String {
    const LIMIT: usize = 80;
    if error.chars().count() <= LIMIT {
        error.to_owned()
    } else {
        let mut short: String = error.chars().take(LIMIT).collect();
        short.push_str("...");
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::{CircuitBreakerConfig, CircuitState};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct ScriptedProvider {
        reply: Option<String>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(text.to_owned()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DiagnosisProvider for ScriptedProvider {
        async fn diagnose(&self, _request: DiagnosisRequest) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Some(text) => Ok(text.clone()),
                None => anyhow::bail!("provider offline"),
            }
        }
    }

    fn context(error: &str) -> RecoveryContext {
        RecoveryContext::new("shell_exec", json!({"cmd": "ls"}), error)
    }

    #[test]
    fn strategy_table_matches_the_categories() {
        let engine = ErrorRecoveryEngine::new();
        let cases = [
            ("SyntaxError: bad parse", RecoveryStrategy::RetryModified),
            ("operation timed out", RecoveryStrategy::RetryModified),
            ("TypeError: mismatch", RecoveryStrategy::RetryModified),
            ("ValueError: invalid value", RecoveryStrategy::RetryModified),
            ("Permission denied", RecoveryStrategy::SuggestPermission),
            ("No such file or directory", RecoveryStrategy::RetryAlternative),
            ("Connection refused", RecoveryStrategy::RetryAlternative),
            ("bash: rg: command not found", RecoveryStrategy::SuggestInstall),
        ];
        for (error, expected) in cases {
            assert_eq!(engine.determine_strategy(&context(error)), expected, "{error}");
        }
    }

    #[test]
    fn unknown_errors_retry_until_attempts_run_out() {
        let engine = ErrorRecoveryEngine::new();
        let early = context("inscrutable").with_attempt(1, 3);
        assert_eq!(engine.determine_strategy(&early), RecoveryStrategy::RetryModified);
        let last = context("inscrutable").with_attempt(3, 3);
        assert_eq!(engine.determine_strategy(&last), RecoveryStrategy::Escalate);
    }

    #[test]
    fn learned_fix_overrides_the_category_table() {
        let engine = ErrorRecoveryEngine::new();
        let mut ctx = context("Permission denied: /var/log/syslog");
        assert_eq!(engine.determine_strategy(&ctx), RecoveryStrategy::SuggestPermission);

        ctx.suggested_fix = Some(Correction::ToolCall {
            tool: "read_file".to_owned(),
            args: Map::new(),
        });
        engine.record_recovery_outcome(&ctx, true, None);

        let again = context("Permission denied: /var/log/syslog");
        assert_eq!(engine.determine_strategy(&again), RecoveryStrategy::RetryModified);
        assert_eq!(engine.stats().fixes_learned, 1);
    }

    #[tokio::test]
    async fn produced_correction_is_a_success() {
        let provider = ScriptedProvider::replying(
            "The directory moved.\nTOOL_CALL: {\"tool\": \"list_dir\", \"args\": {\"path\": \".\"}}",
        );
        let engine = ErrorRecoveryEngine::new().with_provider(provider.clone());
        let mut ctx = context("No such file or directory");

        let result = engine.attempt_recovery_with_backoff(&mut ctx).await;
        assert!(result.success);
        assert!(!result.recovered);
        assert_eq!(result.corrected_tool.as_deref(), Some("list_dir"));
        assert_eq!(result.corrected_args.unwrap()["path"], json!("."));
        assert_eq!(result.attempts_used, 1);
        assert!(ctx.diagnosis.unwrap().contains("directory moved"));
        assert_eq!(ctx.recovery_strategy, Some(RecoveryStrategy::RetryAlternative));
        assert_eq!(engine.breaker().diagnostics().total_successes, 1);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn provider_failure_becomes_a_diagnosis_string() {
        let provider = ScriptedProvider::failing();
        let engine = ErrorRecoveryEngine::new().with_provider(provider.clone());
        let mut ctx = context("No such file or directory");

        let result = engine.attempt_recovery_with_backoff(&mut ctx).await;
        assert!(!result.success);
        assert!(result.escalation_reason.unwrap().contains("no usable correction"));
        assert!(ctx.diagnosis.unwrap().contains("diagnosis failed"));
        assert_eq!(engine.breaker().diagnostics().total_failures, 1);
    }

    #[tokio::test]
    async fn terminal_strategy_skips_diagnosis() {
        let provider = ScriptedProvider::replying("unused");
        let engine = ErrorRecoveryEngine::new().with_provider(provider.clone());
        let mut ctx = context("inscrutable").with_attempt(3, 3);

        let result = engine.attempt_recovery_with_backoff(&mut ctx).await;
        assert!(!result.success);
        assert!(result.escalation_reason.unwrap().contains("giving up"));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn permanent_errors_short_circuit_before_diagnosis() {
        let provider = ScriptedProvider::replying("unused");
        let engine = ErrorRecoveryEngine::new().with_provider(provider.clone());
        let mut ctx = context("write failed: No space left on device");

        let result = engine.attempt_recovery_with_backoff(&mut ctx).await;
        assert!(!result.success);
        assert!(result.escalation_reason.unwrap().contains("permanent error"));
        assert_eq!(provider.call_count(), 0);
        // Gate rejections do not feed the breaker.
        assert_eq!(engine.breaker().diagnostics().total_failures, 0);
    }

    #[tokio::test]
    async fn open_breaker_suppresses_the_provider() {
        let provider = ScriptedProvider::failing();
        let engine = ErrorRecoveryEngine::new()
            .with_provider(provider.clone())
            .with_breaker(CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: 5,
                ..CircuitBreakerConfig::default()
            }));

        for attempt in 0..5 {
            let mut ctx = context(&format!("mystery failure {attempt}"));
            let result = engine.attempt_recovery_with_backoff(&mut ctx).await;
            assert!(!result.success);
        }
        assert_eq!(engine.breaker().state(), CircuitState::Open);
        assert_eq!(provider.call_count(), 5);

        let mut ctx = context("mystery failure 6");
        let result = engine.attempt_recovery_with_backoff(&mut ctx).await;
        assert!(!result.success);
        assert!(result.escalation_reason.unwrap().contains("circuit breaker is open"));
        assert_eq!(provider.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_sleep_the_backoff_delay() {
        let provider =
            ScriptedProvider::replying("TOOL_CALL: {\"tool\": \"ls\", \"args\": {}}");
        let engine = ErrorRecoveryEngine::new().with_provider(provider);
        let mut ctx = context("No such file or directory").with_attempt(2, 3);

        let before = tokio::time::Instant::now();
        let result = engine.attempt_recovery_with_backoff(&mut ctx).await;
        let slept = before.elapsed();
        assert!(result.success);
        // Attempt 2 with the default policy: raw delay 1s, equal jitter
        // keeps it in [500ms, 1s].
        assert!(slept >= std::time::Duration::from_millis(500), "{slept:?}");
        assert!(slept <= std::time::Duration::from_secs(1), "{slept:?}");
    }

    #[tokio::test]
    async fn stats_count_categories_and_outcomes() {
        let provider = ScriptedProvider::failing();
        let engine = ErrorRecoveryEngine::new().with_provider(provider);

        let mut first = context("No such file or directory");
        let _ = engine.attempt_recovery_with_backoff(&mut first).await;
        let mut second = context("Permission denied");
        let _ = engine.attempt_recovery_with_backoff(&mut second).await;
        engine.record_recovery_outcome(&second, false, Some("chmod refused".to_owned()));

        let stats = engine.stats();
        assert_eq!(stats.errors_seen[&ErrorCategory::NotFound], 1);
        assert_eq!(stats.errors_seen[&ErrorCategory::Permission], 1);
        assert_eq!(stats.fixes_learned, 0);
        assert_eq!(stats.what_failed, vec!["chmod refused".to_owned()]);
        assert!(stats.what_worked.is_empty());
    }

    #[test]
    fn prompt_includes_intent_error_and_recent_history() {
        let ctx = context("No such file or directory")
            .with_intent("list the project files")
            .with_history(vec![
                ToolInvocation { tool: "a".to_owned(), args: json!(1) },
                ToolInvocation { tool: "b".to_owned(), args: json!(2) },
                ToolInvocation { tool: "c".to_owned(), args: json!(3) },
                ToolInvocation { tool: "d".to_owned(), args: json!(4) },
            ]);
        let prompt = build_diagnosis_prompt(&ctx);
        assert!(prompt.contains("User intent: list the project files"));
        assert!(prompt.contains("Failed tool: shell_exec"));
        assert!(prompt.contains("Error: No such file or directory"));
        assert!(prompt.contains("Category: not_found"));
        assert!(!prompt.contains("a(1)"), "history should keep only the last 3");
        assert!(prompt.contains("b(2)"));
        assert!(prompt.contains("d(4)"));
        assert!(prompt.contains("TOOL_CALL:"));
    }
}
