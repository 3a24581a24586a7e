//! Throwaway execution environments.

use std::future::Future;

use anyhow::{Context, Result};

use crate::admission::ExecutionMode;
use crate::executor::SecureExecutor;
use crate::limits::ResourceLimits;

/// Run `work` with an executor confined to a fresh temporary directory.
///
/// The executor is strict-mode with minimal resource ceilings and its
/// working directory set to the scratch space. The directory is removed
/// when `work` finishes; if `work` panics or fails, removal still happens
/// through the guard's drop.
pub async fn isolated_execution<F, Fut, T>(work: F) -> Result<T>
where
    F: FnOnce(SecureExecutor) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let dir = tempfile::tempdir().context("failed to create isolation directory")?;
    let executor = SecureExecutor::new(ExecutionMode::Strict)
        .with_limits(ResourceLimits::minimal())
        .with_working_dir(dir.path());
    match work(executor).await {
        Ok(value) => {
            dir.close().context("failed to remove isolation directory")?;
            Ok(value)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecRequest;
    use std::path::Path;

    #[tokio::test]
    async fn work_runs_in_a_scratch_directory() {
        let reported = isolated_execution(|executor| async move {
            let result = executor.execute(ExecRequest::new(["pwd"])).await;
            anyhow::ensure!(result.success, "pwd failed: {:?}", result.error_message);
            Ok(result.stdout.trim_end().to_owned())
        })
        .await
        .unwrap();
        assert!(!reported.is_empty());
        assert!(
            !Path::new(&reported).exists(),
            "scratch directory {reported} survived"
        );
    }

    #[tokio::test]
    async fn executor_is_strict_with_minimal_ceilings() {
        isolated_execution(|executor| async move {
            assert_eq!(executor.mode(), ExecutionMode::Strict);
            assert_eq!(*executor.limits(), ResourceLimits::minimal());
            let result = executor.execute(ExecRequest::new(["echo", "ok"])).await;
            anyhow::ensure!(result.success);
            let denied = executor.execute(ExecRequest::new(["python3", "-V"])).await;
            anyhow::ensure!(!denied.success);
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn work_errors_propagate() {
        let err = isolated_execution::<_, _, ()>(|_executor| async move {
            anyhow::bail!("deliberate failure")
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("deliberate failure"));
    }
}
