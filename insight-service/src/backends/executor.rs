use crate::backends::BackendError;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Runs external converters with a hard time limit. Dropping the returned
/// future kills the child process.
#[derive(Clone)]
pub struct CommandExecutor {
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn execute(
        &self,
        program: &str,
        args: &[&str],
        working_dir: Option<&Path>,
    ) -> Result<Output, BackendError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(
            program = %program,
            args = ?args,
            timeout_secs = %self.timeout.as_secs(),
            "Executing command"
        );

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))?
            .map_err(|e| BackendError::Unavailable(format!("Failed to run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(
                program = %program,
                args = ?args,
                stderr = %stderr,
                "Command failed"
            );
            // The converters fail on documents they cannot read.
            return Err(BackendError::InvalidInput(format!(
                "{} failed: {}",
                program,
                stderr.trim()
            )));
        }

        tracing::debug!(
            program = %program,
            output_size = output.stdout.len(),
            "Command succeeded"
        );

        Ok(output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let executor = CommandExecutor::new(Duration::from_secs(5));
        let err = executor
            .execute("definitely-not-an-installed-converter", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let executor = CommandExecutor::new(Duration::from_millis(50));
        let err = executor.execute("sleep", &["5"], None).await.unwrap_err();
        assert_eq!(err, BackendError::Timeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn non_zero_exit_is_invalid_input() {
        let executor = CommandExecutor::new(Duration::from_secs(5));
        let err = executor.execute("false", &[], None).await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidInput(_)));
    }
}
