use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{AdapterError, AdapterFailureReason};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout_ms: u64,
    /// When true, a non-zero exit is not an error; the caller inspects
    /// `RunOutput::exit_code` itself (used for probes that encode state in
    /// the exit code).
    pub allow_failure: bool,
    pub stdin: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            timeout_ms: 30_000,
            allow_failure: false,
            stdin: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// A single `run(cmd, args, opts) -> {stdout, stderr, exitCode}` seam every
/// adapter goes through, per spec §9's "external process orchestration"
/// design note. Lets dispatcher/handler tests swap in a fake without
/// spawning real `adb`/`xcrun` processes.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, cmd: &str, args: &[String], opts: RunOptions) -> Result<RunOutput, AdapterError>;
}

/// The real runner: spawns a child process, feeds it `opts.stdin` if given,
/// and enforces `opts.timeout_ms` by killing the child (and, on unix, its
/// process group) if it hasn't exited in time.
#[derive(Debug, Default)]
pub struct SystemProcessRunner;

impl SystemProcessRunner {
    pub fn new() -> Self {
        SystemProcessRunner
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(&self, cmd: &str, args: &[String], opts: RunOptions) -> Result<RunOutput, AdapterError> {
        let mut command = Command::new(cmd);
        command.args(args);
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            // Group children under their own pgid so a timeout kill can take
            // out any grandchildren the platform tool spawns too.
            unsafe {
                use std::os::unix::process::CommandExt;
                command.pre_exec(|| {
                    libc_setsid();
                    Ok(())
                });
            }
        }

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AdapterError::binary_not_found(cmd)
            } else {
                AdapterError::new(
                    AdapterFailureReason::NonZeroExit,
                    format!("failed to spawn '{cmd}': {err}"),
                    false,
                )
            }
        })?;

        if let Some(input) = &opts.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(input.as_bytes()).await;
            }
        } else {
            drop(child.stdin.take());
        }

        let timeout = Duration::from_millis(opts.timeout_ms);
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(AdapterError::new(
                    AdapterFailureReason::NonZeroExit,
                    format!("'{cmd}' failed: {err}"),
                    false,
                ))
            }
            Err(_) => {
                return Err(AdapterError::timeout(format!(
                    "'{cmd}' did not complete within {}ms",
                    opts.timeout_ms
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        if !opts.allow_failure && !output.status.success() {
            return Err(AdapterError::non_zero_exit(cmd, exit_code, &stderr));
        }

        Ok(RunOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

#[cfg(unix)]
fn libc_setsid() {
    // Best-effort: detach from the parent's process group so a timeout kill
    // can reach a whole child tree. Failure here is not fatal to the run.
    extern "C" {
        fn setsid() -> i32;
    }
    unsafe {
        setsid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_real_command_and_captures_stdout() {
        let runner = SystemProcessRunner::new();
        let output = runner
            .run("echo", &["hello".to_string()], RunOptions::default())
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn missing_binary_surfaces_binary_not_found() {
        let runner = SystemProcessRunner::new();
        let err = runner
            .run(
                "agent-device-definitely-not-a-real-binary",
                &[],
                RunOptions::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.reason, AdapterFailureReason::BinaryNotFound);
        assert!(!err.transient);
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error_unless_allow_failure() {
        let runner = SystemProcessRunner::new();
        let err = runner
            .run("false", &[], RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason, AdapterFailureReason::NonZeroExit);

        let output = runner
            .run(
                "false",
                &[],
                RunOptions {
                    allow_failure: true,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(1));
    }

    #[tokio::test]
    async fn timeout_kills_a_slow_command() {
        let runner = SystemProcessRunner::new();
        let err = runner
            .run(
                "sleep",
                &["5".to_string()],
                RunOptions {
                    timeout_ms: 50,
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.reason, AdapterFailureReason::Timeout);
        assert!(err.transient);
    }
}
