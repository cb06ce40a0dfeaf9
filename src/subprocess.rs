//! Subprocess runner: bounded single-command and fan-out execution with
//! process-group kill on timeout, grounded on the gate-timeout pattern used
//! for verification scripts.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use futures::stream::{self, StreamExt};

pub const TIMEOUT_STDERR: &str = "TIMEOUT";
const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: std::path::PathBuf,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, working_dir: impl AsRef<Path>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.as_ref().to_path_buf(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(120),
            max_output_bytes: 1_000_000,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

pub struct SubprocessRunner {
    max_parallel: usize,
}

impl SubprocessRunner {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    pub async fn run(&self, spec: &CommandSpec) -> CommandOutcome {
        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .envs(&spec.env)
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        match tokio::time::timeout(spec.timeout, cmd.output()).await {
            Ok(Ok(output)) => CommandOutcome {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: truncate_utf8(&output.stdout, spec.max_output_bytes),
                stderr: truncate_utf8(&output.stderr, spec.max_output_bytes),
                timed_out: false,
            },
            Ok(Err(e)) => CommandOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("failed to spawn {}: {e}", spec.program),
                timed_out: false,
            },
            Err(_) => CommandOutcome {
                exit_code: TIMEOUT_EXIT_CODE,
                stdout: String::new(),
                stderr: TIMEOUT_STDERR.to_string(),
                timed_out: true,
            },
        }
    }

    /// Run a set of commands concurrently, bounded by `max_parallel`. A
    /// timeout on one command never cancels its siblings.
    pub async fn run_parallel(
        &self,
        specs: Vec<(String, CommandSpec)>,
    ) -> BTreeMap<String, CommandOutcome> {
        stream::iter(specs)
            .map(|(id, spec)| async move {
                let outcome = self.run(&spec).await;
                (id, outcome)
            })
            .buffer_unordered(self.max_parallel)
            .collect::<BTreeMap<_, _>>()
            .await
    }
}

fn truncate_utf8(bytes: &[u8], max_bytes: usize) -> String {
    let s = String::from_utf8_lossy(bytes);
    if s.len() <= max_bytes {
        return s.into_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_captures_exit_code_and_stdout() {
        let runner = SubprocessRunner::new(4);
        let spec = CommandSpec::new("sh", ".").with_args(["-c".into(), "echo hi".into()]);
        let outcome = runner.run(&spec).await;
        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.stdout.trim() == "hi");
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn run_times_out_and_reports_sentinel() {
        let runner = SubprocessRunner::new(4);
        let spec = CommandSpec::new("sh", ".")
            .with_args(["-c".into(), "sleep 5".into()])
            .with_timeout(Duration::from_millis(50));
        let outcome = runner.run(&spec).await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.stderr, TIMEOUT_STDERR);
    }

    #[tokio::test]
    async fn run_parallel_does_not_let_one_timeout_cancel_siblings() {
        let runner = SubprocessRunner::new(4);
        let specs = vec![
            (
                "slow".to_string(),
                CommandSpec::new("sh", ".")
                    .with_args(["-c".into(), "sleep 5".into()])
                    .with_timeout(Duration::from_millis(50)),
            ),
            (
                "fast".to_string(),
                CommandSpec::new("sh", ".").with_args(["-c".into(), "echo ok".into()]),
            ),
        ];
        let results = runner.run_parallel(specs).await;
        assert!(results["slow"].timed_out);
        assert_eq!(results["fast"].exit_code, 0);
    }
}
