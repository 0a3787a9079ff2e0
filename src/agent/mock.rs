//! Mock agent for tests.
//!
//! Runs a real subprocess (so the full spawn/stream/cleanup path is
//! exercised) but the subprocess is just `sh` replaying a canned response
//! passed through the child environment, or `cat` echoing the composed
//! prompt back.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{AnalysisInjection, CliAgent};
use crate::runner::RunSpec;

pub(crate) struct MockAgent {
    stdout: String,
    exit_code: i32,
    echo_prompt: bool,
    invocations: AtomicUsize,
}

impl MockAgent {
    /// Always emits `output` and exits zero.
    pub fn replying(output: &str) -> Self {
        Self {
            stdout: output.to_string(),
            exit_code: 0,
            echo_prompt: false,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Emits `stderr`-style noise on fd 2 and exits non-zero.
    pub fn failing(exit_code: i32, diagnostic: &str) -> Self {
        Self {
            stdout: diagnostic.to_string(),
            exit_code,
            echo_prompt: false,
            invocations: AtomicUsize::new(0),
        }
    }

    /// Echoes the composed prompt back verbatim.
    pub fn echoing() -> Self {
        Self {
            stdout: String::new(),
            exit_code: 0,
            echo_prompt: true,
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CliAgent for MockAgent {
    fn name(&self) -> &'static str {
        "Mock"
    }

    fn analysis_injection(&self) -> AnalysisInjection {
        AnalysisInjection::InlineUser
    }

    fn build_run(&self, sandbox: &Path, prompt: &str, _model: Option<&str>) -> RunSpec {
        self.invocations.fetch_add(1, Ordering::SeqCst);

        if self.echo_prompt {
            let mut spec = RunSpec::new("cat", sandbox);
            spec.stdin_payload = Some(prompt.to_string());
            return spec;
        }

        // The canned response travels via the child environment so no
        // shell quoting is needed.
        let script = if self.exit_code == 0 {
            r#"printf '%s' "$FERRY_MOCK_OUTPUT""#
        } else {
            r#"printf '%s' "$FERRY_MOCK_OUTPUT" >&2; exit "$FERRY_MOCK_EXIT""#
        };

        let mut spec = RunSpec::new("sh", sandbox);
        spec.args = vec!["-c".to_string(), script.to_string()];
        spec.env_set = vec![
            ("FERRY_MOCK_OUTPUT".to_string(), self.stdout.clone()),
            ("FERRY_MOCK_EXIT".to_string(), self.exit_code.to_string()),
        ];
        spec
    }

    async fn verify(&self) -> Result<String> {
        Ok("mock".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{run_capture, RunnerConfig};

    #[tokio::test]
    async fn test_replying_mock_emits_canned_output() {
        let dir = tempfile::tempdir().unwrap();
        let agent = MockAgent::replying("canned line\n");
        let spec = agent.build_run(dir.path(), "ignored", None);
        let output = run_capture(spec, RunnerConfig::default()).await.unwrap();
        assert_eq!(output, "canned line\n");
        assert_eq!(agent.invocation_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_mock_reports_diagnostic() {
        let dir = tempfile::tempdir().unwrap();
        let agent = MockAgent::failing(2, "quota exceeded");
        let spec = agent.build_run(dir.path(), "ignored", None);
        let err = run_capture(spec, RunnerConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_process_exit());
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_echoing_mock_returns_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let agent = MockAgent::echoing();
        let spec = agent.build_run(dir.path(), "the composed prompt", None);
        let output = run_capture(spec, RunnerConfig::default()).await.unwrap();
        assert_eq!(output, "the composed prompt");
    }
}
